//! Read-only catalog queries
//!
//! The mutating statements live in [`sql`] and are only driven by the lifecycle operations of
//! [`ChildrenPool`](crate::ChildrenPool).

pub(crate) mod sql;

use crate::{Connection, TEMP_NAME_PREFIX};

/// Whether a database named `name` exists on the server `conn` is connected to.
#[tracing::instrument(skip(conn), err)]
pub async fn database_exists(conn: &mut Connection, name: &str) -> Result<bool, sqlx::Error> {
    sql::exists(&mut **conn, name).await
}

/// Lists databases still carrying a temporary name.
///
/// These are left behind when a cleanup drop or a removal rollback fails, or when the process
/// died between two catalog statements. They need manual inspection: a temporary database may
/// be a child that was being removed.
#[tracing::instrument(skip(conn), err)]
pub async fn list_temp_databases(conn: &mut Connection) -> Result<Vec<String>, sqlx::Error> {
    let prefix = format!("{TEMP_NAME_PREFIX}_");
    sql::list_with_prefix(&mut **conn, &prefix).await
}
