//! SQL statements against the server catalog
//!
//! `CREATE DATABASE` and `DROP DATABASE` only ever receive a [`SafeName`]. Names that may come
//! from callers are handled exclusively by [`rename`], which binds both names as parameters
//! against `pg_database`.

use sqlx::{Executor, Postgres};

use crate::SafeName;

/// `CREATE DATABASE <name>`
pub async fn create<'c, E>(exe: E, name: &SafeName) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = format!("CREATE DATABASE {name}");
    exe.execute(query.as_str()).await?;
    Ok(())
}

/// `DROP DATABASE <name>`
pub async fn drop<'c, E>(exe: E, name: &SafeName) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = format!("DROP DATABASE {name}");
    exe.execute(query.as_str()).await?;
    Ok(())
}

/// Renames database `from` to `to` by updating its catalog row.
///
/// Returns the number of renamed databases: `0` when `from` does not exist, `1` otherwise.
/// Fails with a unique violation (`23505`) when `to` is already taken.
pub async fn rename<'c, E>(exe: E, from: &str, to: &str) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {"
        UPDATE pg_database
        SET datname = $1
        WHERE datname = $2
    "};

    let result = sqlx::query(query).bind(to).bind(from).execute(exe).await?;
    Ok(result.rows_affected())
}

/// Whether a database named `name` exists.
pub async fn exists<'c, E>(exe: E, name: &str) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {"
        SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)
    "};

    sqlx::query_scalar(query).bind(name).fetch_one(exe).await
}

/// Names of all databases whose name starts with `prefix`, sorted.
pub async fn list_with_prefix<'c, E>(exe: E, prefix: &str) -> Result<Vec<String>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {"
        SELECT datname::text
        FROM pg_database
        WHERE starts_with(datname::text, $1)
        ORDER BY datname
    "};

    sqlx::query_scalar(query).bind(prefix).fetch_all(exe).await
}
