//! Creation and removal of child databases
//!
//! Catalog statements that take a database name (`CREATE DATABASE`, `DROP DATABASE`) do not
//! accept bound parameters. Caller-supplied names therefore never reach them:
//!
//! - create: `CREATE DATABASE <temp>`, then rename `<temp>` to the requested name through a
//!   parameterized `UPDATE pg_database`. If the rename fails, `<temp>` is dropped again.
//! - remove: rename the child to `<temp>` through the same parameterized update, then
//!   `DROP DATABASE <temp>`. If the drop fails, the child is renamed back.
//!
//! `<temp>` always comes from the pool's [`SafeNameGenerator`].

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::atomic::{AtomicU64, Ordering},
};

use futures::FutureExt as _;
use tokio::task::JoinError;

use crate::{
    ClientConfig, Connection, SafeName, SafeNameGenerator,
    catalog::sql,
    error::{CleanupFailure, CreateChildError, LeakFailure, RemoveChildError, UseChildError},
};

/// Prefix of child names derived when the caller does not supply one.
pub const DEFAULT_CHILD_PREFIX: &str = "pg_child";

/// Longest database name PostgreSQL stores without truncation (`NAMEDATALEN - 1`).
pub const MAX_DATABASE_NAME_LEN: usize = 63;

/// Creates and removes child databases on the server described by an administrative config.
///
/// Every operation opens its own administrative connection, so a pool can be shared between
/// concurrent tasks (e.g. behind an `Arc`).
#[derive(Debug)]
pub struct ChildrenPool {
    parent: ClientConfig,
    child_prefix: String,
    temp_names: SafeNameGenerator,
    next_child_id: AtomicU64,
}

impl ChildrenPool {
    /// Creates a pool issuing catalog statements through `parent`.
    ///
    /// `parent.database` should be a maintenance database (usually `postgres`); it must not be
    /// one of the children.
    pub fn new(parent: ClientConfig) -> Self {
        Self {
            parent,
            child_prefix: DEFAULT_CHILD_PREFIX.to_string(),
            temp_names: SafeNameGenerator::new(),
            next_child_id: AtomicU64::new(0),
        }
    }

    /// Sets the prefix of derived child names (`<prefix>_<n>`).
    #[must_use]
    pub fn with_child_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.child_prefix = prefix.into();
        self
    }

    /// The administrative config this pool connects with.
    pub fn parent(&self) -> &ClientConfig {
        &self.parent
    }

    /// Creates a child database and returns a config targeting it.
    ///
    /// `name` may contain any characters. Without a name, `<prefix>_<n>` is used.
    ///
    /// On failure no database is left behind, except when the cleanup drop itself fails; that
    /// failure is attached to the returned error (see [`CreateChildError::cleanup_failure`]).
    #[tracing::instrument(skip(self), err)]
    pub async fn create_child(&self, name: Option<&str>) -> Result<ClientConfig, CreateChildError> {
        let database = match name {
            Some(name) => name.to_string(),
            None => self.next_child_name(),
        };
        if database.len() > MAX_DATABASE_NAME_LEN {
            return Err(CreateChildError::NameTooLong {
                len: database.len(),
                max: MAX_DATABASE_NAME_LEN,
            });
        }

        let temp_database = self.temp_names.next();
        let conn = Connection::connect(&self.parent, self.parent.connect_deadline())
            .await
            .map_err(CreateChildError::Connect)?;

        let target = database.clone();
        run_to_completion(create_sequence(conn, temp_database, target))
            .await
            .map_err(CreateChildError::Interrupted)??;

        tracing::info!(database = %database, "child database created");
        Ok(self.parent.with_database(database))
    }

    /// Drops the database `child.database`.
    ///
    /// Only `child.database` is read from the config; connection settings come from the pool.
    /// If the drop fails the child keeps its name, unless renaming it back fails too, which is
    /// reported as [`RemoveChildError::Leak`].
    #[tracing::instrument(skip_all, fields(database = %child.database), err)]
    pub async fn remove_child(&self, child: &ClientConfig) -> Result<(), RemoveChildError> {
        let temp_database = self.temp_names.next();
        remove_database(&self.parent, temp_database, child.database.clone()).await?;

        tracing::info!(database = %child.database, "child database removed");
        Ok(())
    }

    /// Creates a child, runs `action` with it and removes it again on every exit path.
    ///
    /// The action's outcome is returned. A removal failure after a successful action is
    /// returned as [`UseChildError::Remove`], which still carries the action's value; after a
    /// failed action it is attached to [`UseChildError::Action`]. If the action panics, the
    /// child is removed before the panic resumes.
    ///
    /// If the returned future is dropped while `action` is still running, removal is spawned
    /// onto the current tokio runtime and its outcome is only logged. Without a runtime the
    /// child is left in place and an error is logged.
    pub async fn use_child<F, Fut, T, E>(
        &self,
        name: Option<&str>,
        action: F,
    ) -> Result<T, UseChildError<T, E>>
    where
        F: FnOnce(ClientConfig) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let child = self
            .create_child(name)
            .await
            .map_err(UseChildError::Create)?;

        let mut guard = RemoveOnDrop {
            parent: self.parent.clone(),
            database: child.database.clone(),
            temp_database: Some(self.temp_names.next()),
        };
        let outcome = AssertUnwindSafe(action(child.clone())).catch_unwind().await;
        let removal = match guard.disarm() {
            Some(temp_database) => {
                remove_database(&self.parent, temp_database, child.database.clone()).await
            }
            None => Ok(()),
        };
        if removal.is_ok() {
            tracing::info!(database = %child.database, "child database removed");
        }

        match (outcome, removal) {
            (Ok(Ok(value)), Ok(())) => Ok(value),
            (Ok(Ok(value)), Err(source)) => Err(UseChildError::Remove { value, source }),
            (Ok(Err(source)), removal) => Err(UseChildError::Action {
                source,
                removal: removal.err(),
            }),
            (Err(panic), removal) => {
                if let Err(err) = removal {
                    tracing::error!(
                        database = %child.database,
                        error = %err,
                        "failed to remove child database after action panicked"
                    );
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    fn next_child_name(&self) -> String {
        let id = self.next_child_id.fetch_add(1, Ordering::Relaxed);
        format!("{}_{id}", self.child_prefix)
    }
}

/// Runs a catalog sequence on its own task so that dropping the caller's future cannot stop it
/// between two statements.
async fn run_to_completion<T>(
    sequence: impl Future<Output = T> + Send + 'static,
) -> Result<T, JoinError>
where
    T: Send + 'static,
{
    match tokio::spawn(sequence).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(err),
    }
}

/// Removes a child when dropped before [`RemoveOnDrop::disarm`] was called.
///
/// The temporary name is reserved up front so the pool's generator is not needed at drop time.
struct RemoveOnDrop {
    parent: ClientConfig,
    database: String,
    temp_database: Option<SafeName>,
}

impl RemoveOnDrop {
    /// Takes the reserved temporary name; the guard does nothing once disarmed.
    fn disarm(&mut self) -> Option<SafeName> {
        self.temp_database.take()
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let Some(temp_database) = self.temp_database.take() else {
            return;
        };
        let database = std::mem::take(&mut self.database);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(
                database = %database,
                "no runtime to remove child database after its scope was cancelled"
            );
            return;
        };

        let parent = self.parent.clone();
        runtime.spawn(async move {
            match remove_database(&parent, temp_database, database.clone()).await {
                Ok(()) => tracing::info!(
                    database = %database,
                    "child database removed after its scope was cancelled"
                ),
                Err(err) => tracing::error!(
                    database = %database,
                    error = %err,
                    "failed to remove child database after its scope was cancelled"
                ),
            }
        });
    }
}

async fn remove_database(
    parent: &ClientConfig,
    temp_database: SafeName,
    database: String,
) -> Result<(), RemoveChildError> {
    let conn = Connection::connect(parent, parent.connect_deadline())
        .await
        .map_err(RemoveChildError::Connect)?;

    run_to_completion(remove_sequence(conn, temp_database, database))
        .await
        .map_err(RemoveChildError::Interrupted)?
}

async fn create_sequence(
    mut conn: Connection,
    temp_database: SafeName,
    database: String,
) -> Result<(), CreateChildError> {
    if let Err(source) = sql::create(&mut *conn, &temp_database).await {
        close(conn).await;
        return Err(CreateChildError::CreateTemp {
            temp_database,
            source,
        });
    }

    let result = match sql::rename(&mut *conn, temp_database.as_str(), &database).await {
        Ok(_) => Ok(()),
        Err(source) => {
            let cleanup = sql::drop(&mut *conn, &temp_database).await;
            Err(rename_failure(database, source, temp_database, cleanup))
        }
    };

    close(conn).await;
    result
}

/// Error for a failed rename during creation, given the outcome of dropping the temporary
/// database again.
fn rename_failure(
    database: String,
    source: sqlx::Error,
    temp_database: SafeName,
    cleanup: Result<(), sqlx::Error>,
) -> CreateChildError {
    let cleanup = match cleanup {
        Ok(()) => None,
        Err(err) => {
            tracing::warn!(
                temp_database = %temp_database,
                error = %err,
                "failed to drop temporary database after rename failure"
            );
            Some(CleanupFailure {
                temp_database,
                source: err,
            })
        }
    };
    CreateChildError::Rename {
        database,
        source,
        cleanup,
    }
}

async fn remove_sequence(
    mut conn: Connection,
    temp_database: SafeName,
    database: String,
) -> Result<(), RemoveChildError> {
    let result = remove_steps(&mut conn, temp_database, database).await;
    close(conn).await;
    result
}

async fn remove_steps(
    conn: &mut Connection,
    temp_database: SafeName,
    database: String,
) -> Result<(), RemoveChildError> {
    match sql::rename(&mut **conn, &database, temp_database.as_str()).await {
        Ok(0) => return Err(RemoveChildError::NotFound { database }),
        Ok(_) => {}
        Err(source) => return Err(RemoveChildError::Rename { database, source }),
    }

    let drop_error = match sql::drop(&mut **conn, &temp_database).await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    let rollback = sql::rename(&mut **conn, temp_database.as_str(), &database).await;
    Err(drop_failure(database, temp_database, drop_error, rollback))
}

/// Error for a failed drop during removal, given the outcome of renaming the child back.
///
/// Only a rollback that renamed the child yields [`RemoveChildError::Drop`]. A rollback that
/// failed or matched no database leaves the child under `temp_database`.
fn drop_failure(
    database: String,
    temp_database: SafeName,
    drop_error: sqlx::Error,
    rollback: Result<u64, sqlx::Error>,
) -> RemoveChildError {
    let rollback_error = match rollback {
        Ok(0) => None,
        Ok(_) => {
            return RemoveChildError::Drop {
                database,
                source: drop_error,
            };
        }
        Err(err) => Some(err),
    };

    tracing::error!(
        database = %database,
        temp_database = %temp_database,
        drop_error = %drop_error,
        rollback_error = ?rollback_error,
        "child database stranded under temporary name"
    );
    LeakFailure {
        database,
        temp_database,
        drop_error,
        rollback_error,
    }
    .into()
}

async fn close(conn: Connection) {
    if let Err(err) = conn.close().await {
        tracing::warn!(error = %err, "failed to close administrative connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ChildrenPool {
        ChildrenPool::new(ClientConfig::new("127.0.0.1", 1, "postgres", "", "postgres"))
    }

    #[test]
    fn derived_child_names_count_up_from_zero() {
        let pool = pool().with_child_prefix("child");

        assert_eq!(pool.next_child_name(), "child_0");
        assert_eq!(pool.next_child_name(), "child_1");
    }

    #[test]
    fn derived_child_names_use_default_prefix() {
        assert_eq!(pool().next_child_name(), "pg_child_0");
    }

    #[tokio::test]
    async fn create_child_rejects_names_the_catalog_would_truncate() {
        //* Given
        let pool = pool();
        let name = "x".repeat(MAX_DATABASE_NAME_LEN + 1);

        //* When
        let result = pool.create_child(Some(&name)).await;

        //* Then
        assert!(
            matches!(result, Err(CreateChildError::NameTooLong { len: 64, max: 63 })),
            "expected name length error, got {result:?}"
        );
    }

    #[tokio::test]
    async fn create_child_reports_unreachable_server_as_connect_error() {
        let pool = pool();

        let result = pool.create_child(Some("child")).await;

        assert!(
            matches!(result, Err(CreateChildError::Connect(_))),
            "expected connect error, got {result:?}"
        );
    }

    #[tokio::test]
    async fn use_child_does_not_run_action_when_creation_fails() {
        //* Given
        let pool = pool();
        let mut ran = false;

        //* When
        let result = pool
            .use_child(None, |_child| {
                ran = true;
                async { Ok::<_, std::io::Error>(()) }
            })
            .await;

        //* Then
        assert!(matches!(result, Err(UseChildError::Create(_))));
        assert!(!ran, "action must not run without a child");
    }

    #[test]
    fn drop_failure_with_failed_rollback_is_leak_naming_both_databases() {
        //* Given
        let temp_database = SafeNameGenerator::new().next();

        //* When
        let err = drop_failure(
            "orders".to_string(),
            temp_database.clone(),
            sqlx::Error::Protocol("drop rejected".to_string()),
            Err(sqlx::Error::PoolClosed),
        );

        //* Then
        let RemoveChildError::Leak(leak) = &err else {
            panic!("expected leak, got {err:?}");
        };
        assert_eq!(leak.database, "orders");
        assert_eq!(leak.temp_database, temp_database);
        assert!(matches!(&leak.drop_error, sqlx::Error::Protocol(msg) if msg == "drop rejected"));
        assert!(matches!(leak.rollback_error, Some(sqlx::Error::PoolClosed)));
        assert!(err.is_leak());
    }

    #[test]
    fn drop_failure_with_rollback_matching_nothing_is_leak() {
        //* When
        let err = drop_failure(
            "orders".to_string(),
            SafeNameGenerator::new().next(),
            sqlx::Error::PoolClosed,
            Ok(0),
        );

        //* Then
        assert!(
            matches!(&err, RemoveChildError::Leak(leak) if leak.rollback_error.is_none()),
            "expected leak without rollback error, got {err:?}"
        );
    }

    #[test]
    fn drop_failure_with_successful_rollback_is_restored_drop_error() {
        //* When
        let err = drop_failure(
            "orders".to_string(),
            SafeNameGenerator::new().next(),
            sqlx::Error::PoolClosed,
            Ok(1),
        );

        //* Then
        assert!(
            matches!(
                &err,
                RemoveChildError::Drop { database, source: sqlx::Error::PoolClosed }
                    if database == "orders"
            ),
            "expected restored drop error, got {err:?}"
        );
        assert!(!err.is_leak());
    }

    #[test]
    fn rename_failure_attaches_failed_cleanup_and_keeps_rename_error_as_source() {
        //* Given
        let temp_database = SafeNameGenerator::new().next();

        //* When
        let err = rename_failure(
            "orders".to_string(),
            sqlx::Error::Protocol("rename rejected".to_string()),
            temp_database.clone(),
            Err(sqlx::Error::PoolClosed),
        );

        //* Then
        assert!(
            matches!(
                &err,
                CreateChildError::Rename { database, source: sqlx::Error::Protocol(msg), .. }
                    if database == "orders" && msg == "rename rejected"
            ),
            "expected rename error, got {err:?}"
        );
        let cleanup = err
            .cleanup_failure()
            .expect("failed cleanup must be attached");
        assert_eq!(cleanup.temp_database, temp_database);
        assert!(matches!(cleanup.source, sqlx::Error::PoolClosed));
    }

    #[test]
    fn rename_failure_with_successful_cleanup_has_no_cleanup_failure() {
        let err = rename_failure(
            "orders".to_string(),
            sqlx::Error::PoolClosed,
            SafeNameGenerator::new().next(),
            Ok(()),
        );

        assert!(matches!(err, CreateChildError::Rename { .. }));
        assert!(err.cleanup_failure().is_none());
    }
}
