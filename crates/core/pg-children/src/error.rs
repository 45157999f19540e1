//! Error types for child database lifecycle operations

use crate::{SafeName, conn::ConnError};

/// Errors returned by [`ChildrenPool::create_child`](crate::ChildrenPool::create_child)
#[derive(Debug, thiserror::Error)]
pub enum CreateChildError {
    /// The requested name does not fit in a PostgreSQL identifier
    ///
    /// The catalog would silently truncate it, and the child would then not exist under the
    /// requested name.
    #[error("database name is {len} bytes, the limit is {max}")]
    NameTooLong { len: usize, max: usize },

    /// The administrative connection could not be established
    #[error("failed to open administrative connection")]
    Connect(#[source] ConnError),

    /// `CREATE DATABASE` for the temporary name failed; nothing was created
    #[error("failed to create temporary database '{temp_database}'")]
    CreateTemp {
        temp_database: SafeName,
        #[source]
        source: sqlx::Error,
    },

    /// Renaming the temporary database to the requested name failed
    ///
    /// Typically the name is already taken. The temporary database was dropped again unless
    /// `cleanup` carries the failure of that drop.
    #[error("failed to rename temporary database to '{database}'")]
    Rename {
        database: String,
        #[source]
        source: sqlx::Error,
        cleanup: Option<CleanupFailure>,
    },

    /// The catalog sequence was interrupted before it could report back
    #[error("child database creation task did not complete")]
    Interrupted(#[source] tokio::task::JoinError),
}

impl CreateChildError {
    /// The failed best-effort cleanup attached to this error, if any.
    pub fn cleanup_failure(&self) -> Option<&CleanupFailure> {
        match self {
            CreateChildError::Rename { cleanup, .. } => cleanup.as_ref(),
            _ => None,
        }
    }

    /// Whether creation failed because a database with the requested name already exists.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            CreateChildError::Rename { source: sqlx::Error::Database(err), .. }
                if err.code().is_some_and(|code| code == "23505")
        )
    }
}

/// A best-effort drop of a temporary database failed.
///
/// Never returned on its own; it is attached to the [`CreateChildError`] that triggered the
/// cleanup. The database named `temp_database` is still on the server.
#[derive(Debug, thiserror::Error)]
#[error("failed to drop temporary database '{temp_database}' during cleanup")]
pub struct CleanupFailure {
    pub temp_database: SafeName,
    #[source]
    pub source: sqlx::Error,
}

/// Errors returned by [`ChildrenPool::remove_child`](crate::ChildrenPool::remove_child)
#[derive(Debug, thiserror::Error)]
pub enum RemoveChildError {
    /// The administrative connection could not be established
    #[error("failed to open administrative connection")]
    Connect(#[source] ConnError),

    /// No database with the handle's name exists
    #[error("database '{database}' does not exist")]
    NotFound { database: String },

    /// Renaming the child to its temporary name failed; the child is untouched
    #[error("failed to rename database '{database}' to a temporary name")]
    Rename {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    /// `DROP DATABASE` failed and the child was renamed back to its original name
    #[error("failed to drop database '{database}', it was restored")]
    Drop {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    /// The child is stranded under a temporary name and needs manual intervention
    #[error(transparent)]
    Leak(#[from] LeakFailure),

    /// The catalog sequence was interrupted before it could report back
    #[error("child database removal task did not complete")]
    Interrupted(#[source] tokio::task::JoinError),
}

impl RemoveChildError {
    /// Whether the child was left under a temporary name.
    pub fn is_leak(&self) -> bool {
        matches!(self, RemoveChildError::Leak(_))
    }
}

/// Dropping a child failed and renaming it back failed too.
///
/// The database still exists, but under `temp_database` instead of `database`. Rename it back
/// or drop it by hand.
#[derive(Debug, thiserror::Error)]
#[error(
    "database '{database}' is stranded as '{temp_database}': drop failed and it could not be renamed back"
)]
pub struct LeakFailure {
    pub database: String,
    pub temp_database: SafeName,
    /// Why the drop failed
    #[source]
    pub drop_error: sqlx::Error,
    /// Why the rename back failed; `None` when the temporary name no longer matched any database
    pub rollback_error: Option<sqlx::Error>,
}

/// Errors returned by [`ChildrenPool::use_child`](crate::ChildrenPool::use_child)
///
/// `T` is the action's success value, `E` its error.
#[derive(Debug, thiserror::Error)]
pub enum UseChildError<T, E> {
    /// The child could not be created; the action did not run
    #[error("failed to create child database")]
    Create(#[source] CreateChildError),

    /// The action failed
    ///
    /// `removal` carries the removal failure when the child could not be removed afterwards.
    #[error("child database action failed")]
    Action {
        #[source]
        source: E,
        removal: Option<RemoveChildError>,
    },

    /// The action succeeded but the child could not be removed
    ///
    /// `value` is what the action returned.
    #[error("failed to remove child database")]
    Remove {
        value: T,
        #[source]
        source: RemoveChildError,
    },
}

impl<T, E> UseChildError<T, E> {
    /// The removal failure, whether it is the primary error or attached to an action failure.
    pub fn removal_failure(&self) -> Option<&RemoveChildError> {
        match self {
            UseChildError::Create(_) => None,
            UseChildError::Action { removal, .. } => removal.as_ref(),
            UseChildError::Remove { source, .. } => Some(source),
        }
    }
}
