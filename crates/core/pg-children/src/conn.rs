//! Deadline-bounded connections to the server

use sqlx::{Connection as _, PgConnection};
use tokio::time::Instant;

use crate::ClientConfig;

/// A dedicated connection to one database of the server.
#[derive(Debug)]
pub struct Connection(PgConnection);

impl Connection {
    /// Connects to `config.database`, failing once `deadline` has passed.
    ///
    /// An already expired deadline fails immediately without touching the network.
    #[tracing::instrument(skip_all, fields(database = %config.database), err)]
    pub async fn connect(config: &ClientConfig, deadline: Instant) -> Result<Self, ConnError> {
        if Instant::now() >= deadline {
            return Err(ConnError::DeadlineExceeded);
        }

        let options = config.connect_options();
        match tokio::time::timeout_at(deadline, PgConnection::connect_with(&options)).await {
            Ok(Ok(conn)) => Ok(Self(conn)),
            Ok(Err(err)) => Err(ConnError::ConnectionError(err)),
            Err(_elapsed) => Err(ConnError::DeadlineExceeded),
        }
    }

    /// Sends a graceful `Terminate` and closes the socket.
    pub async fn close(self) -> Result<(), sqlx::Error> {
        self.0.close().await
    }
}

impl std::ops::Deref for Connection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for Connection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Errors that can occur when connecting to the server.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// The server refused or dropped the connection (network, auth, missing database)
    #[error("Error connecting to database: {0}")]
    ConnectionError(#[source] sqlx::Error),

    /// The connect deadline passed before the connection was established
    #[error("Connection deadline exceeded")]
    DeadlineExceeded,
}

impl ConnError {
    /// Whether the server reported that the target database does not exist (`3D000`).
    pub fn is_unknown_database(&self) -> bool {
        matches!(
            self,
            ConnError::ConnectionError(sqlx::Error::Database(err))
                if err.code().is_some_and(|code| code == "3D000")
        )
    }
}
