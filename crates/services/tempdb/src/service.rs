use std::{future::Future, path::PathBuf};

use pg_children::{ClientConfig, ReadinessOptions, ReadinessTimeout, UrlError};
use pgtemp::PgTempDBBuilder;
use tokio::sync::mpsc;

use crate::KEEP_TEMP_DIRS;

/// Settings of a throwaway server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Superuser role created by `initdb`
    pub user: String,
    pub password: String,
    /// Database created on startup; becomes the administrative database of the handle's config
    pub database: String,
    /// Port to listen on; `None` picks a free one
    pub port: Option<u16>,
    /// Keep the data directory once the server stops (default: `KEEP_TEMP_DIRS`)
    pub keep_data: bool,
    pub readiness: ReadinessOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: "password".to_string(),
            database: "postgres".to_string(),
            port: None,
            keep_data: *KEEP_TEMP_DIRS,
            readiness: ReadinessOptions::default(),
        }
    }
}

impl ServerOptions {
    /// Options for a server on `port` with credentials derived from `prefix` and the port.
    ///
    /// Servers started from the same prefix on different ports never share names, e.g.
    /// `fixture_19000_user` and `fixture_19001_user`.
    pub fn for_port(prefix: &str, port: u16) -> Self {
        let name = format!("{prefix}_{port}");
        Self {
            user: format!("{name}_user"),
            password: format!("{name}_password"),
            database: format!("{name}_db"),
            port: Some(port),
            ..Self::default()
        }
    }
}

/// Starts a throwaway PostgreSQL server and waits until it answers queries.
///
/// Returns a handle to interact with the server and a future that represents the service
/// lifecycle. The future must be spawned to keep the server running; the server shuts down and
/// its data directory is deleted (unless `keep_data` is set) once the future completes or is
/// dropped.
pub async fn new(
    options: ServerOptions,
) -> Result<(Handle, impl Future<Output = ()>), StartError> {
    let mut builder = PgTempDBBuilder::new()
        .with_username(&options.user)
        .with_password(&options.password)
        .with_dbname(&options.database)
        .with_initdb_arg("locale", "C")
        .persist_data(options.keep_data);
    if let Some(port) = options.port {
        builder = builder.with_port(port);
    }

    // `initdb` and the server start block, and pgtemp panics when either fails
    let pg_temp = tokio::task::spawn_blocking(move || builder.start())
        .await
        .map_err(StartError::Start)?;

    let data_dir = pg_temp.data_dir();
    tracing::info!("initializing temp database at: {}", data_dir.display());

    let config = ClientConfig::from_url(&pg_temp.connection_uri()).map_err(StartError::Url)?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        "temp database started"
    );

    pg_children::wait_for_interactive(&config, options.readiness)
        .await
        .map_err(StartError::NotReady)?;

    let (tx_stop, mut rx_stop) = mpsc::channel(1);

    let handle = Handle {
        config,
        data_dir,
        tx_stop,
    };

    // Future that runs the service
    let fut = async move {
        // Wait for stop signal
        let _ = rx_stop.recv().await;

        // Moving `pg_temp` in here ties the server's lifetime to this future
        drop(pg_temp);
    };

    Ok((handle, fut))
}

/// Handle to interact with a throwaway server
///
/// The server is stopped when this handle is dropped (channel closure signals the service to
/// shut down) or when `stop()` is called.
#[derive(Debug)]
pub struct Handle {
    config: ClientConfig,
    data_dir: PathBuf,
    tx_stop: mpsc::Sender<()>,
}

impl Handle {
    /// Administrative connection settings for the server
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Gets the data directory where PostgreSQL stores its files
    pub fn data_dir(&self) -> &std::path::Path {
        &self.data_dir
    }

    /// Stops the service and waits for the server to shut down
    pub async fn stop(self) {
        if self.tx_stop.is_closed() {
            return;
        }

        let _ = self.tx_stop.send(()).await;

        // Wait for the channel to close
        self.tx_stop.closed().await;
    }
}

/// Errors that can occur when starting a throwaway server
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// `initdb` or the server process failed to start
    #[error("failed to start temp database")]
    Start(#[source] tokio::task::JoinError),

    /// The server reported a connection URI that could not be parsed
    #[error("temp database reported an invalid connection URI")]
    Url(#[source] UrlError),

    /// The server started but never answered queries
    #[error("temp database did not become ready")]
    NotReady(#[source] ReadinessTimeout),
}
