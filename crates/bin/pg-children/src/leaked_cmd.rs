use pg_children::{ConnError, Connection, catalog};
use pg_children_config::Config;

pub async fn run(config: &Config) -> Result<(), Error> {
    let mut conn = Connection::connect(&config.admin, config.admin.connect_deadline())
        .await
        .map_err(Error::Connect)?;

    let names = catalog::list_temp_databases(&mut conn)
        .await
        .map_err(Error::Query);
    if let Err(err) = conn.close().await {
        tracing::warn!(error = %err, "failed to close administrative connection");
    }

    for name in names? {
        println!("{name}");
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to connect to the server")]
    Connect(#[source] ConnError),

    #[error("Failed to list temporary databases")]
    Query(#[source] sqlx::Error),
}
