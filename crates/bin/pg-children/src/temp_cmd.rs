use tempdb::{ServerOptions, StartError};

pub async fn run(port: Option<u16>) -> Result<(), Error> {
    let options = ServerOptions {
        port,
        ..ServerOptions::default()
    };
    let (handle, fut) = tempdb::new(options).await.map_err(Error::Start)?;
    let server = tokio::spawn(fut);

    println!("{}", handle.config().to_url());
    tracing::info!(data_dir = %handle.data_dir().display(), "temp server running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.map_err(Error::Signal)?;

    tracing::info!("stopping temp server");
    handle.stop().await;
    if let Err(err) = server.await {
        tracing::warn!(error = %err, "temp server task failed");
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to start temp server")]
    Start(#[source] StartError),

    #[error("Failed to listen for Ctrl-C")]
    Signal(#[source] std::io::Error),
}
