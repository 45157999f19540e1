use std::time::Duration;

use pg_children::{ReadinessOptions, ReadinessTimeout};
use pg_children_config::Config;

pub async fn run(config: &Config, timeout: Duration) -> Result<(), ReadinessTimeout> {
    let options = ReadinessOptions {
        timeout,
        ..ReadinessOptions::default()
    };
    pg_children::wait_for_interactive(&config.admin, options).await?;

    tracing::info!(host = %config.admin.host, port = config.admin.port, "server is ready");
    Ok(())
}
