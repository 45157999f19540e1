//! Waiting for a freshly started server to become interactive

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use backon::{ConstantBuilder, Retryable};
use tokio::time::Instant;

use crate::{ClientConfig, Connection, conn::ConnError};

/// Overall time budget for the server to answer (30 seconds).
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between two probes.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(333);

/// Readiness polling settings.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessOptions {
    pub timeout: Duration,
    pub retry_interval: Duration,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_READINESS_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Blocks until the server behind `config` accepts a connection and answers `SELECT 1`.
///
/// Every connection or query failure counts as "not ready yet" and is retried after
/// `retry_interval`. Once `timeout` has elapsed the wait is abandoned with [`ReadinessTimeout`],
/// carrying the error of the last probe.
#[tracing::instrument(skip_all, fields(host = %config.host, port = config.port), err)]
pub async fn wait_for_interactive(
    config: &ClientConfig,
    options: ReadinessOptions,
) -> Result<(), ReadinessTimeout> {
    let deadline = Instant::now() + options.timeout;
    let start = Instant::now();

    // The retry count only bounds the loop; the deadline below is what ends it.
    let max_times = (options.timeout.as_millis() / options.retry_interval.as_millis().max(1))
        as usize
        + 1;
    let backoff = ConstantBuilder::default()
        .with_delay(options.retry_interval)
        .with_max_times(max_times);

    // Probe errors are kept here rather than returned; the deadline usually cancels the retry
    // loop before it gives up on its own.
    let last_error = Mutex::new(None);
    let slot = &last_error;
    let probes = (|| async move {
        probe(config, deadline).await.map_err(|err| {
            tracing::debug!(error = %err, "server not ready");
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        })
    })
    .retry(backoff)
    .notify(|_: &(), dur: Duration| {
        tracing::trace!(
            retry_after_ms = dur.as_millis() as u64,
            "retrying readiness probe"
        );
    });

    if let Ok(Ok(())) = tokio::time::timeout_at(deadline, probes).await {
        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "server is accepting queries"
        );
        return Ok(());
    }

    let last_error = last_error
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    Err(ReadinessTimeout {
        timeout: options.timeout,
        last_error,
    })
}

async fn probe(config: &ClientConfig, deadline: Instant) -> Result<(), ProbeError> {
    let mut conn = Connection::connect(config, deadline)
        .await
        .map_err(ProbeError::Connect)?;

    let result = sqlx::query_scalar::<_, i32>("SELECT 1 AS one")
        .fetch_one(&mut *conn)
        .await;

    if let Err(err) = conn.close().await {
        tracing::trace!(error = %err, "failed to close probe connection");
    }

    match result {
        Ok(1) => Ok(()),
        Ok(other) => Err(ProbeError::UnexpectedResult(other)),
        Err(err) => Err(ProbeError::Query(err)),
    }
}

/// The server did not become interactive in time.
#[derive(Debug, thiserror::Error)]
#[error("server did not become ready within {timeout:?}")]
pub struct ReadinessTimeout {
    pub timeout: Duration,
    /// Failure of the last completed probe, if any probe completed
    #[source]
    pub last_error: Option<ProbeError>,
}

/// Why a single readiness probe failed
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connection failed")]
    Connect(#[source] ConnError),

    #[error("probe query failed")]
    Query(#[source] sqlx::Error),

    #[error("probe query returned {0} instead of 1")]
    UnexpectedResult(i32),
}
