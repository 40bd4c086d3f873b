use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::RunConfig;
use crate::error::{ConnectError, StartupError};
use crate::http::{Connection, ConnectionContext};

/// Pause before retry `n` is `n` times this, capped at [`MAX_RETRY_BACKOFF`].
const RETRY_BACKOFF_STEP: Duration = Duration::from_millis(50);
const MAX_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Connections opened during startup, grouped by owning worker.
#[derive(Debug)]
pub(super) struct OpenedPools {
    pub(super) pools: Vec<Vec<Connection>>,
    pub(super) failed: usize,
}

/// Index of the worker that owns each connection, in connection order.
pub(super) fn worker_assignments(config: &RunConfig) -> Vec<usize> {
    (0..config.workers())
        .flat_map(|worker| std::iter::repeat_n(worker, config.connections_for_worker(worker)))
        .collect()
}

/// Opens every connection in parallel, retrying each one.
///
/// # Errors
///
/// Returns a startup error when fewer than the configured minimum open.
pub(super) async fn open_connections(
    config: &RunConfig,
    context: &Arc<ConnectionContext>,
) -> Result<OpenedPools, StartupError> {
    let assignments = worker_assignments(config);
    let attempts = assignments
        .iter()
        .enumerate()
        .map(|(index, worker)| open_with_retries(index, *worker, context, config.connect_retries()));
    let results = join_all(attempts).await;

    let mut pools: Vec<Vec<Connection>> = (0..config.workers()).map(|_| Vec::new()).collect();
    let mut opened = 0usize;
    let mut failed = 0usize;
    let mut last_error: Option<ConnectError> = None;
    for result in results {
        match result {
            Ok(connection) => {
                opened = opened.saturating_add(1);
                if let Some(pool) = pools.get_mut(connection.worker()) {
                    pool.push(connection);
                }
            }
            Err(err) => {
                failed = failed.saturating_add(1);
                last_error = Some(err);
            }
        }
    }

    if opened < config.min_connections() || opened == 0 {
        return Err(StartupError::InsufficientConnections {
            opened,
            requested: config.connections(),
            minimum: config.min_connections(),
            last_error: last_error.map_or_else(|| "none".to_owned(), |err| err.to_string()),
        });
    }
    if let Some(err) = last_error {
        warn!(
            "{} of {} connections failed to open; continuing. Last error: {}",
            failed,
            config.connections(),
            err
        );
    }
    debug!("Opened {} connection(s) to {}.", opened, context.connector().describe());
    Ok(OpenedPools { pools, failed })
}

async fn open_with_retries(
    index: usize,
    worker: usize,
    context: &Arc<ConnectionContext>,
    retries: usize,
) -> Result<Connection, ConnectError> {
    let mut attempt = 0usize;
    loop {
        match Connection::open(index, worker, Arc::clone(context)).await {
            Ok(connection) => return Ok(connection),
            Err(err) if attempt < retries => {
                attempt = attempt.saturating_add(1);
                debug!(
                    "Connection {} attempt {} failed: {}; retrying.",
                    index, attempt, err
                );
                let backoff = RETRY_BACKOFF_STEP
                    .saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
                    .min(MAX_RETRY_BACKOFF);
                sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}
