use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::WriteError;
use crate::metrics::{Aggregator, RequestErrorKind, Sample};
use crate::runner::RequestBudget;
use crate::shutdown::{StopReceiver, drain_deadline};

use super::connection::{Connection, ConnectionState};

/// Upper bound on how long a connection waits before re-checking the stop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared handles a worker drives its connections with.
#[derive(Debug, Clone)]
pub struct WorkerShared {
    pub aggregator: Arc<Aggregator>,
    pub budget: Arc<RequestBudget>,
    pub max_connection_requests: Option<u64>,
}

/// What one worker did over the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub connections: usize,
    pub dispatched: u64,
    pub recorded: u64,
    pub abandoned: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct ConnectionReport {
    dispatched: u64,
    recorded: u64,
    abandoned: bool,
}

/// One logical client owning a pool of connections.
#[derive(Debug)]
pub struct Worker {
    index: usize,
    connections: Vec<Connection>,
    shared: WorkerShared,
}

impl Worker {
    #[must_use]
    pub const fn new(index: usize, connections: Vec<Connection>, shared: WorkerShared) -> Self {
        Self {
            index,
            connections,
            shared,
        }
    }

    /// Drives every connection until the stop is broadcast and all in-flight
    /// requests have resolved or the drain deadline has passed.
    pub async fn run(self, stop_rx: StopReceiver) -> WorkerReport {
        let Self {
            index,
            connections,
            shared,
        } = self;
        let pool = connections.len();
        debug!("Worker {} driving {} connection(s).", index, pool);

        let drivers = connections
            .into_iter()
            .map(|connection| drive_connection(connection, &shared, stop_rx.clone()));
        let reports = join_all(drivers).await;

        let mut report = WorkerReport {
            worker: index,
            connections: pool,
            ..WorkerReport::default()
        };
        for connection in reports {
            report.dispatched = report.dispatched.saturating_add(connection.dispatched);
            report.recorded = report.recorded.saturating_add(connection.recorded);
            if connection.abandoned {
                report.abandoned = report.abandoned.saturating_add(1);
            }
        }
        debug!(
            "Worker {} finished: {} dispatched, {} recorded, {} abandoned.",
            index, report.dispatched, report.recorded, report.abandoned
        );
        report
    }
}

async fn drive_connection(
    mut connection: Connection,
    shared: &WorkerShared,
    stop_rx: StopReceiver,
) -> ConnectionReport {
    let mut report = ConnectionReport::default();
    let mut out_of_work = false;

    loop {
        let drain = drain_deadline(&stop_rx);

        if drain.is_none() && !out_of_work {
            out_of_work = fill_pipeline(&mut connection, shared, &mut report).await;
        }

        let now = Instant::now();
        let mut poll_until = now.checked_add(POLL_INTERVAL).unwrap_or(now);
        if let Some(deadline) = drain {
            poll_until = poll_until.min(deadline);
        }
        for record in connection.poll_completions(poll_until).await {
            shared.aggregator.record(Sample::from(record));
            report.recorded = report.recorded.saturating_add(1);
        }

        if connection.state() == ConnectionState::Abandoned {
            for record in connection.expire(RequestErrorKind::ConnectionReset) {
                shared.aggregator.record(Sample::from(record));
                report.recorded = report.recorded.saturating_add(1);
            }
            if let Some(failure) = connection.take_failure() {
                warn!("{}", failure);
            }
            shared.aggregator.record_abandoned();
            report.abandoned = true;
            break;
        }

        let idle = connection.depth() == 0 && !connection.has_completed();
        match drain {
            Some(deadline) => {
                if idle {
                    break;
                }
                if Instant::now() >= deadline {
                    for record in connection.expire(RequestErrorKind::Timeout) {
                        shared.aggregator.record(Sample::from(record));
                        report.recorded = report.recorded.saturating_add(1);
                    }
                    break;
                }
            }
            None => {
                if idle && out_of_work {
                    break;
                }
            }
        }
    }

    report
}

/// Dispatches until the pipeline is full. Returns true when this connection
/// will never be allowed to dispatch again.
async fn fill_pipeline(
    connection: &mut Connection,
    shared: &WorkerShared,
    report: &mut ConnectionReport,
) -> bool {
    while connection.admit() {
        if shared
            .max_connection_requests
            .is_some_and(|cap| connection.issued() >= cap)
        {
            return true;
        }
        if connection.needs_reconnect() {
            match connection.reconnect().await {
                Ok(()) => shared.aggregator.record_reconnect(),
                Err(failure) => {
                    warn!("{}", failure);
                    return true;
                }
            }
        }
        if !shared.budget.try_reserve() {
            return true;
        }
        match connection.send().await {
            Ok(()) => report.dispatched = report.dispatched.saturating_add(1),
            Err(err @ WriteError::Closed { .. }) => {
                debug!("{}", err);
                return false;
            }
            Err(err @ (WriteError::Io { .. } | WriteError::TimedOut { .. })) => {
                report.dispatched = report.dispatched.saturating_add(1);
                debug!("{}", err);
                return false;
            }
        }
    }
    false
}
