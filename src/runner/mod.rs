//! Run lifecycle: startup, the timed or counted run, draining, and the
//! final summary.
mod budget;
mod startup;


use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout_at};
use tracing::{debug, info, warn};

use crate::domain::{RunBound, RunConfig};
use crate::error::EngineError;
use crate::http::{ConnectionContext, Connector, Worker, WorkerReport, WorkerShared, connector_for};
use crate::metrics::{Aggregator, Summary};
use crate::shutdown::{StopTrigger, stop_channel};

pub use budget::RequestBudget;

const RATE_TICK: Duration = Duration::from_secs(1);
/// Extra time granted to workers past the drain deadline before they are
/// aborted.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Starting,
    Running,
    Draining,
    Finished,
}

impl RunState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Draining => "draining",
            RunState::Finished => "finished",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    DurationElapsed,
    BudgetExhausted,
    Bailout,
    Requested,
    WorkersDone,
}

impl StopReason {
    const fn as_str(self) -> &'static str {
        match self {
            StopReason::DurationElapsed => "duration elapsed",
            StopReason::BudgetExhausted => "request budget reserved",
            StopReason::Bailout => "bailout error threshold reached",
            StopReason::Requested => "stop requested",
            StopReason::WorkersDone => "no connection can dispatch",
        }
    }
}

/// Owns one run from `Idle` to `Finished`.
#[derive(Debug)]
pub struct Runner {
    config: Arc<RunConfig>,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<RunState>,
    trigger: StopTrigger,
}

impl Runner {
    /// Creates a runner that connects over TCP, or the configured Unix
    /// socket.
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        let connector: Arc<dyn Connector> = Arc::from(connector_for(config.target()));
        Self::with_connector(config, connector)
    }

    #[must_use]
    pub fn with_connector(config: RunConfig, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _state_rx) = watch::channel(RunState::Idle);
        Self {
            config: Arc::new(config),
            connector,
            state_tx,
            trigger: StopTrigger::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    /// Handle that ends the running phase early; in-flight requests still
    /// drain.
    #[must_use]
    pub fn stop_trigger(&self) -> StopTrigger {
        self.trigger.clone()
    }

    /// Runs to completion on a background task.
    #[must_use]
    pub fn spawn(self) -> RunnerHandle {
        let state_rx = self.state();
        let trigger = self.stop_trigger();
        let task = tokio::spawn(self.run());
        RunnerHandle {
            task,
            state_rx,
            trigger,
        }
    }

    /// Executes the run and returns its summary.
    ///
    /// # Errors
    ///
    /// Returns a startup error when too few connections open, or an engine
    /// error when a worker task fails or the summary cannot be built.
    pub async fn run(self) -> Result<Summary, EngineError> {
        let result = self.execute().await;
        self.state_tx.send_replace(RunState::Finished);
        result
    }

    async fn execute(&self) -> Result<Summary, EngineError> {
        let config = Arc::clone(&self.config);
        self.state_tx.send_replace(RunState::Starting);
        info!(
            "Starting run against {} with {} connection(s), {} worker(s), pipelining {}.",
            config.target().url(),
            config.connections(),
            config.workers(),
            config.pipelining()
        );

        let aggregator = Arc::new(Aggregator::new(&config)?);
        let context = Arc::new(ConnectionContext::new(&config, Arc::clone(&self.connector)));
        let opened = startup::open_connections(&config, &context).await?;
        for _ in 0..opened.failed {
            aggregator.record_abandoned();
        }

        let budget = Arc::new(RequestBudget::for_bound(config.bound()));
        let shared = WorkerShared {
            aggregator: Arc::clone(&aggregator),
            budget: Arc::clone(&budget),
            max_connection_requests: config.max_connection_requests(),
        };
        let (stop_tx, stop_rx) = stop_channel();

        self.state_tx.send_replace(RunState::Running);
        let started = Instant::now();
        let handles: Vec<JoinHandle<WorkerReport>> = opened
            .pools
            .into_iter()
            .enumerate()
            .map(|(index, pool)| {
                let worker = Worker::new(index, pool, shared.clone());
                tokio::spawn(worker.run(stop_rx.clone()))
            })
            .collect();
        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let mut workers_done = pin!(join_all(handles));

        let bound_elapsed = async {
            match config.bound() {
                RunBound::Duration(duration) => sleep(duration).await,
                RunBound::Requests(_) => std::future::pending::<()>().await,
            }
        };
        let mut bound_elapsed = pin!(bound_elapsed);
        let first_tick = started.checked_add(RATE_TICK).unwrap_or(started);
        let mut ticker = interval_at(first_tick, RATE_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_completed = 0u64;

        let (reason, early_results) = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let completed = aggregator.completed();
                    aggregator.record_rate_sample(completed.saturating_sub(last_completed));
                    last_completed = completed;
                }
                () = &mut bound_elapsed => break (StopReason::DurationElapsed, None),
                () = budget.exhausted() => break (StopReason::BudgetExhausted, None),
                () = aggregator.bailout_reached() => break (StopReason::Bailout, None),
                () = self.trigger.triggered() => break (StopReason::Requested, None),
                results = &mut workers_done => break (StopReason::WorkersDone, Some(results)),
            }
        };

        let drain_deadline = Instant::now()
            .checked_add(config.drain_timeout())
            .unwrap_or_else(Instant::now);
        self.state_tx.send_replace(RunState::Draining);
        stop_tx.send_replace(Some(drain_deadline));
        info!(
            "Running phase over after {}ms ({}); draining.",
            started.elapsed().as_millis(),
            reason.as_str()
        );

        let results = match early_results {
            Some(results) => results,
            None => {
                let hard_deadline = drain_deadline
                    .checked_add(DRAIN_GRACE)
                    .unwrap_or(drain_deadline);
                match timeout_at(hard_deadline, &mut workers_done).await {
                    Ok(results) => results,
                    Err(_elapsed) => {
                        warn!("Workers did not drain in time; aborting them.");
                        for handle in &abort_handles {
                            handle.abort();
                        }
                        workers_done.await
                    }
                }
            }
        };

        let mut dispatched = 0u64;
        for (worker, result) in results.into_iter().enumerate() {
            match result {
                Ok(report) => dispatched = dispatched.saturating_add(report.dispatched),
                Err(err) if err.is_cancelled() => {
                    warn!("Worker {} was aborted during drain.", worker);
                }
                Err(source) => return Err(EngineError::WorkerJoin { worker, source }),
            }
        }
        debug!(
            "All workers finished; {} request(s) dispatched, {} recorded.",
            dispatched,
            aggregator.completed()
        );

        self.state_tx.send_replace(RunState::Finished);
        aggregator.seal();
        let summary = aggregator.finalize()?;
        info!(
            "Run finished: {} request(s), {} error(s) in {}ms.",
            summary.total_requests, summary.errors.total, summary.duration_ms
        );
        Ok(summary)
    }
}

/// A run executing on a background task.
#[derive(Debug)]
pub struct RunnerHandle {
    task: JoinHandle<Result<Summary, EngineError>>,
    state_rx: watch::Receiver<RunState>,
    trigger: StopTrigger,
}

impl RunnerHandle {
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state_rx.clone()
    }

    /// Ends the running phase early; in-flight requests still drain.
    pub fn stop(&self) {
        self.trigger.trigger();
    }

    /// Waits for the run and returns its summary.
    ///
    /// # Errors
    ///
    /// Returns the run's error, or a join error if the run task panicked.
    pub async fn wait(self) -> Result<Summary, EngineError> {
        self.task
            .await
            .map_err(|source| EngineError::RunnerJoin { source })?
    }
}
