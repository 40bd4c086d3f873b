use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use crate::domain::RunConfig;
use crate::error::{FinalizeError, MetricsError};

use super::histogram::LatencyHistogram;
use super::types::{
    ErrorCounts, LatencyStats, Outcome, RateStats, Sample, StatusCounts, Summary, Throughput,
};

const MICROS_PER_SEC: u128 = 1_000_000;

/// Per-worker accumulation. Each worker writes to its own shard, so the lock
/// is uncontended during the run.
#[derive(Debug)]
struct Shard {
    histogram: LatencyHistogram,
    total: u64,
    successful: u64,
    errors: ErrorCounts,
    statuses: StatusCounts,
    bytes: u64,
    first_dispatch: Option<Instant>,
    last_completion: Option<Instant>,
}

impl Shard {
    fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            histogram: LatencyHistogram::new()?,
            total: 0,
            successful: 0,
            errors: ErrorCounts::default(),
            statuses: StatusCounts::default(),
            bytes: 0,
            first_dispatch: None,
            last_completion: None,
        })
    }

    fn absorb(&mut self, sample: &Sample) {
        self.total = self.total.saturating_add(1);
        self.bytes = self.bytes.saturating_add(sample.response_bytes);
        self.first_dispatch = Some(
            self.first_dispatch
                .map_or(sample.sent_at, |first| first.min(sample.sent_at)),
        );
        self.last_completion = Some(
            self.last_completion
                .map_or(sample.completed_at, |last| last.max(sample.completed_at)),
        );

        match sample.outcome {
            Outcome::Success => {
                self.successful = self.successful.saturating_add(1);
                let latency_us = u64::try_from(sample.latency.as_micros()).unwrap_or(u64::MAX);
                if let Err(err) = self.histogram.record(latency_us) {
                    warn!("Dropping latency sample: {}", err);
                }
                if let Some(status) = sample.status {
                    self.statuses.add(status);
                }
            }
            Outcome::Failed(kind) => self.errors.add(kind),
        }
    }
}

/// Run parameters echoed into the summary.
#[derive(Debug, Clone)]
struct RunInfo {
    url: String,
    connections: usize,
    pipelining: usize,
    workers: usize,
}

/// Collects samples from every worker and produces the run summary.
///
/// `record` takes `&self` and only touches the shard belonging to the
/// sample's worker plus a few atomics, so workers never wait on each other.
#[derive(Debug)]
pub struct Aggregator {
    info: RunInfo,
    shards: Vec<Mutex<Shard>>,
    completed: AtomicU64,
    errors: AtomicU64,
    reconnects: AtomicU64,
    abandoned: AtomicU64,
    bailout: Option<u64>,
    bailout_hit: Notify,
    rate_samples: Mutex<Vec<u64>>,
    started_at: DateTime<Utc>,
    finished_at: OnceLock<DateTime<Utc>>,
    sealed: AtomicBool,
    finalized: AtomicBool,
}

impl Aggregator {
    /// Creates an aggregator with one shard per worker of `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a histogram cannot be allocated.
    pub fn new(config: &RunConfig) -> Result<Self, MetricsError> {
        let mut shards = Vec::with_capacity(config.workers());
        for _ in 0..config.workers().max(1) {
            shards.push(Mutex::new(Shard::new()?));
        }
        Ok(Self {
            info: RunInfo {
                url: config.target().url().to_owned(),
                connections: config.connections(),
                pipelining: config.pipelining(),
                workers: config.workers(),
            },
            shards,
            completed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            bailout: config.bailout(),
            bailout_hit: Notify::new(),
            rate_samples: Mutex::new(Vec::new()),
            started_at: Utc::now(),
            finished_at: OnceLock::new(),
            sealed: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
        })
    }

    pub fn record(&self, sample: Sample) {
        let index = sample.worker.checked_rem(self.shards.len()).unwrap_or(0);
        if let Some(shard) = self.shards.get(index) {
            shard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .absorb(&sample);
        }
        self.completed.fetch_add(1, Ordering::Relaxed);

        if !sample.outcome.is_success() {
            let errors = self.errors.fetch_add(1, Ordering::Relaxed).saturating_add(1);
            if self.bailout == Some(errors) {
                self.bailout_hit.notify_one();
            }
        }
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Stores the number of requests completed during one second of the run.
    pub fn record_rate_sample(&self, completed_in_interval: u64) {
        self.rate_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(completed_in_interval);
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Resolves once the configured bailout error count is reached; never
    /// resolves when no bailout is configured.
    pub async fn bailout_reached(&self) {
        let Some(limit) = self.bailout else {
            return std::future::pending().await;
        };
        if self.errors() >= limit {
            return;
        }
        self.bailout_hit.notified().await;
    }

    /// Marks the run finished; only afterwards can [`Aggregator::finalize`]
    /// succeed.
    pub fn seal(&self) {
        if self.finished_at.set(Utc::now()).is_err() {
            warn!("Aggregator sealed more than once.");
        }
        self.sealed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Builds the summary. Succeeds exactly once, after [`Aggregator::seal`].
    ///
    /// # Errors
    ///
    /// Returns `RunNotFinished` before the run is sealed, `AlreadyFinalized`
    /// on any call after the first, or a metrics error if histograms cannot
    /// be merged.
    pub fn finalize(&self) -> Result<Summary, FinalizeError> {
        if !self.is_sealed() {
            return Err(FinalizeError::RunNotFinished);
        }
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Err(FinalizeError::AlreadyFinalized);
        }

        let mut histogram = LatencyHistogram::new()?;
        let mut total = 0u64;
        let mut successful = 0u64;
        let mut errors = ErrorCounts::default();
        let mut statuses = StatusCounts::default();
        let mut bytes = 0u64;
        let mut first_dispatch: Option<Instant> = None;
        let mut last_completion: Option<Instant> = None;

        for shard in &self.shards {
            let shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            histogram.merge(&shard.histogram)?;
            total = total.saturating_add(shard.total);
            successful = successful.saturating_add(shard.successful);
            errors.merge(&shard.errors);
            statuses.merge(&shard.statuses);
            bytes = bytes.saturating_add(shard.bytes);
            first_dispatch = earliest(first_dispatch, shard.first_dispatch);
            last_completion = latest(last_completion, shard.last_completion);
        }

        let window = match (first_dispatch, last_completion) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            (Some(_), None) | (None, Some(_)) | (None, None) => Duration::ZERO,
        };

        let (p50_us, p90_us, p99_us) = histogram.percentiles();
        let (mean_us, stddev_us) = histogram.mean_and_stddev();
        let rate_samples = self
            .rate_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let finished_at = self.finished_at.get().copied().unwrap_or_else(Utc::now);

        Ok(Summary {
            url: self.info.url.clone(),
            connections: self.info.connections,
            pipelining: self.info.pipelining,
            workers: self.info.workers,
            started_at: self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            finished_at: finished_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            total_requests: total,
            successful_requests: successful,
            errors,
            statuses,
            latency: LatencyStats {
                min_us: histogram.min(),
                mean_us,
                stddev_us,
                p50_us,
                p90_us,
                p99_us,
                max_us: histogram.max(),
            },
            throughput: Throughput {
                requests_per_sec: per_second(total, window),
                bytes_per_sec: per_second(bytes, window),
            },
            requests_per_second: rate_stats(&rate_samples),
            total_bytes: bytes,
            reconnects: self.reconnects.load(Ordering::Relaxed),
            abandoned_connections: self.abandoned.load(Ordering::Relaxed),
            histogram: histogram.encode_base64()?,
        })
    }
}

fn earliest(current: Option<Instant>, candidate: Option<Instant>) -> Option<Instant> {
    match (current, candidate) {
        (Some(current), Some(candidate)) => Some(current.min(candidate)),
        (Some(value), None) | (None, Some(value)) => Some(value),
        (None, None) => None,
    }
}

fn latest(current: Option<Instant>, candidate: Option<Instant>) -> Option<Instant> {
    match (current, candidate) {
        (Some(current), Some(candidate)) => Some(current.max(candidate)),
        (Some(value), None) | (None, Some(value)) => Some(value),
        (None, None) => None,
    }
}

pub(crate) fn per_second(count: u64, window: Duration) -> u64 {
    let micros = window.as_micros();
    if micros == 0 {
        return 0;
    }
    let scaled = u128::from(count)
        .saturating_mul(MICROS_PER_SEC)
        .checked_div(micros)
        .unwrap_or(0);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

pub(crate) fn rate_stats(samples: &[u64]) -> RateStats {
    let count = u64::try_from(samples.len()).unwrap_or(u64::MAX);
    if count == 0 {
        return RateStats::default();
    }
    let sum = samples
        .iter()
        .fold(0u128, |acc, value| acc.saturating_add(u128::from(*value)));
    let mean = sum.checked_div(u128::from(count)).unwrap_or(0);
    let squared = samples.iter().fold(0u128, |acc, value| {
        let delta = u128::from(*value).abs_diff(mean);
        acc.saturating_add(delta.saturating_mul(delta))
    });
    let variance = squared.checked_div(u128::from(count)).unwrap_or(0);

    RateStats {
        samples: count,
        mean: u64::try_from(mean).unwrap_or(u64::MAX),
        stddev: u64::try_from(variance.isqrt()).unwrap_or(u64::MAX),
        min: samples.iter().copied().min().unwrap_or(0),
        max: samples.iter().copied().max().unwrap_or(0),
    }
}
