use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Why a dispatched request did not complete with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestErrorKind {
    ConnectionReset,
    Write,
    Protocol,
    Timeout,
}

impl RequestErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RequestErrorKind::ConnectionReset => "connection-reset",
            RequestErrorKind::Write => "write",
            RequestErrorKind::Protocol => "protocol",
            RequestErrorKind::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed(RequestErrorKind),
}

impl Outcome {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// One dispatched request, from the moment its bytes are written until it
/// is resolved. Completed exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
    pub worker: usize,
    pub connection: usize,
    pub seq: u64,
    pub sent_at: Instant,
    pub completed_at: Option<Instant>,
    pub response_bytes: u64,
    pub status: Option<u16>,
    pub outcome: Option<Outcome>,
}

impl RequestRecord {
    #[must_use]
    pub const fn dispatched(worker: usize, connection: usize, seq: u64, sent_at: Instant) -> Self {
        Self {
            worker,
            connection,
            seq,
            sent_at,
            completed_at: None,
            response_bytes: 0,
            status: None,
            outcome: None,
        }
    }

    /// Marks the request answered.
    #[must_use]
    pub const fn succeed(mut self, status: u16, response_bytes: u64, at: Instant) -> Self {
        self.completed_at = Some(at);
        self.status = Some(status);
        self.response_bytes = response_bytes;
        self.outcome = Some(Outcome::Success);
        self
    }

    /// Marks the request failed without a (complete) response.
    #[must_use]
    pub const fn fail(mut self, kind: RequestErrorKind, at: Instant) -> Self {
        self.completed_at = Some(at);
        self.outcome = Some(Outcome::Failed(kind));
        self
    }
}

/// Immutable copy of a completed request handed to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub worker: usize,
    pub connection: usize,
    pub seq: u64,
    pub sent_at: Instant,
    pub completed_at: Instant,
    pub latency: Duration,
    pub response_bytes: u64,
    pub status: Option<u16>,
    pub outcome: Outcome,
}

impl From<RequestRecord> for Sample {
    fn from(record: RequestRecord) -> Self {
        let completed_at = record.completed_at.unwrap_or(record.sent_at);
        Self {
            worker: record.worker,
            connection: record.connection,
            seq: record.seq,
            sent_at: record.sent_at,
            completed_at,
            latency: completed_at.saturating_duration_since(record.sent_at),
            response_bytes: record.response_bytes,
            status: record.status,
            outcome: record
                .outcome
                .unwrap_or(Outcome::Failed(RequestErrorKind::Timeout)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounts {
    pub total: u64,
    pub connection_reset: u64,
    pub write: u64,
    pub protocol: u64,
    pub timeout: u64,
}

impl ErrorCounts {
    pub(crate) const fn add(&mut self, kind: RequestErrorKind) {
        self.total = self.total.saturating_add(1);
        match kind {
            RequestErrorKind::ConnectionReset => {
                self.connection_reset = self.connection_reset.saturating_add(1);
            }
            RequestErrorKind::Write => self.write = self.write.saturating_add(1),
            RequestErrorKind::Protocol => self.protocol = self.protocol.saturating_add(1),
            RequestErrorKind::Timeout => self.timeout = self.timeout.saturating_add(1),
        }
    }

    pub(crate) const fn merge(&mut self, other: &ErrorCounts) {
        self.total = self.total.saturating_add(other.total);
        self.connection_reset = self.connection_reset.saturating_add(other.connection_reset);
        self.write = self.write.saturating_add(other.write);
        self.protocol = self.protocol.saturating_add(other.protocol);
        self.timeout = self.timeout.saturating_add(other.timeout);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    #[serde(rename = "1xx")]
    pub informational: u64,
    #[serde(rename = "2xx")]
    pub success: u64,
    #[serde(rename = "3xx")]
    pub redirection: u64,
    #[serde(rename = "4xx")]
    pub client_error: u64,
    #[serde(rename = "5xx")]
    pub server_error: u64,
    pub non_2xx: u64,
}

impl StatusCounts {
    pub(crate) const fn add(&mut self, status: u16) {
        match status {
            100..=199 => self.informational = self.informational.saturating_add(1),
            200..=299 => self.success = self.success.saturating_add(1),
            300..=399 => self.redirection = self.redirection.saturating_add(1),
            400..=499 => self.client_error = self.client_error.saturating_add(1),
            _ => self.server_error = self.server_error.saturating_add(1),
        }
        if !matches!(status, 200..=299) {
            self.non_2xx = self.non_2xx.saturating_add(1);
        }
    }

    pub(crate) const fn merge(&mut self, other: &StatusCounts) {
        self.informational = self.informational.saturating_add(other.informational);
        self.success = self.success.saturating_add(other.success);
        self.redirection = self.redirection.saturating_add(other.redirection);
        self.client_error = self.client_error.saturating_add(other.client_error);
        self.server_error = self.server_error.saturating_add(other.server_error);
        self.non_2xx = self.non_2xx.saturating_add(other.non_2xx);
    }
}

/// Latency statistics of answered requests, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min_us: u64,
    pub mean_us: u64,
    pub stddev_us: u64,
    pub p50_us: u64,
    pub p90_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Mean throughput over the measured window (first dispatch to last
/// completion).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Throughput {
    pub requests_per_sec: u64,
    pub bytes_per_sec: u64,
}

/// Distribution of completed requests per one-second interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateStats {
    pub samples: u64,
    pub mean: u64,
    pub stddev: u64,
    pub min: u64,
    pub max: u64,
}

/// Final statistics of a run, produced once when the run is finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub url: String,
    pub connections: usize,
    pub pipelining: usize,
    pub workers: usize,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub errors: ErrorCounts,
    pub statuses: StatusCounts,
    pub latency: LatencyStats,
    pub throughput: Throughput,
    pub requests_per_second: RateStats,
    pub total_bytes: u64,
    pub reconnects: u64,
    pub abandoned_connections: u64,
    pub histogram: String,
}
