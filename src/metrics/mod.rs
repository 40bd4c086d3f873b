//! Sample recording, streaming latency histograms, and the run summary.
mod aggregator;
mod histogram;
mod types;


pub use aggregator::Aggregator;
pub use histogram::LatencyHistogram;
pub use types::{
    ErrorCounts, LatencyStats, Outcome, RateStats, RequestErrorKind, RequestRecord, Sample,
    StatusCounts, Summary, Throughput,
};
