//! Core library for the `volley` HTTP/1.1 load generator.
//!
//! A [`runner::Runner`] opens a pool of keep-alive connections, splits them
//! across worker tasks, and keeps up to `pipelining` requests outstanding on
//! each one until the run's duration or request budget is spent. Every
//! completed request is folded into a streaming latency histogram by
//! [`metrics::Aggregator`], and the run ends with a [`metrics::Summary`].
//!
//! The `volley` binary wraps this engine with a command line, an optional
//! config file, and text or JSON output.
pub mod args;
pub mod config;
pub mod domain;
pub mod entry;
pub mod error;
pub mod http;
pub mod logger;
pub mod metrics;
pub mod runner;
pub mod shutdown;
pub mod sinks;

#[cfg(feature = "fuzzing")]
pub mod fuzzing;
