use std::io;

use thiserror::Error;

use super::{FinalizeError, MetricsError};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("No addresses resolved for {target}.")]
    NoAddresses { target: String },
    #[error("Failed to connect to {target}: {source}")]
    Io {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("Timed out connecting to {target} after {timeout_ms}ms.")]
    TimedOut { target: String, timeout_ms: u64 },
    #[error("Unix sockets are not supported on this platform.")]
    UnixSocketUnsupported,
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Connection {connection} is closed.")]
    Closed { connection: usize },
    #[error("Write on connection {connection} failed: {source}")]
    Io {
        connection: usize,
        #[source]
        source: io::Error,
    },
    #[error("Write on connection {connection} timed out after {timeout_ms}ms.")]
    TimedOut { connection: usize, timeout_ms: u64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolationError {
    #[error("Malformed status line.")]
    MalformedStatusLine,
    #[error("Malformed header line.")]
    MalformedHeader,
    #[error("Invalid Content-Length '{value}'.")]
    InvalidContentLength { value: String },
    #[error("Malformed chunk framing.")]
    MalformedChunk,
    #[error("Response head exceeds {limit} bytes.")]
    HeadTooLarge { limit: usize },
    #[error("Protocol switch (status 101) is not supported.")]
    SwitchingProtocols,
    #[error("Response received with no request in flight.")]
    UnsolicitedResponse,
    #[error("Response is missing the '{header}' correlation header.")]
    MissingCorrelationId { header: String },
    #[error("Correlation id '{value}' is not a request sequence number.")]
    InvalidCorrelationId { value: String },
    #[error("Response for correlation id {id} matches no pending request.")]
    UnmatchedCorrelationId { id: u64 },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("No response on connection {connection} within {timeout_ms}ms.")]
pub struct TimeoutError {
    pub connection: usize,
    pub timeout_ms: u64,
}

/// Reasons a connection stops being used for the rest of a run.
#[derive(Debug, Error)]
pub enum ConnectionFailure {
    #[error("Connection {connection} abandoned after failed reconnect: {source}")]
    ReconnectFailed {
        connection: usize,
        #[source]
        source: ConnectError,
    },
    #[error("Connection {connection} abandoned after protocol violation: {source}")]
    Protocol {
        connection: usize,
        #[source]
        source: ProtocolViolationError,
    },
    #[error("Connection {connection} is already abandoned.")]
    Abandoned { connection: usize },
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(
        "Only {opened} of {requested} connections opened (minimum {minimum}); last error: {last_error}"
    )]
    InsufficientConnections {
        opened: usize,
        requested: usize,
        minimum: usize,
        last_error: String,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Startup failed: {0}")]
    Startup(#[from] StartupError),
    #[error("Finalize failed: {0}")]
    Finalize(#[from] FinalizeError),
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
    #[error("Worker {worker} did not complete: {source}")]
    WorkerJoin {
        worker: usize,
        #[source]
        source: tokio::task::JoinError,
    },
    #[error("Runner task did not complete: {source}")]
    RunnerJoin {
        #[source]
        source: tokio::task::JoinError,
    },
}
