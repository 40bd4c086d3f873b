mod app;
mod config;
mod engine;
mod metrics;
mod sink;
#[cfg(test)]
mod test_support;
mod validation;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use engine::{
    ConnectError, ConnectionFailure, EngineError, ProtocolViolationError, StartupError,
    TimeoutError, WriteError,
};
pub use metrics::{FinalizeError, MetricsError};
pub use sink::SinkError;
pub use validation::ValidationError;
