//! Run parameters shared by the engine, the CLI, and the config layer.
pub mod run;


pub use run::{
    DEFAULT_CONNECTIONS, DEFAULT_CONNECT_RETRIES, DEFAULT_CORRELATION_HEADER,
    DEFAULT_DRAIN_TIMEOUT, DEFAULT_DURATION, DEFAULT_IO_TIMEOUT, DEFAULT_PIPELINING, Matching,
    RequestTemplate, RunBound, RunConfig, RunConfigBuilder, Target, bracket_host,
};
