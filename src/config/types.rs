use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::args::parse_duration_arg;
use crate::error::ValidationError;

/// Settings file contents. Every field is optional; values given on the
/// command line take precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub url: Option<String>,
    pub connections: Option<usize>,
    pub duration: Option<DurationValue>,
    #[serde(alias = "requests")]
    pub amount: Option<u64>,
    pub pipelining: Option<usize>,
    pub workers: Option<usize>,
    pub method: Option<String>,
    pub headers: Option<Vec<String>>,
    pub body: Option<String>,
    pub body_file: Option<PathBuf>,
    pub timeout: Option<DurationValue>,
    pub drain_timeout: Option<DurationValue>,
    pub connect_retries: Option<usize>,
    pub min_connections: Option<usize>,
    pub bailout: Option<u64>,
    pub max_connection_requests: Option<u64>,
    pub correlation_header: Option<String>,
    pub unix_socket: Option<PathBuf>,
    pub json: Option<bool>,
    pub output: Option<PathBuf>,
    pub verbose: Option<bool>,
    pub no_color: Option<bool>,
}

/// A duration written either as whole seconds or as text such as `"250ms"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Seconds(0) => Err(ValidationError::DurationZero),
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => parse_duration_arg(text),
        }
    }
}
