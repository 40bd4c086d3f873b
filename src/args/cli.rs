use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::parsers::{parse_duration_arg, parse_header, parse_positive_u64, parse_positive_usize};
use super::types::{OutputFormat, PositiveU64, PositiveUsize};

#[derive(Debug, Parser, Clone)]
#[clap(
    name = "volley",
    version,
    about = "Pipelined HTTP/1.1 load generator: many keep-alive connections, latency histograms, and a one-shot summary.",
    next_help_heading = "Advanced Options"
)]
pub struct LoadArgs {
    /// Target URL (http:// only)
    #[arg(help_heading = "Common Options")]
    pub url: Option<String>,

    /// Number of concurrent connections
    #[arg(
        long,
        short = 'c',
        default_value = "10",
        value_parser = parse_positive_usize,
        help_heading = "Common Options"
    )]
    pub connections: PositiveUsize,

    /// How long to run (supports ms/s/m/h); defaults to 10s without --amount
    #[arg(long, short = 'd', value_parser = parse_duration_arg, help_heading = "Common Options")]
    pub duration: Option<Duration>,

    /// Total number of requests to send instead of a duration
    #[arg(long, short = 'a', value_parser = parse_positive_u64, help_heading = "Common Options")]
    pub amount: Option<PositiveU64>,

    /// Requests in flight per connection
    #[arg(
        long,
        short = 'p',
        default_value = "1",
        value_parser = parse_positive_usize,
        help_heading = "Common Options"
    )]
    pub pipelining: PositiveUsize,

    /// Worker tasks sharing the connections (default: CPU count, capped at connections)
    #[arg(long, short = 'w', value_parser = parse_positive_usize)]
    pub workers: Option<PositiveUsize>,

    /// HTTP method
    #[arg(long, short = 'm', default_value = "GET", help_heading = "Common Options")]
    pub method: String,

    /// Request header, 'Key: Value' (repeatable)
    #[arg(long = "header", short = 'H', value_parser = parse_header, help_heading = "Common Options")]
    pub headers: Vec<(String, String)>,

    /// Request body
    #[arg(long, short = 'b', conflicts_with = "body_file")]
    pub body: Option<String>,

    /// Read the request body from a file
    #[arg(long = "body-file")]
    pub body_file: Option<PathBuf>,

    /// Per-connection I/O timeout (supports ms/s/m/h)
    #[arg(long, short = 't', default_value = "10s", value_parser = parse_duration_arg)]
    pub timeout: Duration,

    /// How long in-flight requests may finish after the run stops
    #[arg(long = "drain-timeout", default_value = "5s", value_parser = parse_duration_arg)]
    pub drain_timeout: Duration,

    /// Connect attempts beyond the first during startup
    #[arg(long = "connect-retries", default_value_t = 3)]
    pub connect_retries: usize,

    /// Connections that must open for the run to start (default: all)
    #[arg(long = "min-connections", value_parser = parse_positive_usize)]
    pub min_connections: Option<PositiveUsize>,

    /// Stop the run after this many failed requests
    #[arg(long, value_parser = parse_positive_u64)]
    pub bailout: Option<PositiveU64>,

    /// Retire a connection after it has sent this many requests
    #[arg(long = "max-connection-requests", value_parser = parse_positive_u64)]
    pub max_connection_requests: Option<PositiveU64>,

    /// Tag requests with this header and match echoed responses by it
    #[arg(long = "correlation-header")]
    pub correlation_header: Option<String>,

    /// Connect through a Unix domain socket instead of TCP
    #[arg(long = "unix-socket")]
    pub unix_socket: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long, short = 'j', help_heading = "Output")]
    pub json: bool,

    /// Write the summary to a file instead of stdout
    #[arg(long, short = 'o', help_heading = "Output")]
    pub output: Option<PathBuf>,

    /// Path to a TOML or JSON config file (default: ./volley.toml or ./volley.json)
    #[arg(long)]
    pub config: Option<String>,

    /// Debug-level logging
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Disable colored log output
    #[arg(long = "no-color")]
    pub no_color: bool,
}

impl LoadArgs {
    #[must_use]
    pub const fn output_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}
