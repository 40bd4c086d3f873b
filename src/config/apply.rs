use clap::ArgMatches;
use clap::parser::ValueSource;

use crate::args::{LoadArgs, PositiveU64, PositiveUsize, parse_header};
use crate::error::{AppError, AppResult, ConfigError};

use super::types::{ConfigFile, DurationValue};

/// Applies configuration values to CLI arguments. Values given on the
/// command line are never overridden.
///
/// # Errors
///
/// Returns an error when config values are invalid or conflict with each
/// other.
pub fn apply_config(
    args: &mut LoadArgs,
    matches: &ArgMatches,
    config: &ConfigFile,
) -> AppResult<()> {
    if config.body.is_some() && config.body_file.is_some() {
        return Err(AppError::config(ConfigError::Conflict {
            left: "body",
            right: "body_file",
        }));
    }

    if !is_cli(matches, "url")
        && let Some(url) = config.url.clone()
    {
        args.url = Some(url);
    }

    if !is_cli(matches, "connections")
        && let Some(connections) = config.connections
    {
        args.connections = ensure_positive_usize(connections, "connections")?;
    }

    // The run bound is taken as a whole: a bound given on the command line
    // replaces both config values.
    if !is_cli(matches, "duration") && !is_cli(matches, "amount") {
        if let Some(duration) = config.duration.as_ref() {
            args.duration = Some(to_duration(duration, "duration")?);
        }
        if let Some(amount) = config.amount {
            args.amount = Some(ensure_positive_u64(amount, "amount")?);
        }
    }

    if !is_cli(matches, "pipelining")
        && let Some(pipelining) = config.pipelining
    {
        args.pipelining = ensure_positive_usize(pipelining, "pipelining")?;
    }

    if !is_cli(matches, "workers")
        && let Some(workers) = config.workers
    {
        args.workers = Some(ensure_positive_usize(workers, "workers")?);
    }

    if !is_cli(matches, "method")
        && let Some(method) = config.method.clone()
    {
        args.method = method;
    }

    if !is_cli(matches, "headers")
        && let Some(headers) = config.headers.as_ref()
    {
        args.headers = parse_headers(headers)?;
    }

    if !is_cli(matches, "body") && !is_cli(matches, "body_file") {
        if let Some(body) = config.body.clone() {
            args.body = Some(body);
        }
        if let Some(path) = config.body_file.clone() {
            args.body_file = Some(path);
        }
    }

    if !is_cli(matches, "timeout")
        && let Some(timeout) = config.timeout.as_ref()
    {
        args.timeout = to_duration(timeout, "timeout")?;
    }

    if !is_cli(matches, "drain_timeout")
        && let Some(timeout) = config.drain_timeout.as_ref()
    {
        args.drain_timeout = to_duration(timeout, "drain_timeout")?;
    }

    if !is_cli(matches, "connect_retries")
        && let Some(retries) = config.connect_retries
    {
        args.connect_retries = retries;
    }

    if !is_cli(matches, "min_connections")
        && let Some(minimum) = config.min_connections
    {
        args.min_connections = Some(ensure_positive_usize(minimum, "min_connections")?);
    }

    if !is_cli(matches, "bailout")
        && let Some(errors) = config.bailout
    {
        args.bailout = Some(ensure_positive_u64(errors, "bailout")?);
    }

    if !is_cli(matches, "max_connection_requests")
        && let Some(requests) = config.max_connection_requests
    {
        args.max_connection_requests =
            Some(ensure_positive_u64(requests, "max_connection_requests")?);
    }

    if !is_cli(matches, "correlation_header")
        && let Some(header) = config.correlation_header.clone()
    {
        args.correlation_header = Some(header);
    }

    if !is_cli(matches, "unix_socket")
        && let Some(path) = config.unix_socket.clone()
    {
        args.unix_socket = Some(path);
    }

    if !is_cli(matches, "json")
        && let Some(json) = config.json
    {
        args.json = json;
    }

    if !is_cli(matches, "output")
        && let Some(output) = config.output.clone()
    {
        args.output = Some(output);
    }

    if !is_cli(matches, "verbose")
        && let Some(verbose) = config.verbose
    {
        args.verbose = verbose;
    }

    if !is_cli(matches, "no_color")
        && let Some(no_color) = config.no_color
    {
        args.no_color = no_color;
    }

    Ok(())
}

fn is_cli(matches: &ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(ValueSource::CommandLine)
}

fn ensure_positive_u64(value: u64, field: &'static str) -> AppResult<PositiveU64> {
    PositiveU64::try_from(value).map_err(|err| {
        AppError::config(ConfigError::FieldMustBePositive { field, source: err })
    })
}

fn ensure_positive_usize(value: usize, field: &'static str) -> AppResult<PositiveUsize> {
    PositiveUsize::try_from(value).map_err(|err| {
        AppError::config(ConfigError::FieldMustBePositive { field, source: err })
    })
}

fn to_duration(value: &DurationValue, field: &'static str) -> AppResult<std::time::Duration> {
    value
        .to_duration()
        .map_err(|err| AppError::config(ConfigError::InvalidDuration { field, source: err }))
}

fn parse_headers(headers: &[String]) -> AppResult<Vec<(String, String)>> {
    let mut parsed = Vec::with_capacity(headers.len());
    for header in headers {
        parsed.push(
            parse_header(header)
                .map_err(|err| AppError::config(ConfigError::InvalidHeader { source: err }))?,
        );
    }
    Ok(parsed)
}
