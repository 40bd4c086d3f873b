//! Thin wrappers used by the `fuzz/` targets.
use std::path::PathBuf;
use std::time::Duration;

use bytes::BytesMut;
use clap::{ArgMatches, CommandFactory, FromArgMatches};
use http::header::HeaderName;

use crate::args::{LoadArgs, parse_duration_arg, parse_header};
use crate::config::apply_config;
use crate::config::types::ConfigFile;
use crate::error::{AppError, AppResult, ConfigError, ProtocolViolationError};
use crate::http::{ParsedResponse, ResponseParser};

thread_local! {
    static BASE_MATCHES: ArgMatches =
        LoadArgs::command().get_matches_from(["volley", "http://127.0.0.1/"]);
}

/// Parses a header string in `Key: Value` format.
///
/// # Errors
///
/// Returns an error when the header is malformed.
pub fn parse_header_input(input: &str) -> AppResult<(String, String)> {
    parse_header(input).map_err(AppError::from)
}

/// Parses a duration argument (e.g. `10s`, `500ms`).
///
/// # Errors
///
/// Returns an error when the duration is invalid.
pub fn parse_duration_arg_input(input: &str) -> AppResult<Duration> {
    parse_duration_arg(input).map_err(AppError::from)
}

/// Parses TOML config and applies it to default arguments.
///
/// # Errors
///
/// Returns an error when parsing or validation fails.
pub fn apply_config_from_toml(input: &str) -> AppResult<()> {
    let config: ConfigFile = toml::from_str(input).map_err(|err| {
        AppError::config(ConfigError::ParseToml {
            path: PathBuf::from("<input>"),
            source: err,
        })
    })?;
    apply_to_defaults(&config)
}

/// Parses JSON config and applies it to default arguments.
///
/// # Errors
///
/// Returns an error when parsing or validation fails.
pub fn apply_config_from_json(input: &[u8]) -> AppResult<()> {
    let config: ConfigFile = serde_json::from_slice(input)?;
    apply_to_defaults(&config)
}

fn apply_to_defaults(config: &ConfigFile) -> AppResult<()> {
    BASE_MATCHES.with(|matches| {
        let mut args = LoadArgs::from_arg_matches(matches)?;
        apply_config(&mut args, matches, config)?;
        args.to_run_config().map(|_| ())
    })
}

/// Feeds `input` to a response parser in chunks of `split` bytes and returns
/// every response it completes.
///
/// # Errors
///
/// Returns the first protocol violation.
pub fn parse_responses_input(
    input: &[u8],
    split: usize,
    correlation: bool,
) -> Result<Vec<ParsedResponse>, ProtocolViolationError> {
    let header = correlation.then(|| HeaderName::from_static("x-request-id"));
    let mut parser = ResponseParser::new(header);
    let mut buf = BytesMut::new();
    let mut responses = Vec::new();
    for chunk in input.chunks(split.max(1)) {
        buf.extend_from_slice(chunk);
        while let Some(response) = parser.parse(&mut buf, true)? {
            responses.push(response);
        }
    }
    if let Some(response) = parser.finish_on_eof() {
        responses.push(response);
    }
    Ok(responses)
}
