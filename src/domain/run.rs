use std::num::NonZeroU64;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, HeaderName, HeaderValue, TRANSFER_ENCODING};
use http::Method;
use tracing::warn;
use url::{Host, Url};

use crate::error::ValidationError;

pub const DEFAULT_CONNECTIONS: usize = 10;
pub const DEFAULT_PIPELINING: usize = 1;
pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_RETRIES: usize = 3;
pub const DEFAULT_CORRELATION_HEADER: &str = "x-request-id";

/// The endpoint every connection of a run talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: String,
    host: String,
    port: u16,
    path_and_query: String,
    unix_socket: Option<PathBuf>,
}

impl Target {
    /// Parses an `http://host[:port][/path][?query]` URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is malformed, has no host, or uses a
    /// scheme other than `http`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let url = Url::parse(raw.trim()).map_err(|err| ValidationError::InvalidUrl {
            url: raw.to_owned(),
            source: err,
        })?;
        if url.scheme() != "http" {
            return Err(ValidationError::UnsupportedScheme {
                scheme: url.scheme().to_owned(),
            });
        }
        // IPv6 literals are kept without brackets so they resolve as addresses.
        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_owned(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(Host::Domain(_)) | None => {
                return Err(ValidationError::MissingHost {
                    url: raw.to_owned(),
                });
            }
        };
        let port = url.port_or_known_default().unwrap_or(80);
        let path_and_query = url.query().map_or_else(
            || url.path().to_owned(),
            |query| format!("{}?{}", url.path(), query),
        );

        Ok(Self {
            url: url.as_str().to_owned(),
            host,
            port,
            path_and_query,
            unix_socket: None,
        })
    }

    #[must_use]
    pub fn with_unix_socket(mut self, path: PathBuf) -> Self {
        self.unix_socket = Some(path);
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Host name or address as used for resolution, IPv6 without brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    #[must_use]
    pub fn unix_socket(&self) -> Option<&PathBuf> {
        self.unix_socket.as_ref()
    }

    /// Value for the `Host` header; the port is omitted when it is 80.
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = bracket_host(&self.host);
        if self.port == 80 {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// `host:port` pair for log lines, IPv6 in brackets.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", bracket_host(&self.host), self.port)
    }
}

/// Wraps an IPv6 literal in brackets so a port can follow it.
#[must_use]
pub fn bracket_host(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_owned()
    }
}

/// How a run decides it is over. Exactly one bound applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunBound {
    Duration(Duration),
    Requests(NonZeroU64),
}

/// How responses are paired with the requests that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matching {
    /// Responses arrive in send order (HTTP/1.1 pipelining).
    Fifo,
    /// Every request carries its sequence number in `header` and the server
    /// echoes it back.
    Correlated { header: HeaderName },
}

/// Method, headers, and body sent for every request of a run.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    method: Method,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
}

impl RequestTemplate {
    /// Builds a template from raw CLI/config values.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid method, header name, or header value,
    /// or when a header the engine manages itself is supplied.
    pub fn new(
        method: &str,
        headers: &[(String, String)],
        body: impl Into<Bytes>,
    ) -> Result<Self, ValidationError> {
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes()).map_err(
            |err| ValidationError::InvalidMethod {
                value: method.to_owned(),
                source: err,
            },
        )?;

        let mut parsed = Vec::with_capacity(headers.len());
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                ValidationError::InvalidHeaderName {
                    header: name.clone(),
                    source: err,
                }
            })?;
            if header_name == CONTENT_LENGTH
                || header_name == TRANSFER_ENCODING
                || header_name == CONNECTION
            {
                return Err(ValidationError::ReservedHeader {
                    header: name.clone(),
                });
            }
            let header_value =
                HeaderValue::from_str(value).map_err(|err| ValidationError::InvalidHeaderValue {
                    header: name.clone(),
                    source: err,
                })?;
            parsed.push((header_name, header_value));
        }

        Ok(Self {
            method,
            headers: parsed,
            body: body.into(),
        })
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    fn has_header(&self, name: &HeaderName) -> bool {
        self.headers.iter().any(|(existing, _)| existing == name)
    }
}

impl Default for RequestTemplate {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }
}

/// Immutable, validated parameters of one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    target: Target,
    connections: usize,
    bound: RunBound,
    pipelining: usize,
    workers: usize,
    template: RequestTemplate,
    io_timeout: Duration,
    drain_timeout: Duration,
    connect_retries: usize,
    min_connections: usize,
    matching: Matching,
    bailout: Option<NonZeroU64>,
    max_connection_requests: Option<NonZeroU64>,
}

impl RunConfig {
    #[must_use]
    pub fn builder(url: impl Into<String>) -> RunConfigBuilder {
        RunConfigBuilder::new(url)
    }

    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    #[must_use]
    pub const fn connections(&self) -> usize {
        self.connections
    }

    #[must_use]
    pub const fn bound(&self) -> RunBound {
        self.bound
    }

    #[must_use]
    pub const fn pipelining(&self) -> usize {
        self.pipelining
    }

    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    #[must_use]
    pub const fn template(&self) -> &RequestTemplate {
        &self.template
    }

    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    #[must_use]
    pub const fn connect_retries(&self) -> usize {
        self.connect_retries
    }

    #[must_use]
    pub const fn min_connections(&self) -> usize {
        self.min_connections
    }

    #[must_use]
    pub const fn matching(&self) -> &Matching {
        &self.matching
    }

    #[must_use]
    pub fn bailout(&self) -> Option<u64> {
        self.bailout.map(NonZeroU64::get)
    }

    #[must_use]
    pub fn max_connection_requests(&self) -> Option<u64> {
        self.max_connection_requests.map(NonZeroU64::get)
    }

    /// Number of connections owned by `worker`: an even split with the
    /// remainder handed to the first workers.
    #[must_use]
    pub fn connections_for_worker(&self, worker: usize) -> usize {
        let base = self.connections.checked_div(self.workers).unwrap_or(0);
        let remainder = self.connections.checked_rem(self.workers).unwrap_or(0);
        if worker < remainder {
            base.saturating_add(1)
        } else {
            base
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    url: String,
    connections: usize,
    duration: Option<Duration>,
    requests: Option<u64>,
    pipelining: usize,
    workers: Option<usize>,
    method: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    io_timeout: Duration,
    drain_timeout: Duration,
    connect_retries: usize,
    min_connections: Option<usize>,
    correlation_header: Option<String>,
    bailout: Option<u64>,
    max_connection_requests: Option<u64>,
    unix_socket: Option<PathBuf>,
}

impl RunConfigBuilder {
    fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connections: DEFAULT_CONNECTIONS,
            duration: None,
            requests: None,
            pipelining: DEFAULT_PIPELINING,
            workers: None,
            method: Method::GET.as_str().to_owned(),
            headers: Vec::new(),
            body: Bytes::new(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            min_connections: None,
            correlation_header: None,
            bailout: None,
            max_connection_requests: None,
            unix_socket: None,
        }
    }

    #[must_use]
    pub const fn connections(mut self, connections: usize) -> Self {
        self.connections = connections;
        self
    }

    #[must_use]
    pub const fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub const fn requests(mut self, requests: u64) -> Self {
        self.requests = Some(requests);
        self
    }

    #[must_use]
    pub const fn pipelining(mut self, pipelining: usize) -> Self {
        self.pipelining = pipelining;
        self
    }

    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn connect_retries(mut self, retries: usize) -> Self {
        self.connect_retries = retries;
        self
    }

    #[must_use]
    pub const fn min_connections(mut self, minimum: usize) -> Self {
        self.min_connections = Some(minimum);
        self
    }

    #[must_use]
    pub fn correlation_header(mut self, header: impl Into<String>) -> Self {
        self.correlation_header = Some(header.into());
        self
    }

    #[must_use]
    pub const fn bailout(mut self, errors: u64) -> Self {
        self.bailout = Some(errors);
        self
    }

    #[must_use]
    pub const fn max_connection_requests(mut self, requests: u64) -> Self {
        self.max_connection_requests = Some(requests);
        self
    }

    #[must_use]
    pub fn unix_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.unix_socket = Some(path.into());
        self
    }

    /// Validates the collected values into a [`RunConfig`].
    ///
    /// When both a duration and a request count are set the duration wins
    /// and the request count is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error when neither bound is set, or when any value is out
    /// of range or malformed.
    pub fn build(self) -> Result<RunConfig, ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::MissingUrl);
        }
        let mut target = Target::parse(&self.url)?;
        if let Some(path) = self.unix_socket {
            target = target.with_unix_socket(path);
        }

        ensure_positive(self.connections)?;
        ensure_positive(self.pipelining)?;

        let bound = match (self.duration, self.requests) {
            (Some(duration), requests) => {
                if duration.is_zero() {
                    return Err(ValidationError::DurationZero);
                }
                if requests.is_some() {
                    warn!("Both duration and request count set; the request count is ignored.");
                }
                RunBound::Duration(duration)
            }
            (None, Some(requests)) => RunBound::Requests(
                NonZeroU64::new(requests).ok_or(ValidationError::ValueTooSmall { min: 1 })?,
            ),
            (None, None) => return Err(ValidationError::MissingRunBound),
        };

        let workers = match self.workers {
            Some(workers) => {
                ensure_positive(workers)?;
                workers.min(self.connections)
            }
            None => std::thread::available_parallelism()
                .map_or(1, std::num::NonZeroUsize::get)
                .min(self.connections),
        };

        let min_connections = self.min_connections.unwrap_or(self.connections);
        if min_connections > self.connections {
            return Err(ValidationError::MinConnectionsExceedsConnections {
                minimum: min_connections,
                connections: self.connections,
            });
        }

        if self.io_timeout.is_zero() || self.drain_timeout.is_zero() {
            return Err(ValidationError::DurationZero);
        }

        let template = RequestTemplate::new(&self.method, &self.headers, self.body)?;

        let matching = match self.correlation_header {
            Some(header) => {
                let name = HeaderName::from_bytes(header.trim().as_bytes()).map_err(|err| {
                    ValidationError::InvalidHeaderName {
                        header: header.clone(),
                        source: err,
                    }
                })?;
                if template.has_header(&name) {
                    return Err(ValidationError::ReservedHeader { header });
                }
                Matching::Correlated { header: name }
            }
            None => Matching::Fifo,
        };

        let bailout = self
            .bailout
            .map(|value| NonZeroU64::new(value).ok_or(ValidationError::ValueTooSmall { min: 1 }))
            .transpose()?;
        let max_connection_requests = self
            .max_connection_requests
            .map(|value| NonZeroU64::new(value).ok_or(ValidationError::ValueTooSmall { min: 1 }))
            .transpose()?;

        Ok(RunConfig {
            target,
            connections: self.connections,
            bound,
            pipelining: self.pipelining,
            workers,
            template,
            io_timeout: self.io_timeout,
            drain_timeout: self.drain_timeout,
            connect_retries: self.connect_retries,
            min_connections,
            matching,
            bailout,
            max_connection_requests,
        })
    }
}

const fn ensure_positive(value: usize) -> Result<(), ValidationError> {
    if value == 0 {
        Err(ValidationError::ValueTooSmall { min: 1 })
    } else {
        Ok(())
    }
}
