use bytes::Bytes;

use crate::domain::{DEFAULT_DURATION, RunConfig};
use crate::error::{AppResult, ValidationError};

use super::cli::LoadArgs;

impl LoadArgs {
    /// Validates the parsed arguments into a run configuration, reading the
    /// body file if one was given.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is missing or invalid, the body file
    /// cannot be read, or any value fails validation.
    pub fn to_run_config(&self) -> AppResult<RunConfig> {
        let url = self
            .url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or(ValidationError::MissingUrl)?;

        let body = match (&self.body, &self.body_file) {
            (_, Some(path)) => Bytes::from(std::fs::read(path).map_err(|err| {
                ValidationError::ReadBodyFile {
                    path: path.clone(),
                    source: err,
                }
            })?),
            (Some(body), None) => Bytes::from(body.clone()),
            (None, None) => Bytes::new(),
        };

        let mut builder = RunConfig::builder(url)
            .connections(self.connections.get())
            .pipelining(self.pipelining.get())
            .method(self.method.clone())
            .headers(self.headers.clone())
            .body(body)
            .io_timeout(self.timeout)
            .drain_timeout(self.drain_timeout)
            .connect_retries(self.connect_retries);

        match (self.duration, self.amount) {
            (None, None) => builder = builder.duration(DEFAULT_DURATION),
            (duration, amount) => {
                if let Some(duration) = duration {
                    builder = builder.duration(duration);
                }
                if let Some(amount) = amount {
                    builder = builder.requests(amount.get());
                }
            }
        }
        if let Some(workers) = self.workers {
            builder = builder.workers(workers.get());
        }
        if let Some(minimum) = self.min_connections {
            builder = builder.min_connections(minimum.get());
        }
        if let Some(header) = self.correlation_header.as_ref() {
            builder = builder.correlation_header(header.clone());
        }
        if let Some(errors) = self.bailout {
            builder = builder.bailout(errors.get());
        }
        if let Some(requests) = self.max_connection_requests {
            builder = builder.max_connection_requests(requests.get());
        }
        if let Some(path) = self.unix_socket.as_ref() {
            builder = builder.unix_socket(path.clone());
        }

        Ok(builder.build()?)
    }
}
