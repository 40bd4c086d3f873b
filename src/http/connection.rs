use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::debug;

use crate::domain::{Matching, RunConfig};
use crate::error::{
    ConnectError, ConnectionFailure, ProtocolViolationError, TimeoutError, WriteError,
};
use crate::metrics::{RequestErrorKind, RequestRecord};

use super::codec::{FramedTemplate, ParsedResponse, ResponseParser};
use super::pipeliner::Pipeliner;
use super::transport::{BoxedStream, Connector};

const READ_CHUNK: usize = 16 * 1024;

/// Everything a connection needs that is shared by the whole run.
#[derive(Debug)]
pub struct ConnectionContext {
    connector: Arc<dyn Connector>,
    template: FramedTemplate,
    matching: Matching,
    pipelining: usize,
    io_timeout: Duration,
}

impl ConnectionContext {
    #[must_use]
    pub fn new(config: &RunConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            template: FramedTemplate::new(config),
            matching: config.matching().clone(),
            pipelining: config.pipelining(),
            io_timeout: config.io_timeout(),
        }
    }

    #[must_use]
    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        self.io_timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    /// The stream is gone; the next dispatch attempts one reconnect.
    Closed,
    /// Out of the run for good.
    Abandoned,
}

/// One transport connection to the target and the requests in flight on it.
pub struct Connection {
    index: usize,
    worker: usize,
    context: Arc<ConnectionContext>,
    stream: Option<BoxedStream>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    parser: ResponseParser,
    pipeliner: Pipeliner,
    state: ConnectionState,
    close_requested: bool,
    next_seq: u64,
    issued: u64,
    reconnects: u64,
    last_activity: Instant,
    completed: Vec<RequestRecord>,
    failure: Option<ConnectionFailure>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("index", &self.index)
            .field("worker", &self.worker)
            .field("state", &self.state)
            .field("depth", &self.pipeliner.depth())
            .field("next_seq", &self.next_seq)
            .field("reconnects", &self.reconnects)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Opens connection `index`, owned by `worker`.
    ///
    /// # Errors
    ///
    /// Returns the connector's error when the stream cannot be opened within
    /// the I/O timeout.
    pub async fn open(
        index: usize,
        worker: usize,
        context: Arc<ConnectionContext>,
    ) -> Result<Self, ConnectError> {
        let stream = context.connector.connect(context.io_timeout).await?;
        let parser = ResponseParser::new(context.template.correlation_header().cloned());
        let pipeliner = Pipeliner::new(context.pipelining, &context.matching);
        Ok(Self {
            index,
            worker,
            stream: Some(stream),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(512),
            parser,
            pipeliner,
            state: ConnectionState::Open,
            close_requested: false,
            next_seq: 0,
            issued: 0,
            reconnects: 0,
            last_activity: Instant::now(),
            completed: Vec::new(),
            failure: None,
            context,
        })
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn worker(&self) -> usize {
        self.worker
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.pipeliner.depth()
    }

    /// Requests dispatched over the lifetime of this connection.
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.issued
    }

    #[must_use]
    pub const fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// True while there is room in the pipeline.
    #[must_use]
    pub fn admit(&self) -> bool {
        self.pipeliner.admit()
    }

    /// True when the stream must be replaced before the next dispatch.
    #[must_use]
    pub fn needs_reconnect(&self) -> bool {
        self.state == ConnectionState::Closed
            || (self.state == ConnectionState::Open && self.close_requested)
    }

    /// Completed requests not yet handed out by [`Self::poll_completions`].
    #[must_use]
    pub fn has_completed(&self) -> bool {
        !self.completed.is_empty()
    }

    /// Takes the protocol violation that abandoned this connection, once.
    pub fn take_failure(&mut self) -> Option<ConnectionFailure> {
        self.failure.take()
    }

    /// Frames and writes the next request.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport is closed or the write fails. In
    /// the latter case the request is completed as a write failure and the
    /// stream is dropped.
    pub async fn send(&mut self) -> Result<(), WriteError> {
        if self.state != ConnectionState::Open || self.close_requested {
            return Err(WriteError::Closed {
                connection: self.index,
            });
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(WriteError::Closed {
                connection: self.index,
            });
        };

        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.issued = self.issued.saturating_add(1);

        self.write_buf.clear();
        self.context.template.frame(seq, &mut self.write_buf);
        let sent_at = Instant::now();
        self.pipeliner.push(RequestRecord::dispatched(
            self.worker,
            self.index,
            seq,
            sent_at,
        ));

        let frame = &self.write_buf;
        let write = async {
            stream.write_all(frame).await?;
            stream.flush().await
        };
        let written = timeout(self.context.io_timeout, write).await;
        let result = match written {
            Ok(Ok(())) => {
                self.last_activity = Instant::now();
                return Ok(());
            }
            Ok(Err(source)) => WriteError::Io {
                connection: self.index,
                source,
            },
            Err(_elapsed) => WriteError::TimedOut {
                connection: self.index,
                timeout_ms: duration_ms(self.context.io_timeout),
            },
        };

        let now = Instant::now();
        if let Some(record) = self.pipeliner.withdraw(seq) {
            self.completed.push(record.fail(RequestErrorKind::Write, now));
        }
        self.drop_stream(RequestErrorKind::ConnectionReset);
        Err(result)
    }

    /// Reads until at least one request completes, the stream drops, or
    /// `deadline` passes.
    ///
    /// A drop completes every outstanding request as failed. Passing the
    /// I/O timeout without any traffic completes them as timed out. Bytes
    /// already read stay buffered if the returned future is dropped.
    pub async fn poll_completions(&mut self, deadline: Instant) -> Vec<RequestRecord> {
        loop {
            if !self.completed.is_empty() {
                return std::mem::take(&mut self.completed);
            }
            if self.state != ConnectionState::Open
                || (self.pipeliner.depth() == 0 && self.parser.is_idle())
            {
                return Vec::new();
            }

            let io_deadline = self
                .last_activity
                .checked_add(self.context.io_timeout)
                .unwrap_or(deadline);
            let wait_until = deadline.min(io_deadline);
            let Some(stream) = self.stream.as_mut() else {
                self.state = ConnectionState::Closed;
                continue;
            };

            self.read_buf.reserve(READ_CHUNK);
            let read = timeout_at(wait_until, stream.read_buf(&mut self.read_buf)).await;
            match read {
                Ok(Ok(0)) => {
                    if let Some(response) = self.parser.finish_on_eof() {
                        self.complete(&response);
                    }
                    debug!(
                        "Connection {} closed by peer with {} request(s) in flight.",
                        self.index,
                        self.pipeliner.depth()
                    );
                    self.drop_stream(RequestErrorKind::ConnectionReset);
                }
                Ok(Ok(_read)) => {
                    self.last_activity = Instant::now();
                    self.parse_buffered();
                }
                Ok(Err(err)) => {
                    debug!("Connection {} read failed: {}", self.index, err);
                    self.drop_stream(RequestErrorKind::ConnectionReset);
                }
                Err(_elapsed) => {
                    if Instant::now() >= io_deadline {
                        let err = TimeoutError {
                            connection: self.index,
                            timeout_ms: duration_ms(self.context.io_timeout),
                        };
                        debug!("{} {} request(s) in flight.", err, self.pipeliner.depth());
                        self.drop_stream(RequestErrorKind::Timeout);
                    } else {
                        return Vec::new();
                    }
                }
            }
        }
    }

    /// Replaces the stream with a fresh one. A single attempt is made; when
    /// it fails the connection is abandoned.
    ///
    /// # Errors
    ///
    /// Returns the failure that abandoned the connection.
    pub async fn reconnect(&mut self) -> Result<(), ConnectionFailure> {
        if self.state == ConnectionState::Abandoned {
            return Err(ConnectionFailure::Abandoned {
                connection: self.index,
            });
        }
        if self.state == ConnectionState::Open {
            self.drop_stream(RequestErrorKind::ConnectionReset);
        }
        let connected = self
            .context
            .connector
            .connect(self.context.io_timeout)
            .await;
        match connected {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = ConnectionState::Open;
                self.reconnects = self.reconnects.saturating_add(1);
                self.last_activity = Instant::now();
                debug!("Connection {} reconnected.", self.index);
                Ok(())
            }
            Err(source) => {
                debug!("Connection {} could not reconnect: {}", self.index, source);
                self.state = ConnectionState::Abandoned;
                Err(ConnectionFailure::ReconnectFailed {
                    connection: self.index,
                    source,
                })
            }
        }
    }

    /// Completes every outstanding request with `kind` and closes the stream.
    /// Used when the drain deadline passes.
    pub fn expire(&mut self, kind: RequestErrorKind) -> Vec<RequestRecord> {
        let now = Instant::now();
        let mut expired = std::mem::take(&mut self.completed);
        expired.extend(
            self.pipeliner
                .drain()
                .into_iter()
                .map(|record| record.fail(kind, now)),
        );
        self.stream = None;
        self.parser.reset();
        self.read_buf.clear();
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closed;
        }
        expired
    }

    fn parse_buffered(&mut self) {
        let expects_body = self.context.template.expects_body();
        while !self.read_buf.is_empty() {
            match self.parser.parse(&mut self.read_buf, expects_body) {
                Ok(Some(response)) => {
                    if !self.complete(&response) {
                        return;
                    }
                    if response.close {
                        self.close_requested = true;
                        self.read_buf.clear();
                        return;
                    }
                }
                Ok(None) => return,
                Err(violation) => {
                    self.abandon_protocol(violation);
                    return;
                }
            }
        }
    }

    /// Returns false when the response matched nothing and the connection
    /// was abandoned.
    fn complete(&mut self, response: &ParsedResponse) -> bool {
        match self.pipeliner.match_response(response) {
            Ok(record) => {
                self.completed.push(record.succeed(
                    response.status,
                    response.bytes,
                    Instant::now(),
                ));
                true
            }
            Err(violation) => {
                self.abandon_protocol(violation);
                false
            }
        }
    }

    fn abandon_protocol(&mut self, violation: ProtocolViolationError) {
        self.fail_outstanding(RequestErrorKind::Protocol);
        self.stream = None;
        self.read_buf.clear();
        self.parser.reset();
        self.state = ConnectionState::Abandoned;
        self.failure = Some(ConnectionFailure::Protocol {
            connection: self.index,
            source: violation,
        });
    }

    fn drop_stream(&mut self, kind: RequestErrorKind) {
        self.fail_outstanding(kind);
        self.stream = None;
        self.read_buf.clear();
        self.parser.reset();
        self.close_requested = false;
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closed;
        }
    }

    fn fail_outstanding(&mut self, kind: RequestErrorKind) {
        let now = Instant::now();
        let failed = self
            .pipeliner
            .drain()
            .into_iter()
            .map(|record| record.fail(kind, now));
        self.completed.extend(failed);
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
