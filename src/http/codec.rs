use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::Method;
use http::header::{HOST, HeaderName, USER_AGENT};

use crate::domain::{Matching, RunConfig};
use crate::error::ProtocolViolationError;

pub(crate) const DEFAULT_USER_AGENT: &str = concat!("volley/", env!("CARGO_PKG_VERSION"));

/// Upper bound on a response head (status line plus headers).
pub(crate) const MAX_HEAD_BYTES: usize = 64 * 1024;
/// Upper bound on a single chunk-size or trailer line.
const MAX_LINE_BYTES: usize = 8 * 1024;

const CRLF: &[u8] = b"\r\n";
const HEAD_END: &[u8] = b"\r\n\r\n";

/// The request bytes shared by every request of a run, pre-rendered once.
#[derive(Debug)]
pub struct FramedTemplate {
    head: Bytes,
    body: Bytes,
    correlation: Option<HeaderName>,
    expects_body: bool,
}

impl FramedTemplate {
    #[must_use]
    pub fn new(config: &RunConfig) -> Self {
        let template = config.template();
        let target = config.target();
        let mut head = BytesMut::with_capacity(256);

        head.put_slice(template.method().as_str().as_bytes());
        head.put_u8(b' ');
        head.put_slice(target.path_and_query().as_bytes());
        head.put_slice(b" HTTP/1.1\r\n");

        let has = |name: &HeaderName| template.headers().iter().any(|(key, _)| key == name);
        if !has(&HOST) {
            put_header(&mut head, HOST.as_str(), target.host_header().as_bytes());
        }
        if !has(&USER_AGENT) {
            put_header(&mut head, USER_AGENT.as_str(), DEFAULT_USER_AGENT.as_bytes());
        }
        for (name, value) in template.headers() {
            put_header(&mut head, name.as_str(), value.as_bytes());
        }

        let body = template.body().clone();
        let method = template.method();
        let sends_length = !body.is_empty()
            || *method == Method::POST
            || *method == Method::PUT
            || *method == Method::PATCH;
        if sends_length {
            put_header(&mut head, "content-length", body.len().to_string().as_bytes());
        }

        let correlation = match config.matching() {
            Matching::Fifo => None,
            Matching::Correlated { header } => Some(header.clone()),
        };

        Self {
            head: head.freeze(),
            body,
            correlation,
            expects_body: *template.method() != Method::HEAD,
        }
    }

    /// Appends the wire bytes of request `seq` to `out`.
    pub fn frame(&self, seq: u64, out: &mut BytesMut) {
        out.reserve(
            self.head
                .len()
                .saturating_add(self.body.len())
                .saturating_add(64),
        );
        out.put_slice(&self.head);
        if let Some(header) = self.correlation.as_ref() {
            put_header(out, header.as_str(), seq.to_string().as_bytes());
        }
        out.put_slice(CRLF);
        out.put_slice(&self.body);
    }

    #[must_use]
    pub const fn correlation_header(&self) -> Option<&HeaderName> {
        self.correlation.as_ref()
    }

    /// Whether responses to this request carry a body (false for `HEAD`).
    #[must_use]
    pub const fn expects_body(&self) -> bool {
        self.expects_body
    }
}

fn put_header(out: &mut BytesMut, name: &str, value: &[u8]) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value);
    out.put_slice(CRLF);
}

/// A fully received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub status: u16,
    /// Head and body bytes, including any interim (1xx) responses before it.
    pub bytes: u64,
    /// The server announced it will close the connection after this response.
    pub close: bool,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Head {
    status: u16,
    close: bool,
    correlation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParseState {
    Head,
    Fixed { head: Head, remaining: u64 },
    Chunked { head: Head, phase: ChunkPhase },
    UntilClose { head: Head },
}

/// Incremental HTTP/1.1 response parser. Body bytes are counted and
/// discarded as they arrive, so memory stays bounded by the head size.
#[derive(Debug)]
pub struct ResponseParser {
    state: ParseState,
    correlation: Option<HeaderName>,
    consumed: u64,
}

impl ResponseParser {
    #[must_use]
    pub const fn new(correlation: Option<HeaderName>) -> Self {
        Self {
            state: ParseState::Head,
            correlation,
            consumed: 0,
        }
    }

    /// True when no response is partially parsed.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, ParseState::Head) && self.consumed == 0
    }

    pub fn reset(&mut self) {
        self.state = ParseState::Head;
        self.consumed = 0;
    }

    /// Consumes bytes from `buf` until one response completes.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation for malformed framing.
    pub fn parse(
        &mut self,
        buf: &mut BytesMut,
        expects_body: bool,
    ) -> Result<Option<ParsedResponse>, ProtocolViolationError> {
        loop {
            let state = std::mem::replace(&mut self.state, ParseState::Head);
            match state {
                ParseState::Head => {
                    let Some(head_len) = find(buf, HEAD_END) else {
                        if buf.len() > MAX_HEAD_BYTES {
                            return Err(ProtocolViolationError::HeadTooLarge {
                                limit: MAX_HEAD_BYTES,
                            });
                        }
                        return Ok(None);
                    };
                    let total = head_len.saturating_add(HEAD_END.len());
                    let raw = buf.split_to(total);
                    self.add_consumed(total);
                    let (head, body) = self.parse_head(&raw, expects_body)?;
                    if (100..200).contains(&head.status) {
                        continue;
                    }
                    self.state = match body {
                        BodyKind::Empty => return Ok(Some(self.complete(head))),
                        BodyKind::Length(0) => return Ok(Some(self.complete(head))),
                        BodyKind::Length(remaining) => ParseState::Fixed { head, remaining },
                        BodyKind::Chunked => ParseState::Chunked {
                            head,
                            phase: ChunkPhase::Size,
                        },
                        BodyKind::UntilClose => ParseState::UntilClose { head },
                    };
                }
                ParseState::Fixed { head, remaining } => {
                    let take = self.discard(buf, remaining);
                    let left = remaining.saturating_sub(take);
                    if left == 0 {
                        return Ok(Some(self.complete(head)));
                    }
                    self.state = ParseState::Fixed {
                        head,
                        remaining: left,
                    };
                    return Ok(None);
                }
                ParseState::Chunked { head, phase } => {
                    match self.advance_chunked(buf, phase)? {
                        Some(ChunkStep::Done) => return Ok(Some(self.complete(head))),
                        Some(ChunkStep::Next(next)) => {
                            self.state = ParseState::Chunked { head, phase: next };
                        }
                        None => {
                            self.state = ParseState::Chunked { head, phase };
                            return Ok(None);
                        }
                    }
                }
                ParseState::UntilClose { head } => {
                    let available = u64::try_from(buf.len()).unwrap_or(u64::MAX);
                    self.discard(buf, available);
                    self.state = ParseState::UntilClose { head };
                    return Ok(None);
                }
            }
        }
    }

    /// Completes a close-delimited body once the peer has closed.
    pub fn finish_on_eof(&mut self) -> Option<ParsedResponse> {
        match std::mem::replace(&mut self.state, ParseState::Head) {
            ParseState::UntilClose { head } => Some(self.complete(head)),
            ParseState::Head | ParseState::Fixed { .. } | ParseState::Chunked { .. } => {
                self.consumed = 0;
                None
            }
        }
    }

    fn complete(&mut self, head: Head) -> ParsedResponse {
        let bytes = std::mem::take(&mut self.consumed);
        self.state = ParseState::Head;
        ParsedResponse {
            status: head.status,
            bytes,
            close: head.close,
            correlation_id: head.correlation_id,
        }
    }

    fn add_consumed(&mut self, count: usize) {
        self.consumed = self
            .consumed
            .saturating_add(u64::try_from(count).unwrap_or(u64::MAX));
    }

    fn discard(&mut self, buf: &mut BytesMut, wanted: u64) -> u64 {
        let available = u64::try_from(buf.len()).unwrap_or(u64::MAX);
        let take = wanted.min(available);
        let take_usize = usize::try_from(take).unwrap_or(buf.len());
        buf.advance(take_usize);
        self.add_consumed(take_usize);
        take
    }

    fn parse_head(
        &self,
        raw: &[u8],
        expects_body: bool,
    ) -> Result<(Head, BodyKind), ProtocolViolationError> {
        let text =
            std::str::from_utf8(raw).map_err(|_utf8| ProtocolViolationError::MalformedHeader)?;
        let mut lines = text.split("\r\n");
        let status_line = lines
            .next()
            .ok_or(ProtocolViolationError::MalformedStatusLine)?;
        let (keep_alive_default, status) = parse_status_line(status_line)?;
        if status == 101 {
            return Err(ProtocolViolationError::SwitchingProtocols);
        }

        let mut content_length: Option<u64> = None;
        let mut chunked = false;
        let mut close = !keep_alive_default;
        let mut correlation_id = None;

        for line in lines.filter(|line| !line.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or(ProtocolViolationError::MalformedHeader)?;
            let name = name.trim();
            let value = value.trim();
            if name.is_empty() {
                return Err(ProtocolViolationError::MalformedHeader);
            }
            if name.eq_ignore_ascii_case("content-length") {
                let parsed = value.parse::<u64>().map_err(|_parse| {
                    ProtocolViolationError::InvalidContentLength {
                        value: value.to_owned(),
                    }
                })?;
                if content_length.is_some_and(|existing| existing != parsed) {
                    return Err(ProtocolViolationError::InvalidContentLength {
                        value: value.to_owned(),
                    });
                }
                content_length = Some(parsed);
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                chunked = value
                    .rsplit(',')
                    .next()
                    .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
            } else if name.eq_ignore_ascii_case("connection") {
                for token in value.split(',').map(str::trim) {
                    if token.eq_ignore_ascii_case("close") {
                        close = true;
                    } else if token.eq_ignore_ascii_case("keep-alive") {
                        close = false;
                    }
                }
            } else if self
                .correlation
                .as_ref()
                .is_some_and(|header| name.eq_ignore_ascii_case(header.as_str()))
            {
                correlation_id = Some(value.to_owned());
            }
        }

        let informational = (100..200).contains(&status);
        let body = if informational || status == 204 || status == 304 || !expects_body {
            BodyKind::Empty
        } else if chunked {
            BodyKind::Chunked
        } else if let Some(length) = content_length {
            BodyKind::Length(length)
        } else {
            close = true;
            BodyKind::UntilClose
        };

        Ok((
            Head {
                status,
                close,
                correlation_id,
            },
            body,
        ))
    }

    fn advance_chunked(
        &mut self,
        buf: &mut BytesMut,
        phase: ChunkPhase,
    ) -> Result<Option<ChunkStep>, ProtocolViolationError> {
        match phase {
            ChunkPhase::Size => {
                let Some(line) = self.take_line(buf)? else {
                    return Ok(None);
                };
                let size_text = line
                    .split(|byte| *byte == b';')
                    .next()
                    .and_then(|size| std::str::from_utf8(size).ok())
                    .map(str::trim)
                    .ok_or(ProtocolViolationError::MalformedChunk)?;
                let size = u64::from_str_radix(size_text, 16)
                    .map_err(|_parse| ProtocolViolationError::MalformedChunk)?;
                if size == 0 {
                    Ok(Some(ChunkStep::Next(ChunkPhase::Trailers)))
                } else {
                    Ok(Some(ChunkStep::Next(ChunkPhase::Data(size))))
                }
            }
            ChunkPhase::Data(remaining) => {
                if buf.is_empty() {
                    return Ok(None);
                }
                let take = self.discard(buf, remaining);
                let left = remaining.saturating_sub(take);
                if left == 0 {
                    Ok(Some(ChunkStep::Next(ChunkPhase::DataEnd)))
                } else {
                    Ok(Some(ChunkStep::Next(ChunkPhase::Data(left))))
                }
            }
            ChunkPhase::DataEnd => {
                if buf.len() < CRLF.len() {
                    return Ok(None);
                }
                if !buf.starts_with(CRLF) {
                    return Err(ProtocolViolationError::MalformedChunk);
                }
                buf.advance(CRLF.len());
                self.add_consumed(CRLF.len());
                Ok(Some(ChunkStep::Next(ChunkPhase::Size)))
            }
            ChunkPhase::Trailers => {
                let Some(line) = self.take_line(buf)? else {
                    return Ok(None);
                };
                if line.is_empty() {
                    Ok(Some(ChunkStep::Done))
                } else {
                    Ok(Some(ChunkStep::Next(ChunkPhase::Trailers)))
                }
            }
        }
    }

    /// Takes one CRLF-terminated line, without the terminator.
    fn take_line(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolViolationError> {
        let Some(end) = find(buf, CRLF) else {
            if buf.len() > MAX_LINE_BYTES {
                return Err(ProtocolViolationError::MalformedChunk);
            }
            return Ok(None);
        };
        let line = buf.split_to(end).freeze();
        buf.advance(CRLF.len());
        self.add_consumed(end.saturating_add(CRLF.len()));
        Ok(Some(line))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkStep {
    Next(ChunkPhase),
    Done,
}

/// Returns `(keep_alive_by_default, status)`.
fn parse_status_line(line: &str) -> Result<(bool, u16), ProtocolViolationError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or(ProtocolViolationError::MalformedStatusLine)?;
    let keep_alive = match version {
        "HTTP/1.1" => true,
        "HTTP/1.0" => false,
        _ => return Err(ProtocolViolationError::MalformedStatusLine),
    };
    let code = parts
        .next()
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..600).contains(code))
        .ok_or(ProtocolViolationError::MalformedStatusLine)?;
    Ok((keep_alive, code))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
