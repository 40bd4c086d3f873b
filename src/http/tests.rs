use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::time::Instant;

use super::test_server::{Reply, ServerOptions, TestServer};
use super::*;
use crate::domain::{Matching, RunConfig, Target};
use crate::error::{ConnectError, ConnectionFailure, ProtocolViolationError, WriteError};
use crate::metrics::{Outcome, RequestErrorKind, RequestRecord};

const COLLECT_TIMEOUT: Duration = Duration::from_secs(5);

fn config(url: &str, pipelining: usize) -> Result<RunConfig, String> {
    RunConfig::builder(url)
        .connections(1)
        .workers(1)
        .pipelining(pipelining)
        .requests(1000)
        .io_timeout(Duration::from_millis(500))
        .build()
        .map_err(|err| err.to_string())
}

fn context(config: &RunConfig, connector: Arc<dyn Connector>) -> Arc<ConnectionContext> {
    Arc::new(ConnectionContext::new(config, connector))
}

async fn open(config: &RunConfig) -> Result<Connection, String> {
    let connector: Arc<dyn Connector> = Arc::from(connector_for(config.target()));
    Connection::open(0, 0, context(config, connector))
        .await
        .map_err(|err| err.to_string())
}

async fn collect(connection: &mut Connection, wanted: usize) -> Vec<RequestRecord> {
    let give_up = Instant::now() + COLLECT_TIMEOUT;
    let mut records = Vec::new();
    while records.len() < wanted && Instant::now() < give_up {
        let deadline = Instant::now() + POLL_INTERVAL;
        let batch = connection.poll_completions(deadline).await;
        let stalled = batch.is_empty()
            && connection.depth() == 0
            && connection.state() != ConnectionState::Open;
        records.extend(batch);
        if stalled {
            break;
        }
    }
    records
}

fn parse_all(raw: &[u8], expects_body: bool) -> Result<Vec<ParsedResponse>, ProtocolViolationError> {
    let mut parser = ResponseParser::new(None);
    let mut buf = BytesMut::from(raw);
    let mut responses = Vec::new();
    while let Some(response) = parser.parse(&mut buf, expects_body)? {
        responses.push(response);
    }
    Ok(responses)
}

/// Connects to the inner address a limited number of times, then refuses.
#[derive(Debug)]
struct LimitedConnector {
    inner: TcpConnector,
    remaining: AtomicUsize,
}

#[async_trait]
impl Connector for LimitedConnector {
    async fn connect(&self, connect_timeout: Duration) -> Result<BoxedStream, ConnectError> {
        let allowed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(ConnectError::Io {
                target: self.describe(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        self.inner.connect(connect_timeout).await
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[test]
fn framed_request_carries_defaults_and_correlation_id() -> Result<(), String> {
    let config = RunConfig::builder("http://example.test:8080/items?page=2")
        .header("accept", "application/json")
        .correlation_header("x-request-id")
        .duration(Duration::from_secs(1))
        .build()
        .map_err(|err| err.to_string())?;
    let template = FramedTemplate::new(&config);
    let mut out = BytesMut::new();
    template.frame(7, &mut out);
    let text = String::from_utf8(out.to_vec()).map_err(|err| err.to_string())?;

    let checks = [
        (text.starts_with("GET /items?page=2 HTTP/1.1\r\n"), "request line"),
        (text.contains("host: example.test:8080\r\n"), "host header"),
        (text.contains(&format!("user-agent: {}\r\n", DEFAULT_USER_AGENT)), "user agent"),
        (text.contains("accept: application/json\r\n"), "template header"),
        (text.contains("x-request-id: 7\r\n"), "correlation id"),
        (!text.contains("content-length"), "no length on empty GET"),
        (text.ends_with("\r\n\r\n"), "head terminator"),
    ];
    for (ok, what) in checks {
        if !ok {
            return Err(format!("Missing {} in {:?}", what, text));
        }
    }
    Ok(())
}

#[test]
fn framed_post_carries_body_and_length() -> Result<(), String> {
    let config = RunConfig::builder("http://localhost/submit")
        .method("POST")
        .header("host", "api.internal")
        .body("{\"a\":1}")
        .duration(Duration::from_secs(1))
        .build()
        .map_err(|err| err.to_string())?;
    let template = FramedTemplate::new(&config);
    let mut out = BytesMut::new();
    template.frame(0, &mut out);
    let text = String::from_utf8(out.to_vec()).map_err(|err| err.to_string())?;

    if !text.starts_with("POST /submit HTTP/1.1\r\n") {
        return Err(format!("Unexpected request line: {:?}", text));
    }
    if !text.contains("host: api.internal\r\n") || text.contains("host: localhost") {
        return Err(format!("Template host header should replace the default: {:?}", text));
    }
    if !text.contains("content-length: 7\r\n") || !text.ends_with("\r\n\r\n{\"a\":1}") {
        return Err(format!("Body framing wrong: {:?}", text));
    }
    if template.correlation_header().is_some() {
        return Err("FIFO template should not inject a correlation header".to_owned());
    }
    Ok(())
}

#[test]
fn parser_handles_split_content_length_response() -> Result<(), String> {
    let raw = b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello";
    let (first, second) = raw.split_at(20);
    let mut parser = ResponseParser::new(None);
    let mut buf = BytesMut::from(first);
    if parser.parse(&mut buf, true).map_err(|err| err.to_string())?.is_some() {
        return Err("Response completed too early".to_owned());
    }
    buf.extend_from_slice(second);
    let response = parser
        .parse(&mut buf, true)
        .map_err(|err| err.to_string())?
        .ok_or("Response should be complete")?;
    let expected_bytes = u64::try_from(raw.len()).map_err(|err| err.to_string())?;
    if response.status != 200 || response.bytes != expected_bytes || response.close {
        return Err(format!("Unexpected response: {:?}", response));
    }
    if !parser.is_idle() || !buf.is_empty() {
        return Err("Parser should be idle with nothing buffered".to_owned());
    }
    Ok(())
}

#[test]
fn parser_handles_chunked_bodies_with_trailers() -> Result<(), String> {
    let raw = b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n\
4;ext=1\r\nwiki\r\n5\r\npedia\r\n0\r\nx-trailer: yes\r\n\r\n\
HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n";
    let responses = parse_all(raw, true).map_err(|err| err.to_string())?;
    let statuses: Vec<u16> = responses.iter().map(|response| response.status).collect();
    if statuses != vec![200, 404] {
        return Err(format!("Unexpected statuses: {:?}", statuses));
    }
    let total: u64 = responses.iter().map(|response| response.bytes).sum();
    let expected = u64::try_from(raw.len()).map_err(|err| err.to_string())?;
    if total != expected {
        return Err(format!("Byte count {} != {}", total, expected));
    }
    Ok(())
}

#[test]
fn parser_skips_interim_and_bodyless_responses() -> Result<(), String> {
    let raw = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 204 No Content\r\ncontent-length: 10\r\n\r\n\
HTTP/1.1 304 Not Modified\r\n\r\n";
    let responses = parse_all(raw, true).map_err(|err| err.to_string())?;
    let statuses: Vec<u16> = responses.iter().map(|response| response.status).collect();
    if statuses != vec![204, 304] {
        return Err(format!("Interim response should fold into the final one: {:?}", statuses));
    }

    let head = b"HTTP/1.1 200 OK\r\ncontent-length: 1234\r\n\r\n";
    let responses = parse_all(head, false).map_err(|err| err.to_string())?;
    if responses.len() != 1 {
        return Err("HEAD response should not wait for a body".to_owned());
    }
    Ok(())
}

#[test]
fn parser_detects_close_semantics() -> Result<(), String> {
    let responses = parse_all(
        b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        true,
    )
    .map_err(|err| err.to_string())?;
    if !responses.first().is_some_and(|response| response.close) {
        return Err("connection: close should be reported".to_owned());
    }

    let responses = parse_all(b"HTTP/1.0 200 OK\r\ncontent-length: 0\r\n\r\n", true)
        .map_err(|err| err.to_string())?;
    if !responses.first().is_some_and(|response| response.close) {
        return Err("HTTP/1.0 without keep-alive should close".to_owned());
    }

    let mut parser = ResponseParser::new(None);
    let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\n\r\nstreamed until close"[..]);
    if parser.parse(&mut buf, true).map_err(|err| err.to_string())?.is_some() {
        return Err("Close-delimited body completed before EOF".to_owned());
    }
    let response = parser.finish_on_eof().ok_or("EOF should complete the body")?;
    if !response.close || response.status != 200 {
        return Err(format!("Unexpected close-delimited response: {:?}", response));
    }
    Ok(())
}

#[test]
fn parser_rejects_protocol_violations() -> Result<(), String> {
    let cases: [(&[u8], ProtocolViolationError); 4] = [
        (b"NOT-HTTP garbage\r\n\r\n", ProtocolViolationError::MalformedStatusLine),
        (
            b"HTTP/1.1 101 Switching Protocols\r\n\r\n",
            ProtocolViolationError::SwitchingProtocols,
        ),
        (
            b"HTTP/1.1 200 OK\r\ncontent-length: nope\r\n\r\n",
            ProtocolViolationError::InvalidContentLength {
                value: "nope".to_owned(),
            },
        ),
        (
            b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\nzz\r\n",
            ProtocolViolationError::MalformedChunk,
        ),
    ];
    for (raw, expected) in cases {
        match parse_all(raw, true) {
            Err(err) if err == expected => {}
            other => return Err(format!("Expected {:?}, got {:?}", expected, other)),
        }
    }

    let oversized = vec![b'a'; MAX_HEAD_BYTES.saturating_add(1)];
    match parse_all(&oversized, true) {
        Err(ProtocolViolationError::HeadTooLarge { .. }) => Ok(()),
        other => Err(format!("Expected HeadTooLarge, got {:?}", other)),
    }
}

fn record(seq: u64) -> RequestRecord {
    RequestRecord::dispatched(0, 0, seq, Instant::now())
}

fn response_with_id(id: Option<&str>) -> ParsedResponse {
    ParsedResponse {
        status: 200,
        bytes: 10,
        close: false,
        correlation_id: id.map(str::to_owned),
    }
}

#[test]
fn pipeliner_admits_up_to_limit_and_matches_in_order() -> Result<(), String> {
    let mut pipeliner = Pipeliner::new(2, &Matching::Fifo);
    pipeliner.push(record(0));
    if !pipeliner.admit() {
        return Err("Depth 1 of 2 should admit".to_owned());
    }
    pipeliner.push(record(1));
    if pipeliner.admit() || pipeliner.depth() != 2 {
        return Err("Full pipeline should not admit".to_owned());
    }
    let first = pipeliner
        .match_response(&response_with_id(None))
        .map_err(|err| err.to_string())?;
    if first.seq != 0 || !pipeliner.admit() {
        return Err(format!("FIFO should match the oldest request, got {}", first.seq));
    }
    pipeliner
        .match_response(&response_with_id(None))
        .map_err(|err| err.to_string())?;
    match pipeliner.match_response(&response_with_id(None)) {
        Err(ProtocolViolationError::UnsolicitedResponse) => Ok(()),
        other => Err(format!("Expected UnsolicitedResponse, got {:?}", other)),
    }
}

#[test]
fn pipeliner_matches_correlated_responses_by_id() -> Result<(), String> {
    let matching = Matching::Correlated {
        header: http::header::HeaderName::from_static("x-request-id"),
    };
    let mut pipeliner = Pipeliner::new(3, &matching);
    for seq in 0..3 {
        pipeliner.push(record(seq));
    }
    let matched = pipeliner
        .match_response(&response_with_id(Some("2")))
        .map_err(|err| err.to_string())?;
    if matched.seq != 2 {
        return Err(format!("Expected seq 2, got {}", matched.seq));
    }
    match pipeliner.match_response(&response_with_id(Some("9"))) {
        Err(ProtocolViolationError::UnmatchedCorrelationId { id: 9 }) => {}
        other => return Err(format!("Expected unmatched id, got {:?}", other)),
    }
    match pipeliner.match_response(&response_with_id(None)) {
        Err(ProtocolViolationError::MissingCorrelationId { header }) if header == "x-request-id" => {}
        other => return Err(format!("Expected missing id, got {:?}", other)),
    }
    let rest: Vec<u64> = pipeliner.drain().into_iter().map(|record| record.seq).collect();
    if rest != vec![0, 1] || pipeliner.depth() != 0 {
        return Err(format!("Drain should return the rest in order: {:?}", rest));
    }
    Ok(())
}

#[tokio::test]
async fn connection_completes_pipelined_requests() -> Result<(), String> {
    let server = TestServer::start(ServerOptions::default()).await?;
    let config = config(&server.url("/"), 3)?;
    let mut connection = open(&config).await?;

    while connection.admit() {
        connection.send().await.map_err(|err| err.to_string())?;
    }
    if connection.depth() != 3 {
        return Err(format!("Expected depth 3, got {}", connection.depth()));
    }
    let records = collect(&mut connection, 3).await;
    let seqs: Vec<u64> = records.iter().map(|record| record.seq).collect();
    if seqs != vec![0, 1, 2] {
        return Err(format!("Unexpected sequence numbers: {:?}", seqs));
    }
    for record in &records {
        if record.outcome != Some(Outcome::Success) || record.status != Some(200) {
            return Err(format!("Unexpected record: {:?}", record));
        }
    }
    if server.max_unanswered() > 3 {
        return Err(format!("Server saw depth {}", server.max_unanswered()));
    }
    Ok(())
}

#[tokio::test]
async fn connection_reset_fails_outstanding_then_reconnects() -> Result<(), String> {
    let server = TestServer::start(ServerOptions {
        close_after: Some(1),
        ..ServerOptions::default()
    })
    .await?;
    let config = config(&server.url("/"), 2)?;
    let mut connection = open(&config).await?;

    connection.send().await.map_err(|err| err.to_string())?;
    connection.send().await.map_err(|err| err.to_string())?;
    let records = collect(&mut connection, 2).await;
    let outcomes: Vec<Option<Outcome>> = records.iter().map(|record| record.outcome).collect();
    let expected = vec![
        Some(Outcome::Success),
        Some(Outcome::Failed(RequestErrorKind::ConnectionReset)),
    ];
    if outcomes != expected {
        return Err(format!("Unexpected outcomes: {:?}", outcomes));
    }
    if !connection.needs_reconnect() {
        return Err("Dropped connection should need a reconnect".to_owned());
    }

    connection.reconnect().await.map_err(|err| err.to_string())?;
    connection.send().await.map_err(|err| err.to_string())?;
    let records = collect(&mut connection, 1).await;
    let seq = records.first().map(|record| record.seq);
    if seq != Some(2) || connection.reconnects() != 1 {
        return Err(format!(
            "Sequence numbers must continue across reconnects: {:?}",
            seq
        ));
    }
    Ok(())
}

#[tokio::test]
async fn failed_reconnect_abandons_the_connection() -> Result<(), String> {
    let server = TestServer::start(ServerOptions {
        close_after: Some(1),
        announce_close: true,
        ..ServerOptions::default()
    })
    .await?;
    let config = config(&server.url("/"), 1)?;
    let connector: Arc<dyn Connector> = Arc::new(LimitedConnector {
        inner: TcpConnector::new("127.0.0.1", server.addr.port()),
        remaining: AtomicUsize::new(1),
    });
    let mut connection = Connection::open(0, 0, context(&config, connector))
        .await
        .map_err(|err| err.to_string())?;

    connection.send().await.map_err(|err| err.to_string())?;
    let records = collect(&mut connection, 1).await;
    if records.first().and_then(|record| record.outcome) != Some(Outcome::Success) {
        return Err(format!("Announced close should still succeed: {:?}", records));
    }
    if !connection.needs_reconnect() {
        return Err("connection: close should request a reconnect".to_owned());
    }
    match connection.reconnect().await {
        Err(ConnectionFailure::ReconnectFailed { connection: 0, .. }) => {}
        other => return Err(format!("Expected a failed reconnect, got {:?}", other)),
    }
    if connection.state() != ConnectionState::Abandoned {
        return Err("Connection should be abandoned".to_owned());
    }
    match connection.reconnect().await {
        Err(ConnectionFailure::Abandoned { .. }) => Ok(()),
        other => Err(format!("Abandoned connection must not reconnect: {:?}", other)),
    }
}

#[tokio::test]
async fn silent_server_times_requests_out() -> Result<(), String> {
    let server = TestServer::start(ServerOptions {
        reply: Reply::Silent,
        ..ServerOptions::default()
    })
    .await?;
    let config = config(&server.url("/"), 2)?;
    let mut connection = open(&config).await?;
    connection.send().await.map_err(|err| err.to_string())?;
    connection.send().await.map_err(|err| err.to_string())?;

    let started = Instant::now();
    let records = collect(&mut connection, 2).await;
    let timed_out = records
        .iter()
        .filter(|record| record.outcome == Some(Outcome::Failed(RequestErrorKind::Timeout)))
        .count();
    if timed_out != 2 {
        return Err(format!("Expected 2 timeouts, got {:?}", records));
    }
    if started.elapsed() > Duration::from_secs(2) {
        return Err("Timeout should fire after the configured I/O timeout".to_owned());
    }
    Ok(())
}

#[tokio::test]
async fn garbage_response_abandons_without_reconnect() -> Result<(), String> {
    let server = TestServer::start(ServerOptions {
        reply: Reply::Garbage,
        ..ServerOptions::default()
    })
    .await?;
    let config = config(&server.url("/"), 2)?;
    let mut connection = open(&config).await?;
    connection.send().await.map_err(|err| err.to_string())?;
    connection.send().await.map_err(|err| err.to_string())?;

    let records = collect(&mut connection, 2).await;
    let protocol = records
        .iter()
        .filter(|record| record.outcome == Some(Outcome::Failed(RequestErrorKind::Protocol)))
        .count();
    if protocol != 2 {
        return Err(format!("Expected 2 protocol failures, got {:?}", records));
    }
    if connection.state() != ConnectionState::Abandoned || connection.needs_reconnect() {
        return Err("Protocol violation must abandon the connection".to_owned());
    }
    match connection.take_failure() {
        Some(ConnectionFailure::Protocol { .. }) => {}
        other => return Err(format!("Expected a protocol failure, got {:?}", other)),
    }
    if server.accepted() != 1 {
        return Err(format!("No reconnect expected, server accepted {}", server.accepted()));
    }
    Ok(())
}

#[tokio::test]
async fn correlated_matching_survives_reordered_responses() -> Result<(), String> {
    let server = TestServer::start(ServerOptions {
        echo_header: Some("x-request-id"),
        reverse_batches: true,
        ..ServerOptions::default()
    })
    .await?;
    let config = RunConfig::builder(server.url("/"))
        .connections(1)
        .workers(1)
        .pipelining(4)
        .requests(100)
        .correlation_header("x-request-id")
        .build()
        .map_err(|err| err.to_string())?;
    let mut connection = open(&config).await?;
    while connection.admit() {
        connection.send().await.map_err(|err| err.to_string())?;
    }
    let records = collect(&mut connection, 4).await;
    let mut seqs: Vec<u64> = records
        .iter()
        .filter(|record| record.outcome == Some(Outcome::Success))
        .map(|record| record.seq)
        .collect();
    seqs.sort_unstable();
    if seqs != vec![0, 1, 2, 3] {
        return Err(format!("All four requests should succeed: {:?}", records));
    }
    Ok(())
}

#[tokio::test]
async fn worker_records_every_dispatched_request() -> Result<(), String> {
    use crate::metrics::Aggregator;
    use crate::runner::RequestBudget;
    use crate::shutdown::stop_channel;

    let server = TestServer::start(ServerOptions::default()).await?;
    let config = RunConfig::builder(server.url("/"))
        .connections(2)
        .workers(1)
        .pipelining(2)
        .requests(25)
        .build()
        .map_err(|err| err.to_string())?;
    let aggregator = Arc::new(Aggregator::new(&config).map_err(|err| err.to_string())?);
    let connector: Arc<dyn Connector> = Arc::from(connector_for(config.target()));
    let ctx = context(&config, connector);
    let mut pool = Vec::new();
    for index in 0..2 {
        pool.push(
            Connection::open(index, 0, Arc::clone(&ctx))
                .await
                .map_err(|err| err.to_string())?,
        );
    }
    let shared = WorkerShared {
        aggregator: Arc::clone(&aggregator),
        budget: Arc::new(RequestBudget::new(Some(25))),
        max_connection_requests: None,
    };
    let (_stop_tx, stop_rx) = stop_channel();
    let report = tokio::time::timeout(COLLECT_TIMEOUT, Worker::new(0, pool, shared).run(stop_rx))
        .await
        .map_err(|err| format!("Worker did not finish: {}", err))?;

    if report.dispatched != 25 || report.recorded != 25 || aggregator.completed() != 25 {
        return Err(format!(
            "Expected 25 dispatched and recorded, got {:?} / {}",
            report,
            aggregator.completed()
        ));
    }
    if server.requests() != 25 || server.max_unanswered() > 2 {
        return Err(format!(
            "Server saw {} requests, depth {}",
            server.requests(),
            server.max_unanswered()
        ));
    }
    Ok(())
}

#[tokio::test]
async fn tcp_connector_reaches_ipv6_literal_targets() -> Result<(), String> {
    let Ok(listener) = tokio::net::TcpListener::bind("[::1]:0").await else {
        // Host without IPv6 loopback.
        return Ok(());
    };
    let port = listener.local_addr().map_err(|err| err.to_string())?.port();
    let target =
        Target::parse(&format!("http://[::1]:{}/", port)).map_err(|err| err.to_string())?;
    let connector = connector_for(&target);
    if connector.describe() != format!("[::1]:{}", port) {
        return Err(format!("Unexpected destination: {}", connector.describe()));
    }
    connector
        .connect(Duration::from_secs(2))
        .await
        .map_err(|err| format!("IPv6 connect failed: {}", err))?;
    let (_accepted, peer) = tokio::time::timeout(Duration::from_secs(2), listener.accept())
        .await
        .map_err(|err| err.to_string())?
        .map_err(|err| err.to_string())?;
    if !peer.is_ipv6() {
        return Err(format!("Expected an IPv6 peer, got {}", peer));
    }
    Ok(())
}

/// Hands the server half of every in-memory stream to the test.
#[derive(Debug)]
struct DuplexConnector {
    peers: tokio::sync::mpsc::UnboundedSender<tokio::io::DuplexStream>,
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self, _connect_timeout: Duration) -> Result<BoxedStream, ConnectError> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.peers.send(server).map_err(|_closed| ConnectError::Io {
            target: self.describe(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no peer"),
        })?;
        Ok(Box::new(client))
    }

    fn describe(&self) -> String {
        "duplex".to_owned()
    }
}

#[tokio::test]
async fn failed_write_fails_the_request_and_resets_the_rest() -> Result<(), String> {
    let config = config("http://localhost/", 3)?;
    let (peers, mut accepted) = tokio::sync::mpsc::unbounded_channel();
    let connector: Arc<dyn Connector> = Arc::new(DuplexConnector { peers });
    let mut connection = Connection::open(0, 0, context(&config, connector))
        .await
        .map_err(|err| err.to_string())?;
    let server = accepted.recv().await.ok_or("Connector never handed out a peer")?;

    connection.send().await.map_err(|err| err.to_string())?;
    connection.send().await.map_err(|err| err.to_string())?;
    drop(server);
    match connection.send().await {
        Err(WriteError::Io { connection: 0, .. }) => {}
        other => return Err(format!("Expected a write error, got {:?}", other)),
    }

    let mut records = collect(&mut connection, 3).await;
    records.sort_by_key(|record| record.seq);
    let outcomes: Vec<(u64, Option<Outcome>)> = records
        .iter()
        .map(|record| (record.seq, record.outcome))
        .collect();
    let expected = vec![
        (0, Some(Outcome::Failed(RequestErrorKind::ConnectionReset))),
        (1, Some(Outcome::Failed(RequestErrorKind::ConnectionReset))),
        (2, Some(Outcome::Failed(RequestErrorKind::Write))),
    ];
    if outcomes != expected {
        return Err(format!("Unexpected outcomes: {:?}", outcomes));
    }
    if connection.depth() != 0 || !connection.needs_reconnect() {
        return Err("Failed write should drop the stream and ask for a reconnect".to_owned());
    }
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_target_completes_requests() -> Result<(), String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("volley.sock");
    let listener = tokio::net::UnixListener::bind(&path).map_err(|err| err.to_string())?;
    let server = tokio::spawn(async move {
        let (mut stream, _addr) = listener.accept().await?;
        let mut head = Vec::new();
        let mut chunk = [0_u8; 512];
        while !head.windows(4).any(|window| window == b"\r\n\r\n") {
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            head.extend_from_slice(chunk.get(..read).unwrap_or_default());
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nOK")
            .await?;
        stream.flush().await?;
        Ok::<_, std::io::Error>(head)
    });

    let config = RunConfig::builder("http://localhost/")
        .connections(1)
        .workers(1)
        .requests(1)
        .io_timeout(Duration::from_millis(500))
        .unix_socket(path.clone())
        .build()
        .map_err(|err| err.to_string())?;
    let mut connection = open(&config).await?;
    connection.send().await.map_err(|err| err.to_string())?;
    let records = collect(&mut connection, 1).await;
    if records.first().and_then(|record| record.outcome) != Some(Outcome::Success) {
        return Err(format!("Expected a success over the socket: {:?}", records));
    }

    let head = tokio::time::timeout(COLLECT_TIMEOUT, server)
        .await
        .map_err(|err| err.to_string())?
        .map_err(|err| err.to_string())?
        .map_err(|err| err.to_string())?;
    let text = String::from_utf8_lossy(&head);
    if !text.starts_with("GET / HTTP/1.1\r\n") || !text.contains("host: localhost\r\n") {
        return Err(format!("Unexpected request over the socket: {:?}", text));
    }
    Ok(())
}
