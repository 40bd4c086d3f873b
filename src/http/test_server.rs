//! Scriptable HTTP/1.1 server for exercising connections against real
//! sockets.
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    /// Answer every request.
    Normal,
    /// Read requests but never answer.
    Silent,
    /// Answer with bytes that are not HTTP.
    Garbage,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerOptions {
    pub(crate) reply: Reply,
    pub(crate) delay: Duration,
    pub(crate) status: u16,
    pub(crate) body: &'static str,
    /// Close each connection after this many responses.
    pub(crate) close_after: Option<u64>,
    /// Send `Connection: close` on the response before closing.
    pub(crate) announce_close: bool,
    /// Stop accepting (and refuse new connections) after this many accepts.
    pub(crate) max_accepts: Option<usize>,
    /// Echo this request header back on the response.
    pub(crate) echo_header: Option<&'static str>,
    /// Answer each batch of pipelined requests in reverse order.
    pub(crate) reverse_batches: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            reply: Reply::Normal,
            delay: Duration::ZERO,
            status: 200,
            body: "ok",
            close_after: None,
            announce_close: false,
            max_accepts: None,
            echo_header: None,
            reverse_batches: false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ServerStats {
    pub(crate) accepted: AtomicUsize,
    pub(crate) requests: AtomicU64,
    pub(crate) responses: AtomicU64,
    /// Largest number of requests seen on one connection before answering.
    pub(crate) max_unanswered: AtomicU64,
}

#[derive(Debug)]
pub(crate) struct TestServer {
    pub(crate) addr: SocketAddr,
    pub(crate) stats: Arc<ServerStats>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub(crate) async fn start(options: ServerOptions) -> Result<Self, String> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|err| format!("bind failed: {}", err))?;
        let addr = listener
            .local_addr()
            .map_err(|err| format!("local_addr failed: {}", err))?;
        let stats = Arc::new(ServerStats::default());
        let task = tokio::spawn(accept_loop(listener, options, Arc::clone(&stats)));
        Ok(Self { addr, stats, task })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub(crate) fn requests(&self) -> u64 {
        self.stats.requests.load(Ordering::SeqCst)
    }

    pub(crate) fn accepted(&self) -> usize {
        self.stats.accepted.load(Ordering::SeqCst)
    }

    pub(crate) fn max_unanswered(&self) -> u64 {
        self.stats.max_unanswered.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An address nothing listens on.
pub(crate) async fn refused_addr() -> Result<SocketAddr, String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|err| format!("bind failed: {}", err))?;
    listener
        .local_addr()
        .map_err(|err| format!("local_addr failed: {}", err))
}

async fn accept_loop(listener: TcpListener, options: ServerOptions, stats: Arc<ServerStats>) {
    loop {
        let Ok((stream, _peer)) = listener.accept().await else {
            return;
        };
        let accepted = stats.accepted.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        tokio::spawn(serve(stream, options.clone(), Arc::clone(&stats)));
        if options.max_accepts.is_some_and(|max| accepted >= max) {
            return;
        }
    }
}

async fn serve(mut stream: TcpStream, options: ServerOptions, stats: Arc<ServerStats>) {
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let mut answered = 0u64;

    loop {
        let read = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(read) => read,
        };
        buf.extend_from_slice(chunk.get(..read).unwrap_or_default());

        let mut batch = Vec::new();
        while let Some(request) = take_request(&mut buf, options.echo_header) {
            stats.requests.fetch_add(1, Ordering::SeqCst);
            batch.push(request);
        }
        let unanswered = u64::try_from(batch.len()).unwrap_or(u64::MAX);
        stats.max_unanswered.fetch_max(unanswered, Ordering::SeqCst);

        match options.reply {
            Reply::Silent => continue,
            Reply::Garbage => {
                if !batch.is_empty() {
                    drop(stream.write_all(b"NOT-HTTP garbage\r\n\r\n").await);
                }
                continue;
            }
            Reply::Normal => {}
        }

        if options.reverse_batches {
            batch.reverse();
        }
        for request in batch {
            if !options.delay.is_zero() {
                sleep(options.delay).await;
            }
            answered = answered.saturating_add(1);
            let closing = options.close_after.is_some_and(|limit| answered >= limit);
            let response = render_response(&options, &request, closing && options.announce_close);
            if stream.write_all(response.as_bytes()).await.is_err() {
                return;
            }
            stats.responses.fetch_add(1, Ordering::SeqCst);
            if closing {
                drop(stream.shutdown().await);
                return;
            }
        }
    }
}

#[derive(Debug)]
struct ReceivedRequest {
    echo: Option<String>,
    head_only: bool,
}

fn take_request(buf: &mut Vec<u8>, echo_header: Option<&str>) -> Option<ReceivedRequest> {
    let end = buf.windows(4).position(|window| window == b"\r\n\r\n")?;
    let head_len = end.saturating_add(4);
    let head = String::from_utf8_lossy(buf.get(..head_len)?).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let total = head_len.saturating_add(content_length);
    if buf.len() < total {
        return None;
    }
    buf.drain(..total);

    let echo = echo_header.and_then(|wanted| {
        head.lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value.trim().to_owned())
    });
    Some(ReceivedRequest {
        echo,
        head_only: head.starts_with("HEAD "),
    })
}

fn render_response(options: &ServerOptions, request: &ReceivedRequest, close: bool) -> String {
    let mut response = format!(
        "HTTP/1.1 {} OK\r\ncontent-length: {}\r\n",
        options.status,
        options.body.len()
    );
    if let (Some(header), Some(value)) = (options.echo_header, request.echo.as_ref()) {
        response.push_str(&format!("{}: {}\r\n", header, value));
    }
    if close {
        response.push_str("connection: close\r\n");
    }
    response.push_str("\r\n");
    if !request.head_only {
        response.push_str(options.body);
    }
    response
}
