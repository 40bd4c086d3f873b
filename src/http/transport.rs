use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;

use crate::domain::{Target, bracket_host};
use crate::error::ConnectError;

/// Byte stream a connection runs over.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn Stream>;

/// Opens byte streams to the target. Tests substitute their own.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Opens one stream, giving up after `connect_timeout`.
    async fn connect(&self, connect_timeout: Duration) -> Result<BoxedStream, ConnectError>;

    /// Human readable destination for logs and errors.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, connect_timeout: Duration) -> Result<BoxedStream, ConnectError> {
        let target = self.describe();
        let attempt = async {
            let addrs: Vec<_> = lookup_host((self.host.as_str(), self.port))
                .await
                .map_err(|source| ConnectError::Resolve {
                    target: target.clone(),
                    source,
                })?
                .collect();
            if addrs.is_empty() {
                return Err(ConnectError::NoAddresses {
                    target: target.clone(),
                });
            }
            let mut last_error = None;
            for addr in addrs {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        stream
                            .set_nodelay(true)
                            .map_err(|source| ConnectError::Io {
                                target: target.clone(),
                                source,
                            })?;
                        return Ok(Box::new(stream) as BoxedStream);
                    }
                    Err(err) => last_error = Some(err),
                }
            }
            Err(last_error.map_or_else(
                || ConnectError::NoAddresses {
                    target: target.clone(),
                },
                |source| ConnectError::Io {
                    target: target.clone(),
                    source,
                },
            ))
        };
        match timeout(connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ConnectError::TimedOut {
                target,
                timeout_ms: u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn describe(&self) -> String {
        format!("{}:{}", bracket_host(&self.host), self.port)
    }
}

/// Connects over a Unix domain socket instead of TCP.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Connector for UnixConnector {
    #[cfg(unix)]
    async fn connect(&self, connect_timeout: Duration) -> Result<BoxedStream, ConnectError> {
        let target = self.describe();
        match timeout(connect_timeout, tokio::net::UnixStream::connect(&self.path)).await {
            Ok(Ok(stream)) => Ok(Box::new(stream)),
            Ok(Err(source)) => Err(ConnectError::Io { target, source }),
            Err(_elapsed) => Err(ConnectError::TimedOut {
                target,
                timeout_ms: u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    #[cfg(not(unix))]
    async fn connect(&self, _connect_timeout: Duration) -> Result<BoxedStream, ConnectError> {
        Err(ConnectError::UnixSocketUnsupported)
    }

    fn describe(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

/// Picks the connector a target needs.
#[must_use]
pub fn connector_for(target: &Target) -> Box<dyn Connector> {
    match target.unix_socket() {
        Some(path) => Box::new(UnixConnector::new(path.clone())),
        None => Box::new(TcpConnector::new(target.host(), target.port())),
    }
}
