//! HTTP/1.1 over raw streams: request framing, response parsing, pipelined
//! connections and the workers that drive them.
mod codec;
mod connection;
mod pipeliner;
mod transport;
mod worker;

#[cfg(test)]
mod tests;
#[cfg(test)]
pub(crate) mod test_server;

pub use codec::{FramedTemplate, ParsedResponse, ResponseParser};
pub use connection::{Connection, ConnectionContext, ConnectionState};
pub use pipeliner::Pipeliner;
pub use transport::{BoxedStream, Connector, Stream, TcpConnector, UnixConnector, connector_for};
pub use worker::{POLL_INTERVAL, Worker, WorkerReport, WorkerShared};

#[cfg(test)]
pub(crate) use codec::{DEFAULT_USER_AGENT, MAX_HEAD_BYTES};
