//! Raw transport streams and the connector seam.
//!
//! The pool only reads, writes and closes bytes; how a stream comes to exist
//! (plain TCP here, TLS or anything else in the embedding engine) is hidden
//! behind the `Connector` trait. TLS certificate handling and DNS policy are
//! explicitly not this crate's business.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::pool::Endpoint;

/// Marker trait for anything the parser can treat as a connection stream.
pub trait Transport: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> Transport for T {}

/// Opaque byte stream handed out by the pool.
pub type TransportStream = Box<dyn Transport>;

/// Boxed future returned by connector implementations.
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<TransportStream>> + Send + 'a>>;

/// Opens a fresh stream to an endpoint.
///
/// Implementations must surface connect-level failures (refusal, timeout,
/// handshake) as `Error::Connection` and never retry internally.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> ConnectFuture<'a>;
}

/// Plain-TCP connector with scanner-oriented socket tuning.
///
/// Scanners are latency-bound on many small request/response exchanges, so
/// Nagle is disabled and TCP keepalive probes keep long-idle pool entries
/// from silently dying at NAT boxes.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
    pub nodelay: bool,
    pub keepalive: Option<Duration>,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            nodelay: true,
            keepalive: Some(Duration::from_secs(30)),
        }
    }
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(&self, stream: &TcpStream) -> std::io::Result<()> {
        let sock = SockRef::from(stream);
        sock.set_nodelay(self.nodelay)?;
        if let Some(interval) = self.keepalive {
            let keepalive = socket2::TcpKeepalive::new().with_time(interval);
            sock.set_tcp_keepalive(&keepalive)?;
        }
        Ok(())
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> ConnectFuture<'a> {
        Box::pin(async move {
            if endpoint.is_https {
                // TLS stream construction is the embedding engine's job; a
                // bare TCP connector cannot satisfy an https endpoint.
                return Err(Error::connection(format!(
                    "no TLS connector configured for {}",
                    endpoint
                )));
            }
            let addr = (endpoint.host.as_str(), endpoint.port);
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    Error::connection(format!(
                        "connect timeout after {:?} to {}",
                        self.connect_timeout, endpoint
                    ))
                })?
                .map_err(|e| Error::connection(format!("connect to {} failed: {}", endpoint, e)))?;
            self.configure(&stream)
                .map_err(|e| Error::connection(format!("socket setup for {} failed: {}", endpoint, e)))?;
            Ok(Box::new(stream) as TransportStream)
        })
    }
}
