//! Client glue: request emission and the cache → pool → parser flow.
//!
//! One exchange: compute the fingerprint, probe the cache, on a miss check
//! a connection out of the pool, put the request on the wire, parse the
//! head, and hand the caller a streaming `Response`. Every failure path
//! between acquire and the parsed head retires the connection explicitly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;

use crate::cache::{CachedResponse, ResponseCache};
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::headers::{validate_header_name, validate_header_value};
use crate::pool::{ConnectionPool, Endpoint, PoolConfig, PooledConnection, PoolStats};
use crate::request::Request;
use crate::response::Response;
use crate::transport::conn::{Connector, TcpConnector};
use crate::transport::h1;

/// Builder for [`Client`].
pub struct ClientBuilder {
    connector: Option<Arc<dyn Connector>>,
    pool: PoolConfig,
    max_body_size: Option<u64>,
}

impl ClientBuilder {
    /// Use a custom connector (the embedding engine injects TLS here).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Cap on response body size; larger declared bodies are discarded
    /// before a single byte transfers.
    pub fn max_body_size(mut self, bytes: u64) -> Self {
        self.max_body_size = Some(bytes);
        self
    }

    /// Maximum concurrent connections per endpoint.
    pub fn max_per_endpoint(mut self, limit: usize) -> Self {
        self.pool.max_per_endpoint = limit;
        self
    }

    /// How long `acquire` waits for a connection slot.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool.acquire_timeout = timeout;
        self
    }

    /// Idle connections older than this are not reused.
    pub fn max_idle(mut self, max_idle: Duration) -> Self {
        self.pool.max_idle = max_idle;
        self
    }

    pub fn build(self) -> Client {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new()));
        Client {
            pool: ConnectionPool::with_config(connector, self.pool),
            cache: ResponseCache::new(),
            max_body_size: self.max_body_size,
        }
    }
}

/// Scanner-facing HTTP transport client.
pub struct Client {
    pool: ConnectionPool,
    cache: ResponseCache,
    max_body_size: Option<u64>,
}

impl Default for Client {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder {
            connector: None,
            pool: PoolConfig::default(),
            max_body_size: None,
        }
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// The connection pool, for direct acquire/release/retire and stats.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Perform one exchange, bypassing the cache. The returned response
    /// streams its body; the caller drives the cursor and closes it.
    pub async fn execute(&self, request: &Request) -> Result<Response> {
        let endpoint = Endpoint::from_url(request.url())?;
        let wire = emit_request(request)?;

        let started = Instant::now();
        let mut conn = self.pool.acquire(&endpoint).await?;

        if let Err(e) = write_request(&mut conn, &wire, request.body_bytes()).await {
            conn.retire("request write failed");
            return Err(e);
        }

        let mut buf = BytesMut::with_capacity(8192);
        let head = match h1::read_head(&mut conn, &mut buf, request.method()).await {
            Ok(head) => head,
            Err(e) => {
                conn.retire("response head parse failed");
                return Err(e);
            }
        };
        let wait = started.elapsed();

        Ok(Response::from_exchange(
            head,
            conn,
            buf,
            self.max_body_size,
            request.url().to_string(),
            wait,
        ))
    }

    /// Cache-fronted fetch: a hit never touches the pool; a miss performs
    /// the exchange, reads the body to completion and stores the snapshot.
    pub async fn fetch(&self, request: &Request) -> Result<Response> {
        let key = fingerprint(request)?;
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(%key, url = %request.url(), "response served from cache");
            return Ok(hit.into_response());
        }

        let mut response = self.execute(request).await?;
        let body = response.read(None).await?;
        response.close();

        let entry = CachedResponse::from_response(&response, body);
        self.cache.store(key, entry.clone());
        Ok(entry.into_response())
    }
}

async fn write_request(
    conn: &mut PooledConnection,
    head: &[u8],
    body: Option<&Bytes>,
) -> Result<()> {
    let stream = conn
        .stream_mut()
        .ok_or_else(|| Error::connection("connection already closed"))?;
    stream
        .write_all(head)
        .await
        .map_err(|e| Error::connection(format!("failed to write request: {}", e)))?;
    if let Some(body) = body {
        stream
            .write_all(body)
            .await
            .map_err(|e| Error::connection(format!("failed to write body: {}", e)))?;
    }
    stream
        .flush()
        .await
        .map_err(|e| Error::connection(format!("failed to flush request: {}", e)))?;
    Ok(())
}

/// Serialize a request head to HTTP/1.1 wire form.
///
/// Request line in origin-form, Host derived from the URL, then the primary
/// and unredirected headers in insertion order (duplicates preserved).
/// `Connection: keep-alive` is appended when the caller set no Connection
/// header, and Content-Length when a body is present without one.
pub(crate) fn emit_request(request: &Request) -> Result<Vec<u8>> {
    for (name, value) in request.all_headers() {
        validate_header_name(name)?;
        validate_header_value(value)?;
    }

    let url = request.url();
    let mut wire = Vec::with_capacity(1024);

    wire.extend_from_slice(request.method().as_str().as_bytes());
    wire.push(b' ');
    let path = url.path();
    wire.extend_from_slice(if path.is_empty() { b"/" } else { path.as_bytes() });
    if let Some(query) = url.query() {
        wire.push(b'?');
        wire.extend_from_slice(query.as_bytes());
    }
    wire.extend_from_slice(b" HTTP/1.1\r\n");

    wire.extend_from_slice(b"Host: ");
    if let Some(host) = url.host_str() {
        wire.extend_from_slice(host.as_bytes());
        if let Some(port) = url.port() {
            wire.push(b':');
            wire.extend_from_slice(port.to_string().as_bytes());
        }
    }
    wire.extend_from_slice(b"\r\n");

    let mut has_connection = false;
    let mut has_content_length = false;
    let mut has_transfer_encoding = false;
    for (name, value) in request.all_headers() {
        // the Host line is already emitted from the URL
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        if name.eq_ignore_ascii_case("connection") {
            has_connection = true;
        }
        if name.eq_ignore_ascii_case("content-length") {
            has_content_length = true;
        }
        if name.eq_ignore_ascii_case("transfer-encoding") {
            has_transfer_encoding = true;
        }
        wire.extend_from_slice(name.as_bytes());
        wire.extend_from_slice(b": ");
        wire.extend_from_slice(value.as_bytes());
        wire.extend_from_slice(b"\r\n");
    }

    if !has_connection {
        wire.extend_from_slice(b"Connection: keep-alive\r\n");
    }

    if let Some(body) = request.body_bytes() {
        if !has_content_length && !has_transfer_encoding {
            wire.extend_from_slice(b"Content-Length: ");
            wire.extend_from_slice(body.len().to_string().as_bytes());
            wire.extend_from_slice(b"\r\n");
        }
    }

    wire.extend_from_slice(b"\r\n");
    Ok(wire)
}
