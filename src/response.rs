//! HTTP response surface handed to scan plugins.
//!
//! A response owns its pooled connection through the body reader instead of
//! extending any client type; read/readline/close are the whole operation
//! set. Headers are merged once at parse time and never change afterwards.

use std::time::Duration;

use bytes::Bytes;
use bytes::BytesMut;

use crate::error::Result;
use crate::headers::HeaderMap;
use crate::pool::PooledConnection;
use crate::transport::h1::{BodyReader, ResponseHead};
use crate::version::HttpVersion;

/// One parsed response for one request/response exchange.
pub struct Response {
    status: u16,
    reason: String,
    version: HttpVersion,
    headers: HeaderMap,
    url: String,
    body: BodyReader,
    encoding: Option<String>,
    wait_time: Option<Duration>,
    discarded: bool,
}

impl Response {
    /// Build a response over a live connection after its head was parsed.
    ///
    /// The size guard runs here, before a single body byte transfers: a
    /// declared Content-Length over `max_body_size` discards the body,
    /// coerces the status to 204 and retires the connection. Callers that
    /// must distinguish this from a genuine 204 check `body_discarded()`
    /// (or the original headers, which are kept intact).
    pub(crate) fn from_exchange(
        head: ResponseHead,
        conn: PooledConnection,
        leftover: BytesMut,
        max_body_size: Option<u64>,
        url: String,
        wait_time: Duration,
    ) -> Self {
        let ResponseHead {
            status,
            reason,
            version,
            headers,
            chunked,
            length,
            will_close,
        } = head;

        if let (Some(max), Some(len)) = (max_body_size, length) {
            if len > max {
                tracing::warn!(declared = len, max, %url, "response exceeds size cap, discarding body");
                conn.retire("oversized response");
                return Self {
                    status: 204,
                    reason: "No Content".to_string(),
                    version,
                    headers,
                    url,
                    body: BodyReader::detached(Bytes::new()),
                    encoding: None,
                    wait_time: Some(wait_time),
                    discarded: true,
                };
            }
        }

        Self {
            status,
            reason,
            version,
            headers,
            url,
            body: BodyReader::new(conn, leftover, chunked, length, will_close),
            encoding: None,
            wait_time: Some(wait_time),
            discarded: false,
        }
    }

    /// Build a response from a cached snapshot; no connection is involved.
    pub(crate) fn from_cached(
        status: u16,
        reason: String,
        version: HttpVersion,
        headers: HeaderMap,
        url: String,
        body: Bytes,
        discarded: bool,
    ) -> Self {
        Self {
            status,
            reason,
            version,
            headers,
            url,
            body: BodyReader::detached(body),
            encoding: None,
            wait_time: None,
            discarded,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// Merged response headers: each key maps to exactly one combined value.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The URL this response was fetched from.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Whether the server mandated closing the connection after this
    /// response.
    pub fn will_close(&self) -> bool {
        self.body.will_close()
    }

    /// True when the body was discarded by the size guard and the 204
    /// status is synthetic.
    pub fn body_discarded(&self) -> bool {
        self.discarded
    }

    /// Text-encoding tag for later decoding by the caller. This crate never
    /// decodes text itself.
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn set_encoding(&mut self, encoding: impl Into<String>) {
        self.encoding = Some(encoding.into());
    }

    /// Time from starting the exchange (pool wait included) to the parsed
    /// response head. `None` for cache hits.
    pub fn wait_time(&self) -> Option<Duration> {
        self.wait_time
    }

    pub fn set_wait_time(&mut self, wait: Duration) {
        self.wait_time = Some(wait);
    }

    /// Read up to `amount` body bytes (the whole remaining body when
    /// `None`). Returns an empty buffer at end of body. A failed read
    /// retires the connection before the error reaches the caller.
    pub async fn read(&mut self, amount: Option<usize>) -> Result<Bytes> {
        self.body.read(amount).await
    }

    /// Read the entire remaining body.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        self.body.read(None).await
    }

    /// Read one line, bounded by `limit` bytes when given.
    pub async fn readline(&mut self, limit: Option<usize>) -> Result<Bytes> {
        self.body.readline(limit).await
    }

    /// Read lines until end of body, or until roughly `sizehint` bytes.
    pub async fn readlines(&mut self, sizehint: Option<usize>) -> Result<Vec<Bytes>> {
        self.body.readlines(sizehint).await
    }

    /// Replace the buffered body (mangle plugins rewrite responses before
    /// handing them on).
    pub fn set_body(&mut self, data: impl Into<Bytes>) {
        self.body.set_body(data.into());
    }

    /// Finish the exchange. The connection is released for reuse when the
    /// body completed cleanly on a keep-alive exchange, torn down otherwise.
    /// Idempotent.
    pub fn close(&mut self) {
        self.body.close();
    }

    /// Finish the exchange and force the connection to be torn down even if
    /// it would have been reusable.
    pub fn close_connection(&mut self) {
        self.body.close_connection();
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        // an abandoned response must not leak its connection slot; finish
        // decides release vs retire from the framing state
        self.body.close();
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("version", &self.version)
            .field("url", &self.url)
            .field("will_close", &self.will_close())
            .field("discarded", &self.discarded)
            .finish()
    }
}
