//! HTTP/1.x response framing.
//!
//! Turns a pooled connection's byte stream into a structured response head
//! plus a streaming body reader, tolerating the protocol irregularities scan
//! targets actually produce: repeated header keys, nonsensical
//! Content-Length values, interim 100 responses, HTTP/0.9 throwbacks.
//!
//! Framing outcomes drive the pool. A body that ends cleanly on a keep-alive
//! connection releases it for reuse; a framing error, a will-close verdict or
//! an unconsumed body retires it. No code path leaves a half-read stream in
//! the idle set.

use bytes::{Buf, Bytes, BytesMut};
use http::Method;
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};
use crate::headers::HeaderMap;
use crate::pool::PooledConnection;
use crate::version::HttpVersion;

/// Maximum response head size (64KB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

/// Buffered readline pull size.
const RBUF_SIZE: usize = 8096;

/// Stream pull size.
const READ_CHUNK: usize = 8192;

/// Parsed status line, merged headers and framing verdicts for one response.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub version: HttpVersion,
    pub headers: HeaderMap,
    pub chunked: bool,
    pub length: Option<u64>,
    pub will_close: bool,
}

/// Read and parse a response head from the connection.
///
/// Interim `100 Continue` responses are consumed silently: their header
/// block is discarded and the next status line is parsed in their place.
/// Bytes read past the head remain in `buf` for the body reader.
pub(crate) async fn read_head(
    conn: &mut PooledConnection,
    buf: &mut BytesMut,
    method: &Method,
) -> Result<ResponseHead> {
    loop {
        let line = read_head_line(conn, buf).await?;
        let (token, status, reason) = parse_status_line(&line)?;
        let version = HttpVersion::from_token(&token)?;

        if version == HttpVersion::Http09 {
            // no headers at all; the body runs to EOF and the connection
            // cannot be reused
            return Ok(ResponseHead {
                status,
                reason,
                version,
                headers: HeaderMap::empty(),
                chunked: false,
                length: None,
                will_close: true,
            });
        }

        if status == 100 {
            read_header_block(conn, buf).await?;
            continue;
        }

        let headers = HeaderMap::from_lines(read_header_block(conn, buf).await?);
        let (chunked, length, will_close) = decide_framing(&headers, version, status, method);
        return Ok(ResponseHead {
            status,
            reason,
            version,
            headers,
            chunked,
            length,
            will_close,
        });
    }
}

/// Split a status line into (protocol token, status code, reason phrase).
fn parse_status_line(line: &str) -> Result<(String, u16, String)> {
    let mut parts = line.trim_end().splitn(3, ' ');
    let token = parts.next().unwrap_or("").to_string();
    let status_part = parts
        .next()
        .ok_or_else(|| Error::framing(format!("malformed status line {:?}", line)))?;
    let reason = parts.next().unwrap_or("").trim().to_string();

    if status_part.len() != 3 || !status_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::framing(format!("invalid status code {:?}", status_part)));
    }
    let status = status_part
        .parse::<u16>()
        .map_err(|_| Error::framing(format!("invalid status code {:?}", status_part)))?;
    Ok((token, status, reason))
}

/// Read one head line (terminated by LF, optional CR stripped).
async fn read_head_line(conn: &mut PooledConnection, buf: &mut BytesMut) -> Result<String> {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let mut line = buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        if buf.len() >= MAX_HEAD_SIZE {
            return Err(Error::framing("status line too long"));
        }
        if fill(conn, buf).await? == 0 {
            return Err(Error::framing("connection closed before status line"));
        }
    }
}

/// Read a complete header block (through the terminating empty line) and
/// return the raw (name, value) lines in arrival order.
async fn read_header_block(
    conn: &mut PooledConnection,
    buf: &mut BytesMut,
) -> Result<Vec<(String, String)>> {
    loop {
        let parsed = {
            let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
            match httparse::parse_headers(buf, &mut slots) {
                Ok(httparse::Status::Complete((consumed, headers))) => {
                    let lines: Vec<(String, String)> = headers
                        .iter()
                        .filter(|h| !h.name.is_empty())
                        .map(|h| {
                            (
                                h.name.to_string(),
                                String::from_utf8_lossy(h.value).trim().to_string(),
                            )
                        })
                        .collect();
                    Some((consumed, lines))
                }
                Ok(httparse::Status::Partial) => None,
                Err(e) => return Err(Error::framing(format!("malformed headers: {}", e))),
            }
        };
        if let Some((consumed, lines)) = parsed {
            buf.advance(consumed);
            return Ok(lines);
        }
        if buf.len() >= MAX_HEAD_SIZE {
            return Err(Error::framing("response headers too large"));
        }
        if fill(conn, buf).await? == 0 {
            return Err(Error::framing("connection closed inside response headers"));
        }
    }
}

/// Determine (chunked, length, will_close) for a parsed head.
///
/// Length rules: chunked framing wins over any Content-Length; an
/// unparsable or negative Content-Length means "length unknown", not an
/// error; statuses with a mandated empty body (204, 304, 1xx) and responses
/// to HEAD force length zero regardless of headers. A response with no
/// end-of-body marker at all falls back to close-delimited framing.
pub(crate) fn decide_framing(
    headers: &HeaderMap,
    version: HttpVersion,
    status: u16,
    method: &Method,
) -> (bool, Option<u64>, bool) {
    let chunked = headers
        .get("transfer-encoding")
        .map(|v| v.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);

    let mut will_close = check_close(headers, version);

    let mut length = None;
    if !chunked {
        if let Some(value) = headers.get("content-length") {
            length = value
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|n| u64::try_from(n).ok());
        }
    }

    if status == 204 || status == 304 || (100..200).contains(&status) || *method == Method::HEAD {
        length = Some(0);
    }

    if !will_close && !chunked && length.is_none() {
        will_close = true;
    }

    (chunked, length, will_close)
}

/// Will the connection close after this response?
///
/// Evaluated strictly in order; later rules apply only when no earlier rule
/// decided:
/// 1. `Keep-Alive: ...max=1` closes (we quit right before the deadline)
/// 2. `Connection` containing "keep-alive" stays open
/// 3. `Connection` containing "close" closes
/// 4. HTTP/1.1 defaults to staying open
/// 5. `Proxy-Connection: keep-alive` (legacy netscape hack) stays open
/// 6. otherwise close
pub(crate) fn check_close(headers: &HeaderMap, version: HttpVersion) -> bool {
    if let Some(keep_alive) = headers.get("keep-alive") {
        if keep_alive.to_ascii_lowercase().ends_with("max=1") {
            tracing::debug!("will close due to Keep-Alive max=1");
            return true;
        }
    }

    if let Some(conn) = headers.get("connection") {
        let conn = conn.to_ascii_lowercase();
        if conn.contains("keep-alive") {
            return false;
        }
        if conn.contains("close") {
            return true;
        }
    }

    if version == HttpVersion::Http11 {
        return false;
    }

    if let Some(pconn) = headers.get("proxy-connection") {
        if pconn.to_ascii_lowercase().contains("keep-alive") {
            return false;
        }
    }

    true
}

/// Body framing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// Mandated-empty body (HEAD, 204, 304, 1xx, zero length, discarded).
    Empty,
    /// Exactly `remaining` bytes follow.
    Length,
    /// Chunk-framed body.
    Chunked,
    /// Body runs until the server closes the connection.
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    Size,
    Data,
    DataEnd,
    Trailers,
}

/// Streaming body cursor over a pooled connection.
///
/// Owns the connection for the duration of the body and hands it back to
/// the pool exactly once: released when the body completed cleanly on a
/// keep-alive exchange, retired otherwise (including drop mid-read).
pub(crate) struct BodyReader {
    conn: Option<PooledConnection>,
    /// Undecoded wire bytes.
    raw: BytesMut,
    /// Decoded bytes buffered for readline and short reads.
    pushback: BytesMut,
    framing: Framing,
    /// Length mode: body bytes outstanding. Chunked data phase: bytes left
    /// in the current chunk.
    remaining: u64,
    chunk_phase: ChunkPhase,
    will_close: bool,
    poisoned: bool,
    complete: bool,
}

impl BodyReader {
    pub(crate) fn new(
        conn: PooledConnection,
        leftover: BytesMut,
        chunked: bool,
        length: Option<u64>,
        will_close: bool,
    ) -> Self {
        let (framing, remaining) = if length == Some(0) {
            (Framing::Empty, 0)
        } else if chunked {
            (Framing::Chunked, 0)
        } else if let Some(n) = length {
            (Framing::Length, n)
        } else {
            (Framing::UntilClose, 0)
        };
        let mut reader = Self {
            conn: Some(conn),
            raw: leftover,
            pushback: BytesMut::new(),
            framing,
            remaining,
            chunk_phase: ChunkPhase::Size,
            will_close,
            poisoned: false,
            complete: framing == Framing::Empty,
        };
        if reader.complete {
            // nothing on the wire for this body; the connection is decided
            // (reusable or not) right now
            reader.finish();
        }
        reader
    }

    /// A reader with no connection behind it: cache hits and replaced
    /// bodies. The buffered bytes are the whole body.
    pub(crate) fn detached(body: Bytes) -> Self {
        Self {
            conn: None,
            raw: BytesMut::new(),
            pushback: BytesMut::from(&body[..]),
            framing: Framing::Empty,
            remaining: 0,
            chunk_phase: ChunkPhase::Size,
            will_close: true,
            poisoned: false,
            complete: true,
        }
    }

    pub(crate) fn will_close(&self) -> bool {
        self.will_close
    }

    /// Read up to `amount` body bytes, or the whole remaining body when
    /// `None`. Returns an empty buffer once the body is exhausted.
    pub(crate) async fn read(&mut self, amount: Option<usize>) -> Result<Bytes> {
        match amount {
            Some(n) => {
                if !self.pushback.is_empty() {
                    let take = n.min(self.pushback.len());
                    return Ok(self.pushback.split_to(take).freeze());
                }
                self.pull(n).await
            }
            None => {
                let mut all = std::mem::take(&mut self.pushback);
                loop {
                    let chunk = self.pull(READ_CHUNK).await?;
                    if chunk.is_empty() {
                        break;
                    }
                    all.extend_from_slice(&chunk);
                }
                Ok(all.freeze())
            }
        }
    }

    /// Read one line, scanning already-buffered bytes before pulling more.
    /// `limit` bounds the returned line length in bytes.
    pub(crate) async fn readline(&mut self, limit: Option<usize>) -> Result<Bytes> {
        let mut newline = self.pushback.iter().position(|&b| b == b'\n');
        while newline.is_none() {
            if let Some(limit) = limit {
                if limit > 0 && self.pushback.len() >= limit {
                    break;
                }
            }
            let chunk = self.pull(RBUF_SIZE).await?;
            if chunk.is_empty() {
                break;
            }
            newline = chunk
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| self.pushback.len() + i);
            self.pushback.extend_from_slice(&chunk);
        }
        let mut end = match newline {
            Some(i) => i + 1,
            None => self.pushback.len(),
        };
        if let Some(limit) = limit {
            if limit < end {
                end = limit;
            }
        }
        Ok(self.pushback.split_to(end).freeze())
    }

    /// Read lines until the body is exhausted or `sizehint` bytes were
    /// collected.
    pub(crate) async fn readlines(&mut self, sizehint: Option<usize>) -> Result<Vec<Bytes>> {
        let mut total = 0;
        let mut lines = Vec::new();
        loop {
            let line = self.readline(None).await?;
            if line.is_empty() {
                break;
            }
            total += line.len();
            lines.push(line);
            if let Some(hint) = sizehint {
                if hint > 0 && total >= hint {
                    break;
                }
            }
        }
        Ok(lines)
    }

    /// Replace the buffered body wholesale. Any unread wire bytes are
    /// abandoned together with the connection.
    pub(crate) fn set_body(&mut self, data: Bytes) {
        if !self.complete {
            if let Some(conn) = self.conn.take() {
                conn.retire("body replaced before being fully read");
            }
            self.complete = true;
        }
        self.pushback = BytesMut::from(&data[..]);
    }

    /// Finish the exchange, handing the connection back to the pool.
    pub(crate) fn close(&mut self) {
        self.finish();
    }

    /// Finish the exchange and force the connection to be torn down even if
    /// it would have been reusable.
    pub(crate) fn close_connection(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.retire("caller forced connection close");
        }
    }

    /// Hand the connection back exactly once: released only for a cleanly
    /// completed body on a keep-alive exchange.
    fn finish(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.poisoned {
                conn.retire("framing error");
            } else if self.will_close {
                conn.retire("close-after-response");
            } else if !self.complete {
                conn.retire("body not fully consumed");
            } else {
                conn.release();
            }
        }
    }

    /// Framing-aware pull that retires the connection before any error
    /// propagates to the caller.
    async fn pull(&mut self, limit: usize) -> Result<Bytes> {
        if self.complete || limit == 0 {
            return Ok(Bytes::new());
        }
        match self.read_framed(limit).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                self.poisoned = true;
                self.finish();
                Err(e)
            }
        }
    }

    async fn read_framed(&mut self, limit: usize) -> Result<Bytes> {
        loop {
            match self.framing {
                Framing::Empty => {
                    self.complete = true;
                    self.finish();
                    return Ok(Bytes::new());
                }
                Framing::Length => {
                    if self.raw.is_empty() {
                        if self.fill_raw().await? == 0 {
                            return Err(Error::framing(format!(
                                "connection closed with {} body bytes outstanding",
                                self.remaining
                            )));
                        }
                        continue;
                    }
                    let take = self
                        .remaining
                        .min(limit as u64)
                        .min(self.raw.len() as u64) as usize;
                    self.remaining -= take as u64;
                    let out = self.raw.split_to(take).freeze();
                    if self.remaining == 0 {
                        self.complete = true;
                        self.finish();
                    }
                    return Ok(out);
                }
                Framing::UntilClose => {
                    if self.raw.is_empty() {
                        if self.fill_raw().await? == 0 {
                            self.complete = true;
                            self.finish();
                            return Ok(Bytes::new());
                        }
                        continue;
                    }
                    let take = limit.min(self.raw.len());
                    return Ok(self.raw.split_to(take).freeze());
                }
                Framing::Chunked => match self.read_chunked(limit).await? {
                    Some(out) => return Ok(out),
                    None => {
                        self.complete = true;
                        self.finish();
                        return Ok(Bytes::new());
                    }
                },
            }
        }
    }

    /// Advance the chunk state machine. Returns `None` once the terminating
    /// chunk and trailers have been consumed.
    async fn read_chunked(&mut self, limit: usize) -> Result<Option<Bytes>> {
        loop {
            match self.chunk_phase {
                ChunkPhase::Size => {
                    let line = self.read_raw_line("chunk size").await?;
                    let text = String::from_utf8_lossy(&line);
                    // chunk extensions after ';' are ignored
                    let size_part = text.split(';').next().unwrap_or("").trim();
                    let size = u64::from_str_radix(size_part, 16).map_err(|_| {
                        Error::framing(format!("invalid chunk size {:?}", size_part))
                    })?;
                    if size == 0 {
                        self.chunk_phase = ChunkPhase::Trailers;
                    } else {
                        self.remaining = size;
                        self.chunk_phase = ChunkPhase::Data;
                    }
                }
                ChunkPhase::Data => {
                    if self.raw.is_empty() {
                        if self.fill_raw().await? == 0 {
                            return Err(Error::framing("connection closed inside chunk data"));
                        }
                        continue;
                    }
                    let take = self
                        .remaining
                        .min(limit as u64)
                        .min(self.raw.len() as u64) as usize;
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.chunk_phase = ChunkPhase::DataEnd;
                    }
                    return Ok(Some(self.raw.split_to(take).freeze()));
                }
                ChunkPhase::DataEnd => {
                    while self.raw.len() < 2 {
                        if self.fill_raw().await? == 0 {
                            return Err(Error::framing("connection closed at chunk boundary"));
                        }
                    }
                    if &self.raw[..2] != b"\r\n" {
                        return Err(Error::framing("missing CRLF after chunk data"));
                    }
                    self.raw.advance(2);
                    self.chunk_phase = ChunkPhase::Size;
                }
                ChunkPhase::Trailers => loop {
                    let line = match self.read_raw_line_eof_ok().await? {
                        Some(line) => line,
                        None => {
                            // stream ended without the final CRLF; the body
                            // is done but the connection is not reusable
                            self.will_close = true;
                            return Ok(None);
                        }
                    };
                    if line.is_empty() {
                        return Ok(None);
                    }
                },
            }
        }
    }

    /// Read one LF-terminated line from the raw stream; EOF is an error.
    async fn read_raw_line(&mut self, what: &str) -> Result<BytesMut> {
        match self.try_read_raw_line(what).await? {
            Some(line) => Ok(line),
            None => Err(Error::framing(format!("connection closed reading {}", what))),
        }
    }

    /// Read one LF-terminated line; EOF yields `None`.
    async fn read_raw_line_eof_ok(&mut self) -> Result<Option<BytesMut>> {
        self.try_read_raw_line("trailers").await
    }

    async fn try_read_raw_line(&mut self, what: &str) -> Result<Option<BytesMut>> {
        loop {
            if let Some(pos) = self.raw.iter().position(|&b| b == b'\n') {
                let mut line = self.raw.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(line));
            }
            if self.raw.len() >= MAX_HEAD_SIZE {
                return Err(Error::framing(format!("{} line too long", what)));
            }
            if self.fill_raw().await? == 0 {
                return Ok(None);
            }
        }
    }

    async fn fill_raw(&mut self) -> Result<usize> {
        let stream = match self.conn.as_mut().and_then(|c| c.stream_mut()) {
            Some(stream) => stream,
            None => return Ok(0),
        };
        let mut chunk = [0u8; READ_CHUNK];
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| Error::connection(format!("body read failed: {}", e)))?;
        self.raw.extend_from_slice(&chunk[..n]);
        Ok(n)
    }
}

async fn fill(conn: &mut PooledConnection, buf: &mut BytesMut) -> Result<usize> {
    let stream = conn
        .stream_mut()
        .ok_or_else(|| Error::connection("connection already closed"))?;
    let mut chunk = [0u8; READ_CHUNK];
    let n = stream
        .read(&mut chunk)
        .await
        .map_err(|e| Error::connection(format!("read failed: {}", e)))?;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}
