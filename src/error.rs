//! Error types for the strix transport.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during HTTP transport operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request data cannot be represented on the wire (embedded CR/LF/NUL
    /// or a malformed header name). Raised by the fingerprint function and
    /// the request serializer instead of silently mangling the data.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Status line carried a protocol token other than HTTP/0.9, HTTP/1.0
    /// or HTTP/1.x. Fatal for the exchange; the connection is retired.
    #[error("unknown protocol {0:?}")]
    UnknownProtocol(String),

    /// Malformed or truncated HTTP framing (bad chunk size, truncated
    /// headers or body). The connection is retired before this propagates.
    #[error("framing error: {0}")]
    Framing(String),

    /// Transport-level failure during connect, read or write. Never retried
    /// inside this crate; retry policy belongs to the scan scheduler.
    #[error("connection error: {0}")]
    Connection(String),

    /// No connection slot became available within the allowed wait.
    #[error("pool acquire timeout after {0:?} - no connection slot available")]
    PoolTimeout(Duration),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }

    /// Create a framing error.
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create an unknown-protocol error.
    pub fn unknown_protocol(token: impl Into<String>) -> Self {
        Self::UnknownProtocol(token.into())
    }
}
