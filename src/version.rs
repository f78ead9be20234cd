//! HTTP protocol versions understood by the response parser.

use crate::error::{Error, Result};

/// Protocol version of a parsed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// Headerless pre-1.0 responses; the body runs to EOF and the
    /// connection always closes.
    Http09,
    /// HTTP/1.0.
    Http10,
    /// HTTP/1.1, and any HTTP/1.x with x >= 1.
    Http11,
}

impl HttpVersion {
    /// Recognize a status-line protocol token.
    ///
    /// `HTTP/1.x` with x >= 1 is treated as HTTP/1.1. Anything else is a
    /// fatal protocol error for the exchange.
    pub fn from_token(token: &str) -> Result<Self> {
        if token == "HTTP/1.0" {
            return Ok(Self::Http10);
        }
        if let Some(minor) = token.strip_prefix("HTTP/1.") {
            if minor.parse::<u32>().map(|m| m >= 1).unwrap_or(false) {
                return Ok(Self::Http11);
            }
        }
        if token == "HTTP/0.9" {
            return Ok(Self::Http09);
        }
        Err(Error::unknown_protocol(token))
    }

    /// Get human-readable version string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http09 => "HTTP/0.9",
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }

    /// Numeric code in the 9/10/11 convention callers key switch logic on.
    pub fn code(&self) -> u8 {
        match self {
            Self::Http09 => 9,
            Self::Http10 => 10,
            Self::Http11 => 11,
        }
    }
}
