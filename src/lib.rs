//! # Strix
//!
//! Keep-alive HTTP/1.x transport for web-security scanning engines.
//!
//! Strix issues many concurrent requests against scan targets while reusing
//! persistent connections, parses responses from servers that bend the HTTP
//! specification, caps response sizes to protect the scanner itself, and
//! fingerprints requests so a cache can recognize duplicates without
//! touching the network.

pub mod cache;
pub mod client;
pub mod error;
pub mod fingerprint;
pub mod headers;
pub mod pool;
pub mod request;
pub mod response;
pub mod transport;
pub mod version;

// Re-exports
pub use cache::{CachedResponse, ResponseCache};
pub use client::Client;
pub use error::{Error, Result};
pub use fingerprint::{fingerprint, Fingerprint};
pub use pool::{ConnectionPool, Endpoint, PoolConfig, PoolStats, PooledConnection};
pub use request::Request;
pub use response::Response;
pub use transport::{Connector, TcpConnector, TransportStream};
pub use version::HttpVersion;
