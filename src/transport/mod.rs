//! Transport layer: byte-stream abstraction and HTTP/1.x response framing.

pub mod conn;
pub(crate) mod h1;

pub use conn::{Connector, TcpConnector, TransportStream};
