//! Scripted HTTP mock servers for transport tests.
//!
//! Responses are raw bytes written verbatim, so tests control framing down
//! to the last CRLF.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct MockServer {
    port: u16,
    connections: Arc<AtomicUsize>,
}

impl MockServer {
    /// Serve the scripted responses over a single accepted connection,
    /// reading one request before each, then close it.
    pub async fn single_connection(responses: Vec<Vec<u8>>) -> Self {
        Self::start(responses, false).await
    }

    /// Like `single_connection`, but keep the socket open (and silent)
    /// after the last scripted response instead of closing it.
    pub async fn single_connection_then_hang(responses: Vec<Vec<u8>>) -> Self {
        Self::start(responses, true).await
    }

    async fn start(responses: Vec<Vec<u8>>, hang: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let conns = Arc::clone(&connections);
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            conns.fetch_add(1, Ordering::SeqCst);
            for response in responses {
                if read_request(&mut stream).await.is_err() {
                    return;
                }
                let _ = stream.write_all(&response).await;
                let _ = stream.flush().await;
            }
            if hang {
                std::future::pending::<()>().await;
            }
            let _ = stream.shutdown().await;
        });
        Self { port, connections }
    }

    /// Accept any number of connections, answering every request on each
    /// with the same response.
    pub async fn repeat(response: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let conns = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                conns.fetch_add(1, Ordering::SeqCst);
                let response = response.clone();
                tokio::spawn(async move {
                    while read_request(&mut stream).await.is_ok() {
                        if stream.write_all(&response).await.is_err() {
                            return;
                        }
                        let _ = stream.flush().await;
                    }
                });
            }
        });
        Self { port, connections }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Number of connections the server accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Read until the end of the request head. Test requests carry no body.
async fn read_request(stream: &mut TcpStream) -> io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client closed"));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(());
        }
    }
}
