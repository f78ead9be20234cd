//! Endpoint-keyed connection pool.
//!
//! Owns every live connection, grouped by (host, port, scheme). Callers
//! acquire a connection per exchange and either release it back to the idle
//! set or retire it; the per-endpoint slot semaphore caps concurrent
//! connections so a scan cannot stampede a single target.
//!
//! Contention is per endpoint: the map lock is held only to look up the
//! endpoint's slot, never across a connect or a wait.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::conn::{Connector, TransportStream};

/// Remote target of a reusable connection.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub is_https: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, is_https: bool) -> Self {
        Self {
            host: host.into(),
            port,
            is_https,
        }
    }

    /// Derive the endpoint from a request URL.
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::connection(format!("URL has no host: {}", url)))?;
        let port = url.port_or_known_default().ok_or_else(|| {
            Error::connection(format!("no known port for scheme {:?}", url.scheme()))
        })?;
        Ok(Self::new(host, port, url.scheme() == "https"))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.is_https { "https" } else { "http" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent connections per endpoint.
    pub max_per_endpoint: usize,
    /// How long `acquire` waits for a free slot before failing.
    pub acquire_timeout: Duration,
    /// Idle connections older than this are discarded at acquire time.
    pub max_idle: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_endpoint: 6,
            acquire_timeout: Duration::from_secs(30),
            max_idle: Duration::from_secs(30),
        }
    }
}

/// Diagnostics counters; never behavior-affecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub opened: u64,
    pub reused: u64,
    pub retired: u64,
    pub idle: usize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    opened: AtomicU64,
    reused: AtomicU64,
    retired: AtomicU64,
}

struct IdleEntry {
    stream: TransportStream,
    since: Instant,
}

/// Per-endpoint state: the slot semaphore and the idle set.
struct EndpointSlot {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleEntry>>,
    idle_cap: usize,
}

/// A connection checked out of the pool for exactly one exchange.
///
/// Holds the endpoint's slot permit for as long as it lives. Dropping an
/// unreleased connection (caller cancelled mid-read, error unwound past it)
/// retires it: a stream in an unknown framing state must never rejoin the
/// idle set.
pub struct PooledConnection {
    stream: Option<TransportStream>,
    endpoint: Endpoint,
    slot: Arc<EndpointSlot>,
    counters: Arc<PoolCounters>,
    _permit: OwnedSemaphorePermit,
    reusable: bool,
}

impl PooledConnection {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Mutable access to the raw stream; `None` once the connection has
    /// been handed back or torn down.
    pub(crate) fn stream_mut(&mut self) -> Option<&mut TransportStream> {
        self.stream.as_mut()
    }

    /// Flag the connection as non-reusable (will-close response, explicit
    /// caller request). `release` will drop it instead of pooling it.
    pub fn mark_not_reusable(&mut self) {
        self.reusable = false;
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// Return the connection to its endpoint's idle set, or drop it if it
    /// failed the health check.
    pub(crate) fn release(mut self) {
        if !self.reusable {
            self.retire("flagged non-reusable at release");
            return;
        }
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => return,
        };
        let mut idle = self.slot.idle.lock().expect("pool idle set mutex poisoned");
        if idle.len() >= self.slot.idle_cap {
            drop(idle);
            self.counters.retired.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(endpoint = %self.endpoint, "idle set full, dropping connection");
            return;
        }
        idle.push(IdleEntry {
            stream,
            since: Instant::now(),
        });
        tracing::debug!(endpoint = %self.endpoint, idle = idle.len(), "connection returned to pool");
        // the permit drops with self, waking one waiter which will find
        // the idle entry we just pushed
    }

    /// Unconditionally close the connection and remove it from bookkeeping.
    pub(crate) fn retire(mut self, reason: &str) {
        if self.stream.take().is_some() {
            self.counters.retired.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(endpoint = %self.endpoint, reason, "retiring connection");
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.stream.take().is_some() {
            self.counters.retired.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(endpoint = %self.endpoint, "connection dropped mid-exchange, retiring");
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("endpoint", &self.endpoint)
            .field("live", &self.stream.is_some())
            .field("reusable", &self.reusable)
            .finish()
    }
}

/// Connection pool for reusing keep-alive connections across exchanges.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    endpoints: Mutex<HashMap<Endpoint, Arc<EndpointSlot>>>,
    config: PoolConfig,
    counters: Arc<PoolCounters>,
}

impl ConnectionPool {
    /// Create a pool with default settings.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_config(connector, PoolConfig::default())
    }

    /// Create a pool with custom configuration.
    pub fn with_config(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            connector,
            endpoints: Mutex::new(HashMap::new()),
            config,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    fn slot(&self, endpoint: &Endpoint) -> Arc<EndpointSlot> {
        let mut endpoints = self.endpoints.lock().expect("pool endpoint map mutex poisoned");
        endpoints
            .entry(endpoint.clone())
            .or_insert_with(|| {
                Arc::new(EndpointSlot {
                    permits: Arc::new(Semaphore::new(self.config.max_per_endpoint)),
                    idle: Mutex::new(Vec::new()),
                    idle_cap: self.config.max_per_endpoint,
                })
            })
            .clone()
    }

    /// Check a connection out for one exchange.
    ///
    /// Prefers an idle connection; otherwise opens a new one, subject to the
    /// per-endpoint limit. When the endpoint is saturated the caller blocks
    /// until a slot frees up or the acquire timeout elapses.
    pub async fn acquire(&self, endpoint: &Endpoint) -> Result<PooledConnection> {
        let slot = self.slot(endpoint);
        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            slot.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::connection("connection pool is shut down")),
            Err(_) => return Err(Error::PoolTimeout(self.config.acquire_timeout)),
        };

        // Reuse an idle connection, discarding expired ones on the way.
        let reused = {
            let mut idle = slot.idle.lock().expect("pool idle set mutex poisoned");
            let mut found = None;
            while let Some(entry) = idle.pop() {
                if entry.since.elapsed() < self.config.max_idle {
                    found = Some(entry.stream);
                    break;
                }
                self.counters.retired.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(endpoint = %endpoint, "discarding expired idle connection");
            }
            found
        };
        if let Some(stream) = reused {
            self.counters.reused.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(endpoint = %endpoint, "reusing pooled connection");
            return Ok(self.wrap(stream, endpoint, slot, permit));
        }

        // Connect failures free the permit on the way out; never retried here.
        let stream = self.connector.connect(endpoint).await?;
        self.counters.opened.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(endpoint = %endpoint, "opened new connection");
        Ok(self.wrap(stream, endpoint, slot, permit))
    }

    fn wrap(
        &self,
        stream: TransportStream,
        endpoint: &Endpoint,
        slot: Arc<EndpointSlot>,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection {
        PooledConnection {
            stream: Some(stream),
            endpoint: endpoint.clone(),
            slot,
            counters: Arc::clone(&self.counters),
            _permit: permit,
            reusable: true,
        }
    }

    /// Return a connection to the idle set for its endpoint. Connections
    /// that failed the health check are dropped instead.
    pub fn release(&self, conn: PooledConnection) {
        conn.release();
    }

    /// Unconditionally close and forget a connection.
    pub fn retire(&self, conn: PooledConnection, reason: &str) {
        conn.retire(reason);
    }

    /// Current counters, for diagnostics.
    pub fn stats(&self) -> PoolStats {
        let endpoints = self.endpoints.lock().expect("pool endpoint map mutex poisoned");
        let idle = endpoints
            .values()
            .map(|slot| slot.idle.lock().expect("pool idle set mutex poisoned").len())
            .sum();
        PoolStats {
            opened: self.counters.opened.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            retired: self.counters.retired.load(Ordering::Relaxed),
            idle,
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
