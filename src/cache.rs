//! Fingerprint-keyed response cache.
//!
//! Sits in front of the pool: a hit never touches the network. What is
//! cacheable is the embedding engine's decision; this map only guarantees
//! deterministic keys and cheap clones.
//!
//! Concurrent identical in-flight requests are NOT coalesced: two callers
//! racing past the same miss both fetch, and the later `store` wins. The
//! scan scheduler already deduplicates most work; a coalescing wait map
//! would put a lock on every hot-path probe to save little.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::fingerprint::Fingerprint;
use crate::headers::HeaderMap;
use crate::response::Response;
use crate::version::HttpVersion;

/// Stored snapshot of a completed exchange.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub reason: String,
    pub version: HttpVersion,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: String,
    /// Carried through so a size-guard 204 stays distinguishable from a
    /// genuine one after a cache round-trip.
    pub body_discarded: bool,
}

impl CachedResponse {
    pub(crate) fn from_response(response: &Response, body: Bytes) -> Self {
        Self {
            status: response.status(),
            reason: response.reason().to_string(),
            version: response.version(),
            headers: response.headers().clone(),
            body,
            url: response.url().to_string(),
            body_discarded: response.body_discarded(),
        }
    }

    /// Rebuild a caller-facing response from this snapshot.
    pub fn into_response(self) -> Response {
        Response::from_cached(
            self.status,
            self.reason,
            self.version,
            self.headers,
            self.url,
            self.body,
            self.body_discarded,
        )
    }
}

/// In-memory response cache shared across scan workers.
#[derive(Debug, Clone, Default)]
pub struct ResponseCache {
    inner: Arc<Mutex<HashMap<Fingerprint, CachedResponse>>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stored response. Returns a clone; the cache keeps its copy.
    pub fn get(&self, key: &Fingerprint) -> Option<CachedResponse> {
        self.inner
            .lock()
            .expect("response cache mutex poisoned")
            .get(key)
            .cloned()
    }

    /// Store a response snapshot unconditionally. Cacheability policy is
    /// decided by the caller before getting here.
    pub fn store(&self, key: Fingerprint, entry: CachedResponse) {
        self.inner
            .lock()
            .expect("response cache mutex poisoned")
            .insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("response cache mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .expect("response cache mutex poisoned")
            .clear();
    }
}
