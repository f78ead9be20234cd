//! Request fingerprinting for the response cache.
//!
//! A scan observes the same request many times (different plugins probing
//! the same URL); the fingerprint is the content-addressable key that lets
//! the cache recognize them. It is a cache key, not a security token.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::headers::{validate_header_name, validate_header_value};
use crate::request::Request;

/// Opaque digest of a request's identity, usable as a map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", hex::encode(self.0))
    }
}

/// Compute the cache key for a request.
///
/// The digest covers method, full URL, both header lists (name then value,
/// in insertion order), and the body (nothing when absent). Identical
/// requests always produce identical digests, within a run and across runs.
/// Header order is part of request identity: the same pairs in a different
/// order are a different probe and hash differently.
///
/// Fails with an encoding error when a header cannot be represented on the
/// wire (embedded CR/LF/NUL, non-token name). Keying the cache with data
/// that would be mangled at emission time mis-files responses, which is
/// worse than failing loudly here.
pub fn fingerprint(request: &Request) -> Result<Fingerprint> {
    let mut hasher = Sha256::new();
    hasher.update(request.method().as_str().as_bytes());
    hasher.update(request.url().as_str().as_bytes());
    for (name, value) in request.all_headers() {
        validate_header_name(name)?;
        validate_header_value(value)?;
        hasher.update(name.as_bytes());
        hasher.update(value.as_bytes());
    }
    if let Some(body) = request.body_bytes() {
        hasher.update(body);
    }
    Ok(Fingerprint(hasher.finalize().into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Request {
        Request::get("http://target.example/page?id=1")
            .unwrap()
            .header("User-Agent", "scanner")
            .header("Accept", "*/*")
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(fingerprint(&base()).unwrap(), fingerprint(&base()).unwrap());
    }

    #[test]
    fn test_header_order_is_identity() {
        let reordered = Request::get("http://target.example/page?id=1")
            .unwrap()
            .header("Accept", "*/*")
            .header("User-Agent", "scanner");
        assert_ne!(
            fingerprint(&base()).unwrap(),
            fingerprint(&reordered).unwrap()
        );
    }

    #[test]
    fn test_unredirected_headers_are_hashed() {
        let with_auth = base().unredirected_header("Authorization", "Basic xyz");
        assert_ne!(fingerprint(&base()).unwrap(), fingerprint(&with_auth).unwrap());
    }

    #[test]
    fn test_body_changes_digest() {
        let a = Request::post("http://target.example/form").unwrap().body("a=1");
        let b = Request::post("http://target.example/form").unwrap().body("a=2");
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn test_injection_bytes_fail_loudly() {
        let req = base().header("X-Evil", "a\r\nX-Injected: 1");
        assert!(matches!(fingerprint(&req), Err(crate::Error::Encoding(_))));
    }

    #[test]
    fn test_display_is_hex() {
        let digest = fingerprint(&base()).unwrap();
        let hex = digest.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
