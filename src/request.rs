//! Scanner-issued HTTP request.
//!
//! Header order and duplicates are preserved exactly as given: a scanner
//! emits deliberately ordered and repeated headers, and the fingerprint
//! treats the order as part of request identity.

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::error::Result;

/// One request as handed down by the scan engine.
///
/// Carries two header lists: the primary headers and the "unredirected"
/// headers (credentials and similar) that must not survive a redirect. Both
/// are emitted on the wire and both feed the fingerprint.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    unredirected: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl Request {
    /// Create a request for the given method and absolute URL.
    pub fn new(method: Method, url: &str) -> Result<Self> {
        Ok(Self {
            method,
            url: Url::parse(url)?,
            headers: Vec::new(),
            unredirected: Vec::new(),
            body: None,
        })
    }

    /// Convenience constructor for GET.
    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    /// Convenience constructor for HEAD.
    pub fn head(url: &str) -> Result<Self> {
        Self::new(Method::HEAD, url)
    }

    /// Convenience constructor for POST.
    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    /// Append a primary header. Duplicates are kept.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a header that must not follow a redirect (e.g. credentials).
    pub fn unredirected_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.unredirected.push((name.into(), value.into()));
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Primary headers in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Unredirected headers in insertion order.
    pub fn unredirected_headers(&self) -> &[(String, String)] {
        &self.unredirected
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Both header lists in emission order: primary first, then unredirected.
    pub fn all_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .chain(self.unredirected.iter())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
