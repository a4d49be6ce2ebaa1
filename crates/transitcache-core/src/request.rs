//! Request and response values that flow through the router.
//!
//! These are plain owned values rather than live HTTP handles so they can be
//! cloned into background tasks and persisted by a store.

use std::collections::BTreeMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Header map with case-insensitive names.
///
/// Names are stored lowercased. Insertion replaces an existing value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
}

impl Request {
    /// A plain GET with no headers.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Key under which this request is stored: the URL without its fragment.
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }

    /// True when the `Accept` header asks for JSON.
    pub fn accepts_json(&self) -> bool {
        self.headers
            .get("accept")
            .map(|accept| accept.contains("application/json"))
            .unwrap_or(false)
    }
}

/// Normalize a URL into a store key.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// Where a response came from, as far as caching is concerned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response with readable status and body.
    Cors,
    /// Cross-origin response whose status is hidden; always treated as ok.
    Opaque,
    /// Produced locally (offline page, 503).
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub kind: ResponseKind,
    /// Final URL of the response, when it came from the network.
    pub url: Option<String>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: reason_phrase(status).to_string(),
            headers: Headers::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
            url: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Whether this response may be written to a store: 2xx, or opaque.
    pub fn is_cacheable(&self) -> bool {
        (200..300).contains(&self.status) || self.kind == ResponseKind::Opaque
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Body as UTF-8, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn reason_phrase(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_headers_case_insensitive() {
        let headers = Headers::new().with("Content-Type", "text/html");
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_headers_insert_replaces() {
        let mut headers = Headers::new();
        headers.insert("Accept", "text/html");
        headers.insert("accept", "application/json");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Accept"), Some("application/json"));
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let request = Request::get(url("https://example.org/map.html#line-expo"));
        assert_eq!(request.cache_key(), "https://example.org/map.html");
    }

    #[test]
    fn test_cache_key_keeps_query() {
        let request = Request::get(url("https://fonts.googleapis.com/css2?family=Inter"));
        assert_eq!(
            request.cache_key(),
            "https://fonts.googleapis.com/css2?family=Inter"
        );
    }

    #[test]
    fn test_accepts_json() {
        let plain = Request::get(url("https://example.org/data"));
        assert!(!plain.accepts_json());

        let json = plain
            .clone()
            .with_header("Accept", "application/json, text/plain;q=0.5");
        assert!(json.accepts_json());
    }

    #[test]
    fn test_is_cacheable() {
        assert!(Response::new(200, "ok").is_cacheable());
        assert!(Response::new(204, "").is_cacheable());
        assert!(!Response::new(404, "missing").is_cacheable());
        assert!(!Response::new(500, "boom").is_cacheable());
        assert!(Response::new(0, "")
            .with_kind(ResponseKind::Opaque)
            .is_cacheable());
    }

    #[test]
    fn test_status_text_from_code() {
        assert_eq!(Response::new(200, "").status_text, "OK");
        assert_eq!(Response::new(503, "").status_text, "Service Unavailable");
        assert_eq!(Response::new(0, "").status_text, "");
    }
}
