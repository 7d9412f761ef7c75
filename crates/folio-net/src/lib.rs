//! # Folio Net
//!
//! Request and response model plus HTTP fetching for the Folio offline worker.
//!
//! ## Design Goals
//!
//! 1. **Browser-shaped responses**: every response carries a [`ResponseType`]
//!    (basic, cors, opaque) so callers can tell same-origin content apart
//! 2. **Cheap duplication**: bodies are [`Bytes`], so cloning a response for a
//!    cache write never copies the payload
//! 3. **Pluggable fetching**: the [`Fetcher`] trait is the seam between the
//!    worker and the network; [`ResourceLoader`] is the `reqwest` implementation

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Cross-origin response for same-origin request: {0}")]
    CrossOrigin(Url),

    #[error("Body decode failed: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, deciding how cross-origin responses are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    /// Cross-origin responses are an error.
    SameOrigin,
    /// Cross-origin responses are exposed as `cors`.
    #[default]
    Cors,
    /// Cross-origin responses are exposed as `opaque`.
    NoCors,
}

/// How much of a response the caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    /// Same-origin response.
    Basic,
    /// Cross-origin response shared through CORS.
    Cors,
    /// Cross-origin no-cors response: status 0, no headers, no body.
    Opaque,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
        }
    }
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    pub mode: RequestMode,
    pub referrer: Option<Url>,
}

impl Request {
    /// Create a request with an arbitrary method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            mode: RequestMode::default(),
            referrer: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::POST, url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set referrer.
    pub fn referrer(mut self, referrer: Url) -> Self {
        self.referrer = Some(referrer);
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }
}

/// HTTP response.
///
/// Cloning duplicates the response; the body is shared, not copied.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    /// Whether redirects were followed to produce this response.
    pub redirected: bool,
    body: Bytes,
}

impl Response {
    /// Create an empty same-origin response.
    pub fn new(url: Url, status: StatusCode) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            response_type: ResponseType::Basic,
            redirected: false,
            body: Bytes::new(),
        }
    }

    /// Create an opaque response for a no-cors cross-origin fetch.
    pub fn opaque(url: Url) -> Self {
        Self {
            url,
            // Opaque responses report status 0; 200 is the closest
            // representable code, the type is what callers check.
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            response_type: ResponseType::Opaque,
            redirected: false,
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Status as the fetch API reports it (0 for opaque responses).
    pub fn status_code(&self) -> u16 {
        match self.response_type {
            ResponseType::Opaque => 0,
            _ => self.status.as_u16(),
        }
    }

    /// Check if request was successful (2xx). Opaque responses are never ok.
    pub fn ok(&self) -> bool {
        self.response_type != ResponseType::Opaque && self.status.is_success()
    }

    /// Borrow the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Take the body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::Decode(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::Decode(e.to_string()))
    }
}

/// Something that can perform a network fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request against the network.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("text/html"),
            )
            .timeout(Duration::from_secs(10))
            .mode(RequestMode::Navigate);

        assert_eq!(request.url, url);
        assert!(request.is_get());
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
        assert_eq!(request.mode, RequestMode::Navigate);
    }

    #[test]
    fn test_post_is_not_get() {
        let url = Url::parse("https://example.com/subscribe").unwrap();
        let request = Request::post(url, Bytes::from_static(b"email=a@b.c"));
        assert!(!request.is_get());
        assert_eq!(request.body.as_deref(), Some(&b"email=a@b.c"[..]));
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_response_clone_shares_body() {
        let url = Url::parse("https://example.com/").unwrap();
        let original = Response::new(url, StatusCode::OK).with_body("<html></html>");
        let copy = original.clone();

        assert_eq!(copy.body(), original.body());
        assert_eq!(original.text().unwrap(), "<html></html>");
    }

    #[test]
    fn test_opaque_response_is_not_ok() {
        let url = Url::parse("https://cdn.example.net/font.woff2").unwrap();
        let response = Response::opaque(url);
        assert!(!response.ok());
        assert_eq!(response.status_code(), 0);
        assert_eq!(response.response_type.as_str(), "opaque");
    }

    #[test]
    fn test_response_json() {
        let url = Url::parse("https://example.com/manifest.json").unwrap();
        let response = Response::new(url, StatusCode::OK).with_body(r#"{"name":"folio"}"#);
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["name"], "folio");
    }
}
