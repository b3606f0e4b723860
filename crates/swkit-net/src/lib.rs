//! # SwKit Net
//!
//! The network side of the service worker: requests, responses whose bodies
//! can be read exactly once, and the [`Fetcher`] seam the worker fetches
//! through.
//!
//! ## Design Goals
//!
//! 1. **Once-readable bodies**: reading a [`Response`] body consumes the
//!    response; keeping a copy requires [`Response::snapshot`]
//! 2. **Swappable network**: the worker only sees `dyn Fetcher`
//! 3. **Streaming**: [`HttpFetcher`] hands the body over as a stream

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use thiserror::Error;
use url::Url;

pub mod fetcher;
pub mod response;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use fetcher::{Fetcher, HttpFetcher, LoaderConfig};
pub use response::Response;

pub use http::StatusCode;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Body stream interrupted: {0}")]
    BodyInterrupted(String),

    #[error("Decode error: {0}")]
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

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Create a POST request with a JSON body and content type.
    pub fn post_json<T: Serialize + ?Sized>(url: Url, value: &T) -> Result<Self, NetError> {
        let body = serde_json::to_vec(value).map_err(|e| NetError::Decode(e.to_string()))?;
        Ok(Self::post(url, Bytes::from(body)).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        ))
    }

    /// Parse `url` and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
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

    /// Whether this request targets the same origin as `base`.
    ///
    /// Opaque origins (`data:`, `blob:` without a tuple origin) never match.
    pub fn is_same_origin(&self, base: &Url) -> bool {
        let origin = self.url.origin();
        origin.is_tuple() && origin == base.origin()
    }
}
