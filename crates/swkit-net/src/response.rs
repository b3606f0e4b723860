//! HTTP responses with once-readable bodies.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use mime::Mime;
use tokio::sync::mpsc;
use url::Url;

use crate::NetError;

/// Response body variants.
#[derive(Debug)]
enum ResponseBody {
    /// Full body already loaded.
    Full(Bytes),
    /// Streaming body, readable once.
    Stream(mpsc::Receiver<Result<Bytes, NetError>>),
    /// Empty.
    Empty,
}

impl ResponseBody {
    async fn read_all(self) -> Result<Bytes, NetError> {
        match self {
            ResponseBody::Full(b) => Ok(b),
            ResponseBody::Stream(mut rx) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
            ResponseBody::Empty => Ok(Bytes::new()),
        }
    }
}

/// HTTP response.
///
/// Reading the body (`bytes`, `text`, `json`) consumes the response. Use
/// [`Response::snapshot`] to obtain two independently readable copies.
#[derive(Debug)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    from_cache: bool,
    body: ResponseBody,
}

impl Response {
    /// Create a response with a fully loaded body.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let body = if body.is_empty() {
            ResponseBody::Empty
        } else {
            ResponseBody::Full(body)
        };
        Self {
            url,
            status,
            headers,
            from_cache: false,
            body,
        }
    }

    /// Create a response whose body arrives in chunks over `chunks`.
    pub fn streaming(
        url: Url,
        status: StatusCode,
        headers: HeaderMap,
        chunks: mpsc::Receiver<Result<Bytes, NetError>>,
    ) -> Self {
        Self {
            url,
            status,
            headers,
            from_cache: false,
            body: ResponseBody::Stream(chunks),
        }
    }

    /// Mark this response as served from a cache.
    pub fn from_cache(mut self) -> Self {
        self.from_cache = true;
        self
    }

    /// Whether this response was served from a cache.
    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Parsed `Content-Type` header.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Whether the body is still a live stream.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Get the body as bytes.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        self.body.read_all().await
    }

    /// Get the body as text.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| NetError::Decode(e.to_string()))
    }

    /// Get the body as JSON.
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| NetError::Decode(e.to_string()))
    }

    /// Drain the body and return two responses sharing the buffered bytes.
    ///
    /// Fails if the body stream is interrupted; nothing is returned then.
    pub async fn snapshot(self) -> Result<(Response, Response), NetError> {
        let Response {
            url,
            status,
            headers,
            from_cache,
            body,
        } = self;

        let body = body.read_all().await?;

        let copy = |body: Bytes| {
            let mut response = Response::new(url.clone(), status, headers.clone(), body);
            response.from_cache = from_cache;
            response
        };

        Ok((copy(body.clone()), copy(body)))
    }
}
