//! Stored response snapshots.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use swkit_net::{NetError, Response};
use tracing::warn;

use crate::RequestKey;

/// A cached request/response pair.
///
/// The body is always fully buffered; it never holds a live stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request identity.
    pub key: RequestKey,

    /// Response status.
    pub status: u16,

    /// Response headers, in order.
    pub headers: Vec<(String, String)>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Drain `response` into an entry stored under `key`.
    pub async fn from_response(key: RequestKey, response: Response) -> Result<Self, NetError> {
        let status = response.status.as_u16();
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| match value.to_str() {
                Ok(v) => Some((name.as_str().to_string(), v.to_string())),
                Err(_) => {
                    warn!(key = %key, header = %name, "Dropping non-UTF-8 header from cached copy");
                    None
                }
            })
            .collect();
        let body = response.bytes().await?;

        Ok(Self {
            key,
            status,
            headers,
            body,
            cached_at: now_millis(),
        })
    }

    /// A fresh readable response for this entry.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.append(n, v);
                }
                _ => warn!(key = %self.key, header = %name, "Dropping invalid cached header"),
            }
        }
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);

        Response::new(self.key.url.clone(), status, headers, self.body.clone()).from_cache()
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn sample_response() -> Response {
        let url = Url::parse("https://example.com/styles.css").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/css"),
        );
        Response::new(url, StatusCode::OK, headers, Bytes::from_static(b"body{}"))
    }

    #[tokio::test]
    async fn test_entry_serves_fresh_responses() {
        let url = Url::parse("https://example.com/styles.css").unwrap();
        let entry = CacheEntry::from_response(RequestKey::get(&url), sample_response())
            .await
            .unwrap();

        assert_eq!(entry.status, 200);
        assert!(entry.cached_at > 0);

        // Each call yields an independently readable body.
        let first = entry.to_response();
        let second = entry.to_response();
        assert!(first.is_from_cache());
        assert_eq!(first.content_type().unwrap(), mime::TEXT_CSS);
        assert_eq!(first.bytes().await.unwrap(), "body{}");
        assert_eq!(second.bytes().await.unwrap(), "body{}");
    }

    #[tokio::test]
    async fn test_non_utf8_header_is_dropped_from_entry() {
        let mut response = sample_response();
        response.headers.insert(
            http::header::ETAG,
            HeaderValue::from_bytes(b"\"caf\xe9\"").unwrap(),
        );
        let url = Url::parse("https://example.com/styles.css").unwrap();

        let entry = CacheEntry::from_response(RequestKey::get(&url), response)
            .await
            .unwrap();

        assert_eq!(
            entry.headers,
            vec![("content-type".to_string(), "text/css".to_string())]
        );
    }

    #[test]
    fn test_body_is_base64_in_json() {
        let url = Url::parse("https://example.com/a").unwrap();
        let entry = CacheEntry {
            key: RequestKey::get(&url),
            status: 200,
            headers: vec![],
            body: Bytes::from_static(b"hi"),
            cached_at: 1,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["body"], "aGk=");

        let back: CacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
