//! # SwKit Cache
//!
//! The Cache Storage a service worker sees as `caches`.
//!
//! ## Architecture
//!
//! ```text
//! CacheStore (shared, async, one lock per call)
//!     └── CacheStorage (creation-ordered)
//!             └── Cache (insertion-ordered)
//!                     └── RequestKey → CacheEntry
//! ```
//!
//! Enumeration order is insertion order. Replacing an entry moves it to the
//! end, so the first key is the least recently written one.

use std::fmt;

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use swkit_net::{NetError, Request};
use thiserror::Error;
use url::Url;

pub mod cache;
pub mod entry;
pub mod store;

pub use cache::{Cache, CacheSnapshot, CacheStorage, StorageSnapshot};
pub use entry::CacheEntry;
pub use store::{CacheHandle, CacheStore};

// ==================== Errors ====================

/// Errors that can occur in cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Network error for {url}: {source}")]
    Network {
        url: Url,
        #[source]
        source: NetError,
    },

    #[error("Bad response for {url}: {status}")]
    BadResponse { url: Url, status: StatusCode },

    #[error("Only GET requests can be cached, got {0}")]
    UnsupportedMethod(Method),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ==================== Keys ====================

/// Cache identity of a request.
///
/// Fragments never take part in matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: Url,
}

impl RequestKey {
    /// Key for `method url`.
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url,
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    /// Key of `request`.
    pub fn from_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }

    /// Whether this key can be stored or matched.
    pub fn is_get(&self) -> bool {
        self.method == Method::GET.as_str()
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
