//! Cache-first serving backed by a count-bounded runtime cache.

use std::sync::Arc;

use http::Method;
use swkit_cache::CacheStore;
use swkit_net::{Fetcher, Request, Response};
use tracing::{debug, trace};
use url::Url;

use crate::{Result, WorkerConfig};

/// Cache-first lookup over every cache, filling the runtime cache on miss.
pub struct RuntimeCache {
    caches: CacheStore,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
    cache_name: String,
    max_items: usize,
}

impl RuntimeCache {
    pub fn new(caches: CacheStore, fetcher: Arc<dyn Fetcher>, config: &WorkerConfig) -> Self {
        Self {
            caches,
            fetcher,
            origin: config.origin.clone(),
            cache_name: config.runtime_cache_name.clone(),
            max_items: config.max_cache_items,
        }
    }

    /// Whether the worker answers `request` at all. Cross-origin and
    /// non-GET requests go to the network untouched.
    pub fn intercepts(&self, request: &Request) -> bool {
        request.method == Method::GET && request.is_same_origin(&self.origin)
    }

    /// Serve `request` from any cache, or fetch it and keep a copy.
    ///
    /// Hits are returned without revalidation. Network errors propagate;
    /// there is no offline fallback.
    pub async fn lookup(&self, request: Request) -> Result<Response> {
        if let Some(cached) = self.caches.match_request(&request).await {
            debug!(url = %request.url, "Cache hit");
            return Ok(cached);
        }

        debug!(url = %request.url, "Cache miss, fetching");
        let response = self.fetcher.fetch(request.clone()).await?;

        let (for_page, for_cache) = response.snapshot().await?;
        let cache = self.caches.open(&self.cache_name).await;
        cache.put(&request, for_cache).await?;
        evict(&self.caches, &self.cache_name, self.max_items).await;

        Ok(for_page)
    }
}

/// Delete the oldest keys of `cache_name` until at most `max_items` remain.
///
/// Re-enumerates after every deletion so "oldest" always means first in the
/// store's current order. Returns how many entries were deleted.
pub async fn evict(caches: &CacheStore, cache_name: &str, max_items: usize) -> usize {
    let cache = caches.open(cache_name).await;
    let mut deleted = 0;

    loop {
        let keys = cache.keys().await;
        if keys.len() <= max_items {
            break;
        }
        if cache.delete(&keys[0]).await {
            trace!(cache = cache_name, key = %keys[0], "Evicted");
            deleted += 1;
        }
    }

    if deleted > 0 {
        debug!(cache = cache_name, deleted, max_items, "Runtime cache trimmed");
    }
    deleted
}
