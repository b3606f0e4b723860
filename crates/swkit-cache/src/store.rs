//! Shared async access to the cache storage.
//!
//! Every call takes the storage lock for that call only, so a
//! [`CacheHandle`] can be held across awaits without pinning the store.

use std::path::Path;
use std::sync::Arc;

use futures::future::try_join_all;
use swkit_net::{Fetcher, Request, Response};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::{CacheEntry, CacheError, CacheStorage, RequestKey, StorageSnapshot};

/// Shared cache storage.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    inner: Arc<RwLock<CacheStorage>>,
}

impl CacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing storage.
    pub fn from_storage(storage: CacheStorage) -> Self {
        Self {
            inner: Arc::new(RwLock::new(storage)),
        }
    }

    /// Open a cache (creates if doesn't exist).
    pub async fn open(&self, name: &str) -> CacheHandle {
        self.inner.write().await.open(name);
        CacheHandle {
            store: self.clone(),
            name: name.to_string(),
        }
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.inner.read().await.has(name)
    }

    /// Delete a cache.
    pub async fn delete(&self, name: &str) -> bool {
        self.inner.write().await.delete(name)
    }

    /// All cache names, in creation order.
    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.keys()
    }

    /// Match `request` across all caches.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        let key = RequestKey::from_request(request);
        self.inner
            .read()
            .await
            .match_request(&key)
            .map(CacheEntry::to_response)
    }

    /// Load a store saved with [`CacheStore::save`]. A missing file is an
    /// empty store.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No saved caches");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: StorageSnapshot = serde_json::from_slice(&data)?;
        info!(path = %path.display(), caches = snapshot.caches.len(), "Loaded caches");
        Ok(Self::from_storage(CacheStorage::from_snapshot(snapshot)))
    }

    /// Write every cache to `path` as JSON.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), CacheError> {
        let snapshot = self.inner.read().await.snapshot();
        let data = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path.as_ref(), data).await?;
        debug!(path = %path.as_ref().display(), "Saved caches");
        Ok(())
    }
}

/// A handle to one named cache.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    store: CacheStore,
    name: String,
}

impl CacheHandle {
    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match `request` in this cache.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        let key = RequestKey::from_request(request);
        let storage = self.store.inner.read().await;
        storage
            .get(&self.name)
            .and_then(|cache| cache.match_request(&key))
            .map(CacheEntry::to_response)
    }

    /// Store `response` under `request`. The body is drained before the
    /// store is locked.
    pub async fn put(&self, request: &Request, response: Response) -> Result<(), CacheError> {
        let key = RequestKey::from_request(request);
        if !key.is_get() {
            return Err(CacheError::UnsupportedMethod(request.method.clone()));
        }

        let url = response.url.clone();
        let entry = CacheEntry::from_response(key, response)
            .await
            .map_err(|source| CacheError::Network { url, source })?;

        self.store.inner.write().await.open(&self.name).put(entry);
        Ok(())
    }

    /// Fetch every URL and store them all, or none of them.
    ///
    /// Fails on the first network error or non-2xx status.
    pub async fn add_all(&self, fetcher: &dyn Fetcher, urls: &[Url]) -> Result<(), CacheError> {
        let fetches = urls.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let key = RequestKey::from_request(&request);
            let response = fetcher
                .fetch(request)
                .await
                .map_err(|source| CacheError::Network {
                    url: url.clone(),
                    source,
                })?;
            if !response.ok() {
                return Err(CacheError::BadResponse {
                    url: url.clone(),
                    status: response.status,
                });
            }
            CacheEntry::from_response(key, response)
                .await
                .map_err(|source| CacheError::Network {
                    url: url.clone(),
                    source,
                })
        });
        let entries = try_join_all(fetches).await?;

        let mut storage = self.store.inner.write().await;
        let cache = storage.open(&self.name);
        for entry in entries {
            cache.put(entry);
        }
        debug!(cache = %self.name, count = urls.len(), "Added all");
        Ok(())
    }

    /// Delete the entry for `key`.
    pub async fn delete(&self, key: &RequestKey) -> bool {
        self.store
            .inner
            .write()
            .await
            .get_mut(&self.name)
            .map(|cache| cache.delete(key))
            .unwrap_or(false)
    }

    /// All keys, oldest write first.
    pub async fn keys(&self) -> Vec<RequestKey> {
        self.store
            .inner
            .read()
            .await
            .get(&self.name)
            .map(|cache| cache.keys())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swkit_net::testing::{Reply, StaticFetcher};

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://example.com{path}")).unwrap()
    }

    #[tokio::test]
    async fn test_put_then_match() {
        let store = CacheStore::new();
        let cache = store.open("runtime").await;
        let fetcher = StaticFetcher::new().route(url("/a").as_str(), Reply::ok("alpha"));

        let request = Request::get(url("/a"));
        let response = fetcher.fetch(request.clone()).await.unwrap();
        cache.put(&request, response).await.unwrap();

        let hit = store.match_request(&request).await.unwrap();
        assert!(hit.is_from_cache());
        assert_eq!(hit.text().await.unwrap(), "alpha");
        assert_eq!(cache.keys().await, vec![RequestKey::get(&url("/a"))]);
    }

    #[tokio::test]
    async fn test_put_rejects_post() {
        let store = CacheStore::new();
        let cache = store.open("runtime").await;
        let request = Request::post(url("/sync"), bytes::Bytes::from_static(b"{}"));
        let response = Response::new(
            url("/sync"),
            http::StatusCode::OK,
            http::HeaderMap::new(),
            bytes::Bytes::new(),
        );

        assert!(matches!(
            cache.put(&request, response).await,
            Err(CacheError::UnsupportedMethod(_))
        ));
        assert!(cache.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_all_stores_every_url() {
        let fetcher = StaticFetcher::new()
            .route(url("/").as_str(), Reply::ok("root"))
            .route(url("/app.js").as_str(), Reply::ok("js"));
        let store = CacheStore::new();
        let cache = store.open("precache-v1").await;

        cache
            .add_all(&fetcher, &[url("/"), url("/app.js")])
            .await
            .unwrap();

        assert_eq!(cache.keys().await.len(), 2);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_add_all_is_all_or_nothing() {
        let fetcher = StaticFetcher::new()
            .route(url("/").as_str(), Reply::ok("root"))
            .route(url("/missing.css").as_str(), Reply::status(404))
            .route(url("/app.js").as_str(), Reply::NetworkError);
        let store = CacheStore::new();
        let cache = store.open("precache-v1").await;

        let bad_status = cache.add_all(&fetcher, &[url("/"), url("/missing.css")]).await;
        assert!(matches!(bad_status, Err(CacheError::BadResponse { .. })));

        let unreachable = cache.add_all(&fetcher, &[url("/"), url("/app.js")]).await;
        assert!(matches!(unreachable, Err(CacheError::Network { .. })));

        assert!(cache.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_missing_cache() {
        let store = CacheStore::new();
        let cache = store.open("runtime").await;
        let fetcher = StaticFetcher::new().route(url("/a").as_str(), Reply::ok("a"));
        cache.add_all(&fetcher, &[url("/a")]).await.unwrap();

        assert!(cache.delete(&RequestKey::get(&url("/a"))).await);
        assert!(!cache.delete(&RequestKey::get(&url("/a"))).await);

        assert!(store.delete("runtime").await);
        assert!(!store.has("runtime").await);
        assert!(cache.keys().await.is_empty());
        assert!(!cache.delete(&RequestKey::get(&url("/a"))).await);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caches.json");

        let fetcher = StaticFetcher::new()
            .route(url("/b").as_str(), Reply::ok("bee"))
            .route(url("/a").as_str(), Reply::ok("ay"));
        let store = CacheStore::new();
        store.open("precache-v1").await;
        let runtime = store.open("runtime").await;
        runtime.add_all(&fetcher, &[url("/b")]).await.unwrap();
        runtime.add_all(&fetcher, &[url("/a")]).await.unwrap();
        store.save(&path).await.unwrap();

        let loaded = CacheStore::load(&path).await.unwrap();
        assert_eq!(loaded.keys().await, vec!["precache-v1", "runtime"]);

        let runtime = loaded.open("runtime").await;
        assert_eq!(
            runtime.keys().await,
            vec![RequestKey::get(&url("/b")), RequestKey::get(&url("/a"))]
        );
        let hit = loaded.match_request(&Request::get(url("/a"))).await.unwrap();
        assert_eq!(hit.text().await.unwrap(), "ay");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::load(dir.path().join("absent.json")).await.unwrap();
        assert!(store.keys().await.is_empty());
    }
}
