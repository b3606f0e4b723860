//! Install: precache the manifest.

use swkit_cache::CacheStore;
use swkit_net::Fetcher;
use tracing::{error, info};

use crate::{Result, ServiceWorkerError, WorkerConfig};

/// What a successful install did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Manifest entries stored.
    pub precached: usize,
    /// Activate without waiting for old clients to close.
    pub skip_waiting: bool,
}

/// Fetch and store every manifest URL in the precache.
///
/// One failed fetch or non-2xx status fails the install and stores nothing;
/// a precache this install created is removed again.
pub async fn precache(
    caches: &CacheStore,
    fetcher: &dyn Fetcher,
    config: &WorkerConfig,
) -> Result<InstallOutcome> {
    let urls = config
        .precache_urls()
        .map_err(|e| ServiceWorkerError::InstallFailed(e.to_string()))?;

    let existed = caches.has(&config.precache_name).await;
    let cache = caches.open(&config.precache_name).await;
    if let Err(e) = cache.add_all(fetcher, &urls).await {
        error!(cache = %config.precache_name, error = %e, "Precache failed");
        if !existed {
            caches.delete(&config.precache_name).await;
        }
        return Err(ServiceWorkerError::InstallFailed(e.to_string()));
    }

    info!(cache = %config.precache_name, count = urls.len(), "Precached manifest");
    Ok(InstallOutcome {
        precached: urls.len(),
        skip_waiting: true,
    })
}
