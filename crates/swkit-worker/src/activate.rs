//! Activate: sweep caches from other versions and claim clients.

use swkit_cache::CacheStore;
use tracing::info;

use crate::{ClientsHost, Result, WorkerConfig};

/// What a successful activation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateOutcome {
    /// Cache names deleted.
    pub deleted: Vec<String>,
    /// Clients newly claimed.
    pub claimed: usize,
}

/// Delete every cache not named in the config, then claim open clients.
pub async fn sweep(
    caches: &CacheStore,
    clients: &dyn ClientsHost,
    config: &WorkerConfig,
) -> Result<ActivateOutcome> {
    let allowed = config.allowed_caches();
    let mut deleted = Vec::new();

    for name in caches.keys().await {
        if allowed.contains(&name.as_str()) {
            continue;
        }
        if caches.delete(&name).await {
            info!(cache = %name, "Deleted old cache");
            deleted.push(name);
        }
    }

    let claimed = clients.claim().await?;
    Ok(ActivateOutcome { deleted, claimed })
}
