//! Worker configuration
//!
//! The cache names here are the only persisted layout the worker has.
//! Bump `precache_name` whenever `precache_manifest` changes; activation of
//! the new version deletes the old precache.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use swkit_common::{RetryConfig, SwKitError};
use swkit_net::LoaderConfig;
use url::Url;

/// Service worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the worker serves; only same-origin requests are intercepted
    pub origin: Url,

    /// Versioned name of the precache
    pub precache_name: String,

    /// Name of the runtime cache
    pub runtime_cache_name: String,

    /// Paths fetched into the precache at install
    pub precache_manifest: Vec<String>,

    /// Runtime cache size bound, in entries
    pub max_cache_items: usize,

    /// Background sync settings
    pub sync: SyncConfig,

    /// Push notification settings
    pub notifications: NotificationConfig,

    /// Network loader settings
    pub network: LoaderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Tag the replay handler answers to
    pub tag: String,

    /// Endpoint the payload is POSTed to
    pub endpoint: String,

    /// JSON body of the replayed request
    pub payload: serde_json::Value,

    /// Host retry policy for rejected syncs
    pub retry: SyncRetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRetryConfig {
    pub max_attempts: u32,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Icon shown with every notification
    pub icon: Option<String>,

    /// Badge shown with every notification
    pub badge: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8080/").expect("static origin parses"),
            precache_name: "precache-v1".to_string(),
            runtime_cache_name: "runtime".to_string(),
            precache_manifest: ["/", "/index.html", "/styles.css", "/app.js"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_cache_items: 50,
            sync: SyncConfig::default(),
            notifications: NotificationConfig {
                icon: Some("/icons/icon-192x192.png".to_string()),
                badge: Some("/icons/badge-72x72.png".to_string()),
            },
            network: LoaderConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tag: "sync-data".to_string(),
            endpoint: "/sync".to_string(),
            payload: json!({ "key": "value" }),
            retry: SyncRetryConfig::default(),
        }
    }
}

impl Default for SyncRetryConfig {
    fn default() -> Self {
        let policy = RetryConfig::background_sync();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_secs: policy.initial_delay.as_secs(),
            max_delay_secs: policy.max_delay.as_secs(),
            backoff_multiplier: policy.backoff_multiplier,
        }
    }
}

impl SyncRetryConfig {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
            backoff_multiplier: self.backoff_multiplier,
            jitter: false,
        }
    }
}

impl WorkerConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> swkit_common::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SwKitError::config_with_source(format!("reading {}", path.display()), e)
        })?;
        Self::from_json(&text)
    }

    /// Parse and validate a JSON config.
    pub fn from_json(text: &str) -> swkit_common::Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> swkit_common::Result<()> {
        if !self.origin.origin().is_tuple() {
            return Err(SwKitError::config(format!(
                "origin {} has no scheme/host/port",
                self.origin
            )));
        }
        if self.precache_name.is_empty() || self.runtime_cache_name.is_empty() {
            return Err(SwKitError::config("cache names must not be empty"));
        }
        if self.precache_name == self.runtime_cache_name {
            return Err(SwKitError::config(
                "precache and runtime cache must have different names",
            ));
        }
        if self.max_cache_items == 0 {
            return Err(SwKitError::config("max_cache_items must be at least 1"));
        }
        if self.sync.retry.max_attempts == 0 {
            return Err(SwKitError::config("sync.retry.max_attempts must be at least 1"));
        }
        let multiplier = self.sync.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(SwKitError::config(format!(
                "sync.retry.backoff_multiplier must be a non-negative number, got {multiplier}"
            )));
        }
        if self.sync.retry.initial_delay_secs > self.sync.retry.max_delay_secs {
            return Err(SwKitError::config(
                "sync.retry.initial_delay_secs must not exceed max_delay_secs",
            ));
        }
        for path in self.precache_manifest.iter().chain([&self.sync.endpoint]) {
            self.resolve(path).map_err(|e| {
                SwKitError::config_with_source(format!("bad path {path:?}"), e)
            })?;
        }
        Ok(())
    }

    /// Resolve a path or URL against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        self.origin.join(path)
    }

    /// Absolute URLs of the precache manifest.
    pub fn precache_urls(&self) -> Result<Vec<Url>, url::ParseError> {
        self.precache_manifest
            .iter()
            .map(|path| self.resolve(path))
            .collect()
    }

    /// Cache names that survive activation.
    pub fn allowed_caches(&self) -> [&str; 2] {
        [self.precache_name.as_str(), self.runtime_cache_name.as_str()]
    }
}
