//! # SwKit Worker
//!
//! An offline-first service worker and the host runtime that drives it.
//!
//! ## Features
//!
//! - **Precache**: install-time fetch of a fixed manifest, all or nothing
//! - **Runtime cache**: cache-first serving with a count-bounded runtime cache
//! - **Cutover**: activate deletes every cache outside the current version
//! - **Background sync**: replay of one fixed POST, retried by the host
//! - **Push**: notification display and click-to-open
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerRegistration (lifecycle, job ordering, sync retry)
//!     ├── installing / waiting / active (ServiceWorker)
//!     │       └── WorkerHandle ── one channel + task per event type
//!     │               install → install::precache
//!     │               activate → activate::sweep
//!     │               fetch → RuntimeCache
//!     │               sync → sync::replay
//!     │               push / notificationclick → push
//!     └── network (dyn Fetcher) for requests no worker handles
//!
//! ServiceWorkerGlobalScope: config + caches + fetcher + clients + notifier
//! ```

use serde::{Deserialize, Serialize};
use swkit_cache::CacheError;
use swkit_net::NetError;
use thiserror::Error;

pub mod activate;
pub mod clients;
pub mod config;
pub mod install;
pub mod notifications;
pub mod push;
pub mod registration;
pub mod runtime_cache;
pub mod sync;
pub mod worker;

pub use activate::ActivateOutcome;
pub use clients::{Client, ClientMatchOptions, ClientType, Clients, ClientsHost};
pub use config::{NotificationConfig, SyncConfig, SyncRetryConfig, WorkerConfig};
pub use install::InstallOutcome;
pub use notifications::{
    Notification, NotificationCenter, NotificationData, NotificationId, NotificationOptions,
    Notifier,
};
pub use push::PushPayload;
pub use registration::{RegistrationEvent, ServiceWorkerRegistration};
pub use runtime_cache::{evict, RuntimeCache};
pub use worker::{
    FetchResult, ServiceWorker, ServiceWorkerGlobalScope, ServiceWorkerId, WorkerHandle,
};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
///
/// This is the rejection value of every dispatched event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Sync failed: {0}")]
    SyncFailed(String),

    #[error("Invalid push payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Worker terminated")]
    Terminated,
}

impl From<NetError> for ServiceWorkerError {
    fn from(e: NetError) -> Self {
        Self::NetworkError(e.to_string())
    }
}

impl From<CacheError> for ServiceWorkerError {
    fn from(e: CacheError) -> Self {
        Self::CacheError(e.to_string())
    }
}

impl From<url::ParseError> for ServiceWorkerError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

// ==================== Types ====================

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ServiceWorkerState {
    /// Script evaluated, no lifecycle event yet.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}
