//! The service worker script and its event loop.
//!
//! Each event type gets its own channel and dispatch task, and every event
//! runs in a task of its own. Events of the same type are therefore not
//! serialized against each other; shared state lives in [`CacheStore`] and
//! the host objects, which lock per operation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use swkit_cache::CacheStore;
use swkit_net::{Fetcher, Request, Response};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::{
    activate, install, push, sync, ActivateOutcome, Client, ClientsHost, InstallOutcome,
    Notification, Notifier, Result, RuntimeCache, ServiceWorkerError, ServiceWorkerState,
    WorkerConfig,
};

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Everything a worker's handlers can reach.
#[derive(Clone)]
pub struct ServiceWorkerGlobalScope {
    pub config: Arc<WorkerConfig>,
    pub caches: CacheStore,
    pub fetcher: Arc<dyn Fetcher>,
    pub clients: Arc<dyn ClientsHost>,
    pub notifier: Arc<dyn Notifier>,
}

/// How the worker answered a fetch event.
#[derive(Debug)]
pub enum FetchResult {
    /// The worker produced the response.
    Respond(Response),
    /// The worker declined; the host should use the network.
    Passthrough(Request),
}

/// An event together with the channel its handler settles.
struct Extendable<T, R> {
    payload: T,
    done: oneshot::Sender<Result<R>>,
}

type EventSender<T, R> = mpsc::UnboundedSender<Extendable<T, R>>;

/// Host-side handle for dispatching events to a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    install: EventSender<(), InstallOutcome>,
    activate: EventSender<(), ActivateOutcome>,
    fetch: EventSender<Request, FetchResult>,
    sync: EventSender<String, Option<serde_json::Value>>,
    push: EventSender<Option<Bytes>, Notification>,
    notification_click: EventSender<Notification, Client>,
}

impl WorkerHandle {
    pub async fn install(&self) -> Result<InstallOutcome> {
        dispatch(&self.install, ()).await
    }

    pub async fn activate(&self) -> Result<ActivateOutcome> {
        dispatch(&self.activate, ()).await
    }

    pub async fn fetch(&self, request: Request) -> Result<FetchResult> {
        dispatch(&self.fetch, request).await
    }

    pub async fn sync(&self, tag: impl Into<String>) -> Result<Option<serde_json::Value>> {
        dispatch(&self.sync, tag.into()).await
    }

    pub async fn push(&self, data: Option<Bytes>) -> Result<Notification> {
        dispatch(&self.push, data).await
    }

    pub async fn notification_click(&self, notification: Notification) -> Result<Client> {
        dispatch(&self.notification_click, notification).await
    }
}

async fn dispatch<T, R>(tx: &EventSender<T, R>, payload: T) -> Result<R> {
    let (done, settled) = oneshot::channel();
    tx.send(Extendable { payload, done })
        .map_err(|_| ServiceWorkerError::Terminated)?;
    settled.await.map_err(|_| ServiceWorkerError::Terminated)?
}

/// Run `handler` for every event arriving on `rx`, each in its own task.
fn listen<T, R, F, Fut>(
    scope: ServiceWorkerGlobalScope,
    mut rx: mpsc::UnboundedReceiver<Extendable<T, R>>,
    event: &'static str,
    handler: F,
) where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(ServiceWorkerGlobalScope, T) -> Fut + Copy + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(Extendable { payload, done }) = rx.recv().await {
            trace!(event, "Dispatching");
            let scope = scope.clone();
            tokio::spawn(async move {
                let _ = done.send(handler(scope, payload).await);
            });
        }
        debug!(event, "Event channel closed");
    });
}

async fn on_install(scope: ServiceWorkerGlobalScope, _: ()) -> Result<InstallOutcome> {
    install::precache(&scope.caches, scope.fetcher.as_ref(), &scope.config).await
}

async fn on_activate(scope: ServiceWorkerGlobalScope, _: ()) -> Result<ActivateOutcome> {
    activate::sweep(&scope.caches, scope.clients.as_ref(), &scope.config).await
}

async fn on_fetch(scope: ServiceWorkerGlobalScope, request: Request) -> Result<FetchResult> {
    let runtime = RuntimeCache::new(scope.caches.clone(), scope.fetcher.clone(), &scope.config);
    if !runtime.intercepts(&request) {
        return Ok(FetchResult::Passthrough(request));
    }
    runtime.lookup(request).await.map(FetchResult::Respond)
}

async fn on_sync(
    scope: ServiceWorkerGlobalScope,
    tag: String,
) -> Result<Option<serde_json::Value>> {
    sync::replay(scope.fetcher.as_ref(), &scope.config, &tag).await
}

async fn on_push(scope: ServiceWorkerGlobalScope, data: Option<Bytes>) -> Result<Notification> {
    push::show(data.as_deref(), scope.notifier.as_ref(), &scope.config).await
}

async fn on_notification_click(
    scope: ServiceWorkerGlobalScope,
    notification: Notification,
) -> Result<Client> {
    push::click(
        &notification,
        scope.notifier.as_ref(),
        scope.clients.as_ref(),
        &scope.config,
    )
    .await
}

/// A running service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,

    /// Configuration the script was started with.
    pub config: Arc<WorkerConfig>,

    handle: WorkerHandle,
}

impl ServiceWorker {
    /// Start the worker's event loops. Must be called inside a Tokio runtime.
    pub fn spawn(scope: ServiceWorkerGlobalScope) -> Self {
        let (install, install_rx) = mpsc::unbounded_channel();
        let (activate, activate_rx) = mpsc::unbounded_channel();
        let (fetch, fetch_rx) = mpsc::unbounded_channel();
        let (sync, sync_rx) = mpsc::unbounded_channel();
        let (push, push_rx) = mpsc::unbounded_channel();
        let (notification_click, click_rx) = mpsc::unbounded_channel();

        listen(scope.clone(), install_rx, "install", on_install);
        listen(scope.clone(), activate_rx, "activate", on_activate);
        listen(scope.clone(), fetch_rx, "fetch", on_fetch);
        listen(scope.clone(), sync_rx, "sync", on_sync);
        listen(scope.clone(), push_rx, "push", on_push);
        listen(scope.clone(), click_rx, "notificationclick", on_notification_click);

        let id = ServiceWorkerId::new();
        debug!(%id, cache = %scope.config.precache_name, "Service worker started");

        Self {
            id,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
            config: scope.config,
            handle: WorkerHandle {
                install,
                activate,
                fetch,
                sync,
                push,
                notification_click,
            },
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }

    pub fn handle(&self) -> &WorkerHandle {
        &self.handle
    }
}
