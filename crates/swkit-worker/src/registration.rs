//! Host-side registration: lifecycle ordering and event routing.

use std::sync::Arc;

use bytes::Bytes;
use swkit_cache::RequestKey;
use swkit_common::{retry_with_backoff, RetryConfig};
use swkit_net::{Fetcher, Request, Response};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    Client, FetchResult, Notification, Result, ServiceWorker, ServiceWorkerError,
    ServiceWorkerGlobalScope, ServiceWorkerId, ServiceWorkerState, WorkerHandle,
};

/// Registration events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// A new worker started installing.
    UpdateFound { worker_id: ServiceWorkerId },
    /// A worker changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A new worker now controls the scope.
    ControllerChange { worker_id: ServiceWorkerId },
}

#[derive(Debug, Default)]
struct Slots {
    installing: Option<ServiceWorker>,
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
}

/// A service worker registration.
///
/// Install always completes before activate, and activate before the worker
/// sees any fetch, sync or push. Lifecycle jobs run one at a time.
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Used for requests no active worker handles.
    network: Arc<dyn Fetcher>,

    slots: RwLock<Slots>,

    jobs: Mutex<()>,

    event_tx: mpsc::UnboundedSender<RegistrationEvent>,
}

impl ServiceWorkerRegistration {
    /// Create an empty registration.
    pub fn new(
        scope: Url,
        network: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<RegistrationEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                scope,
                network,
                slots: RwLock::new(Slots::default()),
                jobs: Mutex::new(()),
                event_tx,
            },
            event_rx,
        )
    }

    /// Start a new worker, install it and activate it when it asks to skip
    /// waiting or nothing is active yet.
    ///
    /// A failed install leaves the worker redundant and the previous active
    /// worker in control.
    pub async fn update(&self, scope: ServiceWorkerGlobalScope) -> Result<ServiceWorkerId> {
        let _job = self.jobs.lock().await;

        let mut worker = ServiceWorker::spawn(scope);
        let id = worker.id;
        let handle = worker.handle().clone();
        self.emit(RegistrationEvent::UpdateFound { worker_id: id });
        self.transition(&mut worker, ServiceWorkerState::Installing);
        self.slots.write().await.installing = Some(worker);

        let outcome = handle.install().await;

        let mut slots = self.slots.write().await;
        let Some(mut worker) = slots.installing.take() else {
            return Err(ServiceWorkerError::StateError(
                "installing worker disappeared".to_string(),
            ));
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(worker = %id, error = %e, "Install failed");
                self.transition(&mut worker, ServiceWorkerState::Redundant);
                return Err(e);
            }
        };

        self.transition(&mut worker, ServiceWorkerState::Installed);
        if let Some(mut replaced) = slots.waiting.replace(worker) {
            self.transition(&mut replaced, ServiceWorkerState::Redundant);
        }
        let activate_now = outcome.skip_waiting || slots.active.is_none();
        drop(slots);

        if activate_now {
            self.activate_locked().await?;
        }
        Ok(id)
    }

    /// Promote the waiting worker.
    pub async fn activate_waiting(&self) -> Result<ServiceWorkerId> {
        let _job = self.jobs.lock().await;
        self.activate_locked().await
    }

    /// Start a worker whose caches a previous run already installed and make
    /// it active without running install or activate.
    pub async fn resume(&self, scope: ServiceWorkerGlobalScope) -> Result<ServiceWorkerId> {
        let _job = self.jobs.lock().await;

        let precache = scope.config.precache_name.clone();
        if !precache_complete(&scope).await? {
            return Err(ServiceWorkerError::StateError(format!(
                "no complete precache {precache:?} to resume from"
            )));
        }
        let clients = scope.clients.clone();

        let mut worker = ServiceWorker::spawn(scope);
        let id = worker.id;
        self.transition(&mut worker, ServiceWorkerState::Activated);
        self.install_active(worker).await;
        clients.claim().await?;

        info!(worker = %id, cache = %precache, "Resumed installed worker");
        Ok(id)
    }

    async fn activate_locked(&self) -> Result<ServiceWorkerId> {
        let Some(mut worker) = self.slots.write().await.waiting.take() else {
            return Err(ServiceWorkerError::StateError(
                "no waiting worker to activate".to_string(),
            ));
        };
        let id = worker.id;
        let handle = worker.handle().clone();

        self.transition(&mut worker, ServiceWorkerState::Activating);
        self.install_active(worker).await;

        // A rejected activate still ends in Activated.
        match handle.activate().await {
            Ok(outcome) => debug!(
                worker = %id,
                deleted = ?outcome.deleted,
                claimed = outcome.claimed,
                "Activate handler finished"
            ),
            Err(e) => warn!(worker = %id, error = %e, "Activate handler rejected"),
        }

        if let Some(active) = self.slots.write().await.active.as_mut() {
            if active.id == id {
                self.transition(active, ServiceWorkerState::Activated);
            }
        }
        info!(worker = %id, "Service worker activated");
        Ok(id)
    }

    async fn install_active(&self, worker: ServiceWorker) {
        let id = worker.id;
        let mut slots = self.slots.write().await;
        if let Some(mut old) = slots.active.replace(worker) {
            self.transition(&mut old, ServiceWorkerState::Redundant);
        }
        self.emit(RegistrationEvent::ControllerChange { worker_id: id });
    }

    /// Route a request through the active worker, falling back to the
    /// network when there is none or it passes.
    pub async fn fetch(&self, request: Request) -> Result<Response> {
        let request = match self.active_handle().await {
            Some(handle) => match handle.fetch(request).await? {
                FetchResult::Respond(response) => return Ok(response),
                FetchResult::Passthrough(request) => request,
            },
            None => request,
        };
        debug!(url = %request.url, "Fetching from network");
        Ok(self.network.fetch(request).await?)
    }

    /// Fire a sync event, retrying rejections with the active worker's
    /// retry policy.
    pub async fn sync(&self, tag: &str) -> Result<Option<serde_json::Value>> {
        let policy = self.require_active_worker().await?.config.sync.retry.to_retry_config();
        self.sync_with_policy(tag, &policy).await
    }

    /// Fire a sync event, retrying rejections with `policy`. The last
    /// rejection is returned once attempts run out.
    pub async fn sync_with_policy(
        &self,
        tag: &str,
        policy: &RetryConfig,
    ) -> Result<Option<serde_json::Value>> {
        let handle = self.require_active().await?;
        retry_with_backoff(policy, || {
            let handle = handle.clone();
            let tag = tag.to_string();
            async move { handle.sync(tag).await }
        })
        .await
    }

    /// Deliver a push message to the active worker.
    pub async fn push(&self, data: Option<Bytes>) -> Result<Notification> {
        self.require_active().await?.push(data).await
    }

    /// Deliver a notification click to the active worker.
    pub async fn notification_click(&self, notification: Notification) -> Result<Client> {
        self.require_active()
            .await?
            .notification_click(notification)
            .await
    }

    pub async fn installing(&self) -> Option<ServiceWorker> {
        self.slots.read().await.installing.clone()
    }

    pub async fn waiting(&self) -> Option<ServiceWorker> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn active(&self) -> Option<ServiceWorker> {
        self.slots.read().await.active.clone()
    }

    async fn active_handle(&self) -> Option<WorkerHandle> {
        self.slots
            .read()
            .await
            .active
            .as_ref()
            .filter(|w| w.is_active())
            .map(|w| w.handle().clone())
    }

    async fn require_active(&self) -> Result<WorkerHandle> {
        self.active_handle()
            .await
            .ok_or_else(|| ServiceWorkerError::StateError("no active worker".to_string()))
    }

    async fn require_active_worker(&self) -> Result<ServiceWorker> {
        self.slots
            .read()
            .await
            .active
            .clone()
            .filter(ServiceWorker::is_active)
            .ok_or_else(|| ServiceWorkerError::StateError("no active worker".to_string()))
    }

    fn transition(&self, worker: &mut ServiceWorker, state: ServiceWorkerState) {
        worker.set_state(state);
        debug!(worker = %worker.id, ?state, "State change");
        self.emit(RegistrationEvent::StateChange {
            worker_id: worker.id,
            new_state: state,
        });
    }

    fn emit(&self, event: RegistrationEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Whether the store holds every manifest entry of the scope's precache.
async fn precache_complete(scope: &ServiceWorkerGlobalScope) -> Result<bool> {
    let config = &scope.config;
    if !scope.caches.has(&config.precache_name).await {
        return Ok(false);
    }
    let stored = scope.caches.open(&config.precache_name).await.keys().await;
    let manifest = config.precache_urls()?;
    Ok(manifest
        .iter()
        .all(|url| stored.contains(&RequestKey::get(url))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Clients, NotificationCenter, WorkerConfig};
    use swkit_cache::CacheStore;
    use swkit_net::testing::{Reply, StaticFetcher};

    const ORIGIN: &str = "http://localhost:8080";

    fn url(path: &str) -> String {
        format!("{ORIGIN}{path}")
    }

    fn site() -> StaticFetcher {
        StaticFetcher::new()
            .route(&url("/"), Reply::ok("home"))
            .route(&url("/app.js"), Reply::ok("main()"))
    }

    fn config(precache_name: &str) -> WorkerConfig {
        WorkerConfig {
            precache_name: precache_name.to_string(),
            precache_manifest: vec!["/".into(), "/app.js".into()],
            ..Default::default()
        }
    }

    fn scope(
        config: WorkerConfig,
        caches: &CacheStore,
        fetcher: &Arc<StaticFetcher>,
    ) -> ServiceWorkerGlobalScope {
        ServiceWorkerGlobalScope {
            clients: Arc::new(Clients::new(config.origin.clone())),
            config: Arc::new(config),
            caches: caches.clone(),
            fetcher: fetcher.clone(),
            notifier: Arc::new(NotificationCenter::new()),
        }
    }

    fn registration(
        fetcher: &Arc<StaticFetcher>,
    ) -> (
        ServiceWorkerRegistration,
        mpsc::UnboundedReceiver<RegistrationEvent>,
    ) {
        ServiceWorkerRegistration::new(Url::parse(ORIGIN).unwrap(), fetcher.clone())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RegistrationEvent>) -> Vec<RegistrationEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_lifecycle_order() {
        let fetcher = Arc::new(site());
        let caches = CacheStore::new();
        let (registration, mut rx) = registration(&fetcher);

        let id = registration
            .update(scope(config("precache-v1"), &caches, &fetcher))
            .await
            .unwrap();

        let state = |new_state| RegistrationEvent::StateChange {
            worker_id: id,
            new_state,
        };
        assert_eq!(
            drain(&mut rx),
            vec![
                RegistrationEvent::UpdateFound { worker_id: id },
                state(ServiceWorkerState::Installing),
                state(ServiceWorkerState::Installed),
                state(ServiceWorkerState::Activating),
                RegistrationEvent::ControllerChange { worker_id: id },
                state(ServiceWorkerState::Activated),
            ]
        );
        assert!(registration.active().await.unwrap().is_active());
        assert!(registration.waiting().await.is_none());
        assert!(registration.installing().await.is_none());
    }

    #[tokio::test]
    async fn test_version_cutover_deletes_old_precache() {
        let fetcher = Arc::new(site());
        let caches = CacheStore::new();
        let (registration, _rx) = registration(&fetcher);

        let v1 = registration
            .update(scope(config("precache-v1"), &caches, &fetcher))
            .await
            .unwrap();
        registration
            .fetch(Request::parse(&url("/api/items")).unwrap())
            .await
            .unwrap();
        assert_eq!(caches.keys().await, vec!["precache-v1", "runtime"]);

        let v2 = registration
            .update(scope(config("precache-v2"), &caches, &fetcher))
            .await
            .unwrap();

        assert_ne!(v1, v2);
        assert_eq!(registration.active().await.unwrap().id, v2);
        assert_eq!(caches.keys().await, vec!["runtime", "precache-v2"]);
    }

    #[tokio::test]
    async fn test_failed_install_keeps_previous_worker() {
        let fetcher = Arc::new(site());
        let caches = CacheStore::new();
        let (registration, mut rx) = registration(&fetcher);
        let v1 = registration
            .update(scope(config("precache-v1"), &caches, &fetcher))
            .await
            .unwrap();
        drain(&mut rx);

        let mut broken = config("precache-v2");
        broken.precache_manifest.push("/missing.css".into());
        let result = registration
            .update(scope(broken, &caches, &fetcher))
            .await;

        assert!(matches!(result, Err(ServiceWorkerError::InstallFailed(_))));
        assert!(matches!(
            drain(&mut rx).last(),
            Some(RegistrationEvent::StateChange {
                new_state: ServiceWorkerState::Redundant,
                ..
            })
        ));
        assert_eq!(registration.active().await.unwrap().id, v1);
        assert!(registration.installing().await.is_none());
        assert_eq!(caches.keys().await, vec!["precache-v1"]);
    }

    #[tokio::test]
    async fn test_resume_refuses_unfinished_install() {
        let fetcher = Arc::new(site());
        let caches = CacheStore::new();
        let (registration, _rx) = registration(&fetcher);
        let mut broken = config("precache-v1");
        broken.precache_manifest.push("/missing.css".into());
        assert!(registration
            .update(scope(broken.clone(), &caches, &fetcher))
            .await
            .is_err());

        // A partially filled precache is not enough either.
        caches
            .open("precache-v1")
            .await
            .add_all(fetcher.as_ref(), &[Url::parse(&url("/")).unwrap()])
            .await
            .unwrap();

        let result = registration
            .resume(scope(broken, &caches, &fetcher))
            .await;

        assert!(matches!(result, Err(ServiceWorkerError::StateError(_))));
        assert!(registration.active().await.is_none());
    }

    #[tokio::test]
    async fn test_uncontrolled_requests_go_to_network() {
        let fetcher = Arc::new(site());
        let (registration, _rx) = registration(&fetcher);

        let response = registration
            .fetch(Request::parse(&url("/")).unwrap())
            .await
            .unwrap();

        assert!(!response.is_from_cache());
        assert_eq!(response.text().await.unwrap(), "home");
        assert!(matches!(
            registration.sync("sync-data").await,
            Err(ServiceWorkerError::StateError(_))
        ));
        assert!(matches!(
            registration.push(None).await,
            Err(ServiceWorkerError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_post_passes_through_to_network() {
        let fetcher = Arc::new(site());
        let caches = CacheStore::new();
        let (registration, _rx) = registration(&fetcher);
        registration
            .update(scope(config("precache-v1"), &caches, &fetcher))
            .await
            .unwrap();

        let post = Request::post(Url::parse(&url("/")).unwrap(), Bytes::from_static(b"x"));
        let response = registration.fetch(post).await.unwrap();

        assert!(!response.is_from_cache());
        assert!(!caches.has("runtime").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_retried_until_success() {
        let fetcher = Arc::new(site().sequence(
            &url("/sync"),
            vec![
                Reply::status(503),
                Reply::NetworkError,
                Reply::json(200, &serde_json::json!({"stored": 1})),
            ],
        ));
        let caches = CacheStore::new();
        let (registration, _rx) = registration(&fetcher);
        registration
            .update(scope(config("precache-v1"), &caches, &fetcher))
            .await
            .unwrap();

        let value = registration.sync("sync-data").await.unwrap();

        assert_eq!(value, Some(serde_json::json!({"stored": 1})));
        assert_eq!(fetcher.calls_to(&url("/sync")), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_gives_up_after_max_attempts() {
        let fetcher = Arc::new(site().route(&url("/sync"), Reply::status(500)));
        let caches = CacheStore::new();
        let (registration, _rx) = registration(&fetcher);
        registration
            .update(scope(config("precache-v1"), &caches, &fetcher))
            .await
            .unwrap();

        let result = registration.sync("sync-data").await;

        assert!(matches!(result, Err(ServiceWorkerError::SyncFailed(_))));
        assert_eq!(fetcher.calls_to(&url("/sync")), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_sync_reports_rejection() {
        let fetcher = Arc::new(site().route(&url("/sync"), Reply::status(500)));
        let caches = CacheStore::new();
        let (registration, _rx) = registration(&fetcher);
        registration
            .update(scope(config("precache-v1"), &caches, &fetcher))
            .await
            .unwrap();

        let result = registration
            .sync_with_policy("sync-data", &RetryConfig::none())
            .await;

        assert!(matches!(result, Err(ServiceWorkerError::SyncFailed(_))));
        assert_eq!(fetcher.calls_to(&url("/sync")), 1);
    }

    #[tokio::test]
    async fn test_resume_requires_installed_precache() {
        let fetcher = Arc::new(site());
        let caches = CacheStore::new();
        let (registration, _rx) = registration(&fetcher);

        assert!(matches!(
            registration
                .resume(scope(config("precache-v1"), &caches, &fetcher))
                .await,
            Err(ServiceWorkerError::StateError(_))
        ));

        caches
            .open("precache-v1")
            .await
            .add_all(
                fetcher.as_ref(),
                &[
                    Url::parse(&url("/")).unwrap(),
                    Url::parse(&url("/app.js")).unwrap(),
                ],
            )
            .await
            .unwrap();
        let calls_before = fetcher.calls();
        let id = registration
            .resume(scope(config("precache-v1"), &caches, &fetcher))
            .await
            .unwrap();

        let active = registration.active().await.unwrap();
        assert_eq!(active.id, id);
        assert!(active.is_active());
        assert_eq!(fetcher.calls(), calls_before);
    }
}
