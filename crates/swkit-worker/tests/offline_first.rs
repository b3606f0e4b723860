//! End-to-end tests against a real HTTP server.

use std::sync::Arc;

use serde_json::json;
use swkit_cache::CacheStore;
use swkit_net::{Fetcher, HttpFetcher, LoaderConfig, Request};
use swkit_worker::{
    Clients, NotificationCenter, ServiceWorkerGlobalScope, ServiceWorkerRegistration, WorkerConfig,
};
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn site() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>home</h1>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/app.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("main()"))
        .expect(1)
        .mount(&server)
        .await;
    server
}

fn config(server: &MockServer) -> WorkerConfig {
    WorkerConfig::from_json(
        &json!({
            "origin": server.uri(),
            "precache_manifest": ["/", "/app.js"],
            "max_cache_items": 2,
        })
        .to_string(),
    )
    .unwrap()
}

fn scope(
    config: WorkerConfig,
    caches: CacheStore,
    fetcher: Arc<dyn Fetcher>,
) -> ServiceWorkerGlobalScope {
    ServiceWorkerGlobalScope {
        clients: Arc::new(Clients::new(config.origin.clone())),
        config: Arc::new(config),
        caches,
        fetcher,
        notifier: Arc::new(NotificationCenter::new()),
    }
}

fn http() -> Arc<dyn Fetcher> {
    Arc::new(HttpFetcher::new(&LoaderConfig::default()).unwrap())
}

fn request(server: &MockServer, route: &str) -> Request {
    Request::parse(&format!("{}{}", server.uri(), route)).unwrap()
}

#[tokio::test]
async fn test_precache_then_serve_offline_first() {
    let server = site().await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2, 3])))
        .expect(1)
        .mount(&server)
        .await;

    let network = http();
    let caches = CacheStore::new();
    let config = config(&server);
    let (registration, _events) =
        ServiceWorkerRegistration::new(config.origin.clone(), network.clone());
    registration
        .update(scope(config, caches.clone(), network))
        .await
        .unwrap();

    let home = registration.fetch(request(&server, "/")).await.unwrap();
    assert!(home.is_from_cache());
    assert_eq!(home.text().await.unwrap(), "<h1>home</h1>");

    for _ in 0..2 {
        let items = registration
            .fetch(request(&server, "/api/items"))
            .await
            .unwrap();
        let items: Vec<u32> = items.json().await.unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    assert_eq!(caches.keys().await, vec!["precache-v1", "runtime"]);
    // Mock expectations are verified when the server drops.
}

#[tokio::test]
async fn test_runtime_cache_stays_bounded() {
    let server = site().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("page"))
        .mount(&server)
        .await;

    let network = http();
    let caches = CacheStore::new();
    let config = config(&server);
    let (registration, _events) =
        ServiceWorkerRegistration::new(config.origin.clone(), network.clone());
    registration
        .update(scope(config, caches.clone(), network))
        .await
        .unwrap();

    for n in 0..5 {
        registration
            .fetch(request(&server, &format!("/page?n={n}")))
            .await
            .unwrap();
    }

    let keys: Vec<String> = caches
        .open("runtime")
        .await
        .keys()
        .await
        .into_iter()
        .map(|k| k.url.query().unwrap_or_default().to_string())
        .collect();
    assert_eq!(keys, vec!["n=3", "n=4"]);
}

#[tokio::test]
async fn test_background_sync_posts_payload() {
    let server = site().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .and(body_json(json!({"key": "value"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let network = http();
    let config = config(&server);
    let (registration, _events) =
        ServiceWorkerRegistration::new(config.origin.clone(), network.clone());
    registration
        .update(scope(config, CacheStore::new(), network))
        .await
        .unwrap();

    let value = registration.sync("sync-data").await.unwrap();
    assert_eq!(value, Some(json!({"status": "ok"})));
}

#[tokio::test]
async fn test_saved_caches_survive_restart() {
    let server = site().await;
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("caches.json");

    {
        let network = http();
        let caches = CacheStore::load(&store_path).await.unwrap();
        let config = config(&server);
        let (registration, _events) =
            ServiceWorkerRegistration::new(config.origin.clone(), network.clone());
        registration
            .update(scope(config, caches.clone(), network))
            .await
            .unwrap();
        caches.save(&store_path).await.unwrap();
    }

    let network = http();
    let caches = CacheStore::load(&store_path).await.unwrap();
    let config = config(&server);
    let origin: Url = config.origin.clone();
    let (registration, _events) = ServiceWorkerRegistration::new(origin, network.clone());
    registration
        .resume(scope(config, caches, network))
        .await
        .unwrap();

    let app = registration.fetch(request(&server, "/app.js")).await.unwrap();
    assert!(app.is_from_cache());
    assert_eq!(app.text().await.unwrap(), "main()");
}
