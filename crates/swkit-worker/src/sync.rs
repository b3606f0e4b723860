//! Background sync: replay one fixed POST when the host fires the tag.

use swkit_net::{Fetcher, Request};
use tracing::{debug, error, info};

use crate::{Result, ServiceWorkerError, WorkerConfig};

/// Handle a sync event.
///
/// Tags other than the configured one are ignored and resolve to `None`.
/// A network error, a non-2xx status or an unparseable body rejects the
/// event, which the host may retry later.
pub async fn replay(
    fetcher: &dyn Fetcher,
    config: &WorkerConfig,
    tag: &str,
) -> Result<Option<serde_json::Value>> {
    if tag != config.sync.tag {
        debug!(tag, "Ignoring sync for unknown tag");
        return Ok(None);
    }

    match post(fetcher, config).await {
        Ok(value) => {
            info!(tag, response = %value, "Background sync succeeded");
            Ok(Some(value))
        }
        Err(e) => {
            error!(tag, error = %e, "Background sync failed");
            Err(e)
        }
    }
}

async fn post(fetcher: &dyn Fetcher, config: &WorkerConfig) -> Result<serde_json::Value> {
    let url = config.resolve(&config.sync.endpoint)?;
    let request = Request::post_json(url, &config.sync.payload)
        .map_err(|e| ServiceWorkerError::SyncFailed(e.to_string()))?;

    let response = fetcher
        .fetch(request)
        .await
        .map_err(|e| ServiceWorkerError::SyncFailed(e.to_string()))?;
    if !response.ok() {
        return Err(ServiceWorkerError::SyncFailed(format!(
            "{} answered {}",
            response.url, response.status
        )));
    }

    response
        .json()
        .await
        .map_err(|e| ServiceWorkerError::SyncFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use swkit_net::testing::{Reply, StaticFetcher};

    const ENDPOINT: &str = "http://localhost:8080/sync";

    #[tokio::test]
    async fn test_success_returns_parsed_body() {
        let fetcher = StaticFetcher::new().route(ENDPOINT, Reply::json(200, &json!({"ok": true})));

        let value = replay(&fetcher, &WorkerConfig::default(), "sync-data")
            .await
            .unwrap();

        assert_eq!(value, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_posts_configured_payload() {
        let fetcher = StaticFetcher::new().route(ENDPOINT, Reply::json(200, &json!({})));

        replay(&fetcher, &WorkerConfig::default(), "sync-data")
            .await
            .unwrap();

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, http::Method::POST);
        assert_eq!(
            requests[0].headers.get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body: serde_json::Value =
            serde_json::from_slice(requests[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"key": "value"}));
    }

    #[tokio::test]
    async fn test_server_error_rejects() {
        let fetcher = StaticFetcher::new().route(ENDPOINT, Reply::status(500));

        let result = replay(&fetcher, &WorkerConfig::default(), "sync-data").await;

        assert!(matches!(result, Err(ServiceWorkerError::SyncFailed(_))));
    }

    #[tokio::test]
    async fn test_network_error_rejects() {
        let fetcher = StaticFetcher::new().route(ENDPOINT, Reply::NetworkError);

        let result = replay(&fetcher, &WorkerConfig::default(), "sync-data").await;

        assert!(matches!(result, Err(ServiceWorkerError::SyncFailed(_))));
    }

    #[tokio::test]
    async fn test_non_json_body_rejects() {
        let fetcher = StaticFetcher::new().route(ENDPOINT, Reply::ok("not json"));

        let result = replay(&fetcher, &WorkerConfig::default(), "sync-data").await;

        assert!(matches!(result, Err(ServiceWorkerError::SyncFailed(_))));
    }

    #[tokio::test]
    async fn test_unknown_tag_is_ignored() {
        let fetcher = StaticFetcher::new();

        let value = replay(&fetcher, &WorkerConfig::default(), "other-tag")
            .await
            .unwrap();

        assert_eq!(value, None);
        assert_eq!(fetcher.calls(), 0);
    }
}
