//! Push messages and notification clicks.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    Client, ClientMatchOptions, ClientType, ClientsHost, Notification, NotificationData,
    NotificationOptions, Notifier, Result, ServiceWorkerError, WorkerConfig,
};

/// JSON body of a push message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_url")]
    pub url: String,
}

fn default_url() -> String {
    "/".to_string()
}

impl PushPayload {
    /// Parse push data. Missing data rejects like malformed data.
    pub fn parse(data: Option<&[u8]>) -> Result<Self> {
        let data = data.ok_or_else(|| ServiceWorkerError::InvalidPayload("no data".to_string()))?;
        serde_json::from_slice(data).map_err(|e| ServiceWorkerError::InvalidPayload(e.to_string()))
    }
}

/// Show the notification described by a push message.
pub async fn show(
    data: Option<&[u8]>,
    notifier: &dyn Notifier,
    config: &WorkerConfig,
) -> Result<Notification> {
    let payload = match PushPayload::parse(data) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Dropping push message");
            return Err(e);
        }
    };

    let options = NotificationOptions {
        body: payload.body,
        icon: config.notifications.icon.clone(),
        badge: config.notifications.badge.clone(),
        data: NotificationData { url: payload.url },
    };
    let notification = notifier.show_notification(&payload.title, options).await?;
    info!(id = ?notification.id, title = %notification.title, "Push notification shown");
    Ok(notification)
}

/// Close a clicked notification and bring its page to the front.
///
/// An open window already at the target URL is focused; otherwise a new
/// window is opened there.
pub async fn click(
    notification: &Notification,
    notifier: &dyn Notifier,
    clients: &dyn ClientsHost,
    config: &WorkerConfig,
) -> Result<Client> {
    notifier.close(notification.id).await;

    let target = config.resolve(&notification.options.data.url)?;
    let windows = clients
        .match_all(ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        })
        .await;

    if let Some(existing) = windows.iter().find(|c| c.url == target) {
        debug!(client = %existing.id, url = %target, "Focusing existing window");
        return clients.focus(&existing.id).await;
    }

    debug!(url = %target, "Opening window");
    clients.open_window(target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Clients, NotificationCenter};
    use url::Url;

    fn origin() -> Url {
        Url::parse("http://localhost:8080/").unwrap()
    }

    #[test]
    fn test_payload_defaults() {
        let payload = PushPayload::parse(Some(br#"{"title": "Hi"}"#)).unwrap();
        assert_eq!(payload.body, "");
        assert_eq!(payload.url, "/");
    }

    #[test]
    fn test_payload_requires_title() {
        assert!(PushPayload::parse(Some(br#"{"body": "B"}"#)).is_err());
        assert!(PushPayload::parse(Some(b"not json")).is_err());
        assert!(PushPayload::parse(None).is_err());
    }

    #[tokio::test]
    async fn test_show_uses_payload_and_config() {
        let center = NotificationCenter::new();
        let data = br#"{"title": "T", "body": "B", "url": "/x"}"#;

        let shown = show(Some(data), &center, &WorkerConfig::default())
            .await
            .unwrap();

        assert_eq!(shown.title, "T");
        assert_eq!(shown.options.body, "B");
        assert_eq!(shown.options.data.url, "/x");
        assert_eq!(shown.options.icon.as_deref(), Some("/icons/icon-192x192.png"));
        assert_eq!(shown.options.badge.as_deref(), Some("/icons/badge-72x72.png"));
        assert_eq!(center.showing().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_shows_nothing() {
        let center = NotificationCenter::new();

        let result = show(Some(b"{"), &center, &WorkerConfig::default()).await;

        assert!(matches!(result, Err(ServiceWorkerError::InvalidPayload(_))));
        assert!(center.showing().await.is_empty());
    }

    #[tokio::test]
    async fn test_click_opens_target_and_closes() {
        let center = NotificationCenter::new();
        let clients = Clients::new(origin());
        let config = WorkerConfig::default();
        let shown = show(Some(br#"{"title": "T", "url": "/x"}"#), &center, &config)
            .await
            .unwrap();

        let client = click(&shown, &center, &clients, &config).await.unwrap();

        assert_eq!(client.url.as_str(), "http://localhost:8080/x");
        assert!(client.focused);
        assert!(center.showing().await.is_empty());
    }

    #[tokio::test]
    async fn test_click_focuses_existing_window() {
        let center = NotificationCenter::new();
        let clients = Clients::new(origin());
        let config = WorkerConfig::default();
        let page = clients.add_window(origin().join("/x").unwrap()).await;
        let shown = show(Some(br#"{"title": "T", "url": "/x"}"#), &center, &config)
            .await
            .unwrap();

        let client = click(&shown, &center, &clients, &config).await.unwrap();

        assert_eq!(client.id, page.id);
        assert!(client.focused);
        let all = clients
            .match_all(ClientMatchOptions {
                include_uncontrolled: true,
                client_type: ClientType::All,
            })
            .await;
        assert_eq!(all.len(), 1);
    }
}
