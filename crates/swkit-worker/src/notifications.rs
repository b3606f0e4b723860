//! Notifications the worker can show and close.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::Result;

/// Unique identifier for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Data attached to a notification, read back on click.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Page to open when the notification is clicked.
    pub url: String,
}

/// Options for showing a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub data: NotificationData,
}

/// A notification on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
    pub shown_at: SystemTime,
}

/// Host side of the Notifications API.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Display a notification.
    async fn show_notification(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<Notification>;

    /// Close a notification. Returns false if it was not showing.
    async fn close(&self, id: NotificationId) -> bool;
}

/// In-memory notification tray.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    showing: RwLock<Vec<Notification>>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications currently showing, oldest first.
    pub async fn showing(&self) -> Vec<Notification> {
        self.showing.read().await.clone()
    }
}

#[async_trait]
impl Notifier for NotificationCenter {
    async fn show_notification(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<Notification> {
        let notification = Notification {
            id: NotificationId::new(),
            title: title.to_string(),
            options,
            shown_at: SystemTime::now(),
        };
        debug!(id = ?notification.id, title, "Notification shown");
        self.showing.write().await.push(notification.clone());
        Ok(notification)
    }

    async fn close(&self, id: NotificationId) -> bool {
        let mut showing = self.showing.write().await;
        let before = showing.len();
        showing.retain(|n| n.id != id);
        before != showing.len()
    }
}
