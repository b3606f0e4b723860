//! Clients API: the pages a worker can claim, focus and open.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// A client (a page or worker the service worker may control).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether the active worker controls this client.
    pub controlled: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    /// Matches every client type.
    All,
}

/// Options for `match_all`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Host side of the Clients API.
#[async_trait]
pub trait ClientsHost: Send + Sync {
    /// Take control of every uncontrolled same-origin window. Returns how
    /// many clients were newly claimed.
    async fn claim(&self) -> Result<usize>;

    /// Clients matching `options`.
    async fn match_all(&self, options: ClientMatchOptions) -> Vec<Client>;

    /// Open a new focused window at `url`.
    async fn open_window(&self, url: Url) -> Result<Client>;

    /// Focus an existing window client.
    async fn focus(&self, id: &str) -> Result<Client>;
}

/// In-memory clients for one origin.
#[derive(Debug)]
pub struct Clients {
    origin: Url,
    clients: RwLock<HashMap<String, Client>>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Register a page that loaded without a controller.
    pub async fn add_window(&self, url: Url) -> Client {
        let client = Client {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controlled: false,
        };
        self.clients
            .write()
            .await
            .insert(client.id.clone(), client.clone());
        client
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    fn in_scope(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }
}

#[async_trait]
impl ClientsHost for Clients {
    async fn claim(&self) -> Result<usize> {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for client in clients.values_mut() {
            if client.client_type == ClientType::Window
                && !client.controlled
                && self.in_scope(&client.url)
            {
                client.controlled = true;
                claimed += 1;
            }
        }
        debug!(claimed, "Clients claimed");
        Ok(claimed)
    }

    async fn match_all(&self, options: ClientMatchOptions) -> Vec<Client> {
        self.clients
            .read()
            .await
            .values()
            .filter(|c| options.include_uncontrolled || c.controlled)
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .cloned()
            .collect()
    }

    async fn open_window(&self, url: Url) -> Result<Client> {
        let controlled = self.in_scope(&url);
        let client = Client {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: true,
            controlled,
        };

        let mut clients = self.clients.write().await;
        for other in clients.values_mut() {
            other.focused = false;
        }
        clients.insert(client.id.clone(), client.clone());
        debug!(id = %client.id, url = %client.url, "Window opened");
        Ok(client)
    }

    async fn focus(&self, id: &str) -> Result<Client> {
        let mut clients = self.clients.write().await;
        match clients.get(id) {
            None => return Err(ServiceWorkerError::NotFound(format!("client {id}"))),
            Some(c) if c.client_type != ClientType::Window => {
                return Err(ServiceWorkerError::StateError(
                    "Can only focus window clients".to_string(),
                ))
            }
            Some(_) => {}
        }

        let mut focused = None;
        for client in clients.values_mut() {
            client.focused = client.id == id;
            if client.focused {
                focused = Some(client.clone());
            }
        }
        focused.ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!(
        "client-{:016x}-{:04x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}
