//! Connected pages and the messages sent to them.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use url::Url;

use crate::ServiceWorkerError;

/// Message posted from the worker to a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// A new worker took control; the page may offer a reload.
    NewSwAvailable,
}

/// Unique identifier for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

/// A connected page.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    pub client_type: ClientType,
    /// Whether the active worker controls this client.
    pub controlled: bool,
    sender: mpsc::UnboundedSender<ClientMessage>,
}

impl Client {
    /// Post message to client.
    pub fn post_message(&self, message: ClientMessage) -> Result<(), ServiceWorkerError> {
        self.sender.send(message).map_err(|_| {
            ServiceWorkerError::StateError(format!("client {} is gone", self.id.raw()))
        })
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    /// `None` matches every type.
    pub client_type: Option<ClientType>,
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// The set of connected clients.
#[derive(Debug, Default)]
pub struct Clients {
    clients: RwLock<HashMap<ClientId, Client>>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page. Returns its id and the receiving end of its
    /// message channel.
    pub async fn connect(
        &self,
        url: Url,
        client_type: ClientType,
    ) -> (ClientId, mpsc::UnboundedReceiver<ClientMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ClientId::new();
        debug!(client = id.raw(), url = %url, "Client connected");
        self.clients.write().await.insert(
            id,
            Client {
                id,
                url,
                client_type,
                controlled: false,
                sender,
            },
        );
        (id, receiver)
    }

    /// Remove a client.
    pub async fn disconnect(&self, id: ClientId) -> Option<Client> {
        let removed = self.clients.write().await.remove(&id);
        if removed.is_some() {
            debug!(client = id.raw(), "Client disconnected");
        }
        removed
    }

    /// Get a client by ID.
    pub async fn get(&self, id: ClientId) -> Option<Client> {
        self.clients.read().await.get(&id).cloned()
    }

    /// Match clients, ordered by id.
    pub async fn match_all(&self, options: ClientMatchOptions) -> Vec<Client> {
        let clients = self.clients.read().await;
        let mut matched: Vec<Client> = clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controlled)
            .filter(|c| options.client_type.map_or(true, |t| c.client_type == t))
            .cloned()
            .collect();
        matched.sort_by_key(|c| c.id);
        matched
    }

    /// Take control of every connected client. Returns how many were newly
    /// claimed.
    pub async fn claim(&self) -> usize {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for client in clients.values_mut() {
            if !client.controlled {
                client.controlled = true;
                claimed += 1;
            }
        }
        claimed
    }

    /// Post `message` to every controlled client. Closed channels are
    /// skipped.
    pub async fn broadcast(&self, message: ClientMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for client in self.match_all(ClientMatchOptions::default()).await {
            match client.post_message(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(client = client.id.raw(), error = %e, "Dropping message");
                    report.dropped += 1;
                }
            }
        }
        report
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}
