//! Clients API: the pages the worker can see and control.
//!
//! Window operations do not act on real windows; they are reported to the host
//! as [`WorkerEvent`]s and reflected in the registry.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use url::Url;

use crate::messenger::OutboundMessage;
use crate::{ServiceWorkerError, WorkerEvent};

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// A client (page or worker) of this origin.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether this worker controls the client.
    pub controlled: bool,
}

impl Client {
    /// A window client that is not yet controlled.
    pub fn window(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controlled: false,
        }
    }

    /// Whether the client belongs to the given origin.
    pub fn same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }
}

/// Options for `match_all`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Registry of clients.
#[derive(Debug)]
pub struct Clients {
    clients: HashMap<String, Client>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl Clients {
    pub fn new(event_tx: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            clients: HashMap::new(),
            event_tx,
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // The host may have stopped listening; the registry stays consistent either way
        let _ = self.event_tx.send(event);
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        trace!(client_id = %client.id, url = %client.url, "Client added");
        self.clients.insert(client.id.clone(), client);
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Match all clients, ordered by ID for stable iteration.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controlled)
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Take control of every client without a reload.
    pub fn claim(&mut self) -> Vec<String> {
        let mut claimed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| !c.controlled)
            .map(|c| {
                c.controlled = true;
                c.id.clone()
            })
            .collect();
        claimed.sort();
        debug!(count = claimed.len(), "Clients claimed");
        self.emit(WorkerEvent::ClientsClaimed {
            client_ids: claimed.clone(),
        });
        claimed
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<(), ServiceWorkerError> {
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| ServiceWorkerError::StateError(format!("unknown client {}", id)))?;
        if client.client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }
        client.focused = true;
        self.emit(WorkerEvent::ClientFocused {
            client_id: id.to_string(),
        });
        Ok(())
    }

    /// Navigate a controlled window client.
    pub fn navigate(&mut self, id: &str, url: Url) -> Result<(), ServiceWorkerError> {
        let client = self
            .clients
            .get_mut(id)
            .ok_or_else(|| ServiceWorkerError::StateError(format!("unknown client {}", id)))?;
        if client.client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only navigate window clients".to_string(),
            ));
        }
        if !client.controlled {
            return Err(ServiceWorkerError::StateError(
                "Can only navigate controlled clients".to_string(),
            ));
        }
        client.url = url.clone();
        self.emit(WorkerEvent::ClientNavigated {
            client_id: id.to_string(),
            url,
        });
        Ok(())
    }

    /// Open a window.
    pub fn open_window(&mut self, url: Url) -> Client {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("window-{}", COUNTER.fetch_add(1, Ordering::Relaxed));

        let client = Client {
            id: id.clone(),
            url: url.clone(),
            client_type: ClientType::Window,
            focused: true,
            controlled: true,
        };
        self.clients.insert(id.clone(), client.clone());
        self.emit(WorkerEvent::WindowOpened { client_id: id, url });
        client
    }

    /// Post a message to every client, controlled or not. Returns the recipient count.
    pub fn broadcast(&self, message: &OutboundMessage) -> usize {
        let options = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::All,
        };
        let recipients = self.match_all(&options);
        for client in &recipients {
            self.emit(WorkerEvent::ClientMessage {
                client_id: client.id.clone(),
                message: message.clone(),
            });
        }
        recipients.len()
    }
}
