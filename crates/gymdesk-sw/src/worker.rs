//! The offline worker: one instance per origin, driven by platform events.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use gymdesk_cache::CacheStorage;
use gymdesk_core::{CacheNamespace, CacheSet, OfflineConfig};
use gymdesk_net::{Fetcher, NetError, Request, Response};
use hashbrown::HashSet;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, trace, warn};

use crate::classify::{self, Interception};
use crate::clients::Clients;
use crate::extendable::ExtendableEvent;
use crate::lifecycle::{LifecycleManager, WorkerState};
use crate::messenger::ReplyPort;
use crate::notification::{Notification, Notifications};
use crate::strategy::{StrategyContext, StrategyTable};
use crate::sync::{NoopSync, SyncTask};
use crate::{ServiceWorkerError, WorkerEvent};

/// Events the platform delivers to the worker.
#[derive(Debug)]
pub enum PlatformEvent {
    Install,
    Activate,
    Fetch(Request),
    Push(Option<Bytes>),
    NotificationClick {
        notification: Notification,
        action: Option<String>,
    },
    Sync {
        tag: String,
    },
    PeriodicSync {
        tag: String,
    },
    Message {
        data: JsonValue,
        reply: Option<ReplyPort>,
    },
}

/// Kind of a platform event, used for handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
    Sync,
    PeriodicSync,
    Message,
}

impl PlatformEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlatformEvent::Install => EventKind::Install,
            PlatformEvent::Activate => EventKind::Activate,
            PlatformEvent::Fetch(_) => EventKind::Fetch,
            PlatformEvent::Push(_) => EventKind::Push,
            PlatformEvent::NotificationClick { .. } => EventKind::NotificationClick,
            PlatformEvent::Sync { .. } => EventKind::Sync,
            PlatformEvent::PeriodicSync { .. } => EventKind::PeriodicSync,
            PlatformEvent::Message { .. } => EventKind::Message,
        }
    }
}

/// Outcome of a dispatched event.
#[derive(Debug)]
pub enum EventReply {
    /// The handler ran.
    Done,
    /// No handler is registered for this kind of event.
    Ignored,
    /// Response for a fetch; `None` means the host should go to the network itself.
    Fetch(Option<Response>),
}

/// Offline request interception and caching worker.
pub struct OfflineWorker {
    pub(crate) config: Arc<OfflineConfig>,
    pub(crate) namespaces: CacheSet,
    pub(crate) storage: CacheStorage,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) strategies: StrategyTable,
    pub(crate) lifecycle: LifecycleManager,
    pub(crate) clients: Arc<RwLock<Clients>>,
    pub(crate) notifications: Arc<RwLock<Notifications>>,
    pub(crate) sync_task: Arc<dyn SyncTask>,
    pub(crate) handlers: HashSet<EventKind>,
}

impl fmt::Debug for OfflineWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineWorker")
            .field("namespaces", &self.namespaces)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl OfflineWorker {
    /// Create a worker and the channel its host listens on.
    pub fn new(
        config: OfflineConfig,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut handlers: HashSet<EventKind> = [
            EventKind::Install,
            EventKind::Activate,
            EventKind::Fetch,
            EventKind::NotificationClick,
            EventKind::Message,
        ]
        .into_iter()
        .collect();

        let caps = config.capabilities;
        for (available, kind) in [
            (caps.push, EventKind::Push),
            (caps.background_sync, EventKind::Sync),
            (caps.periodic_sync, EventKind::PeriodicSync),
        ] {
            if available {
                handlers.insert(kind);
            } else {
                debug!(?kind, "Capability unavailable, handler not registered");
            }
        }

        let worker = Self {
            namespaces: config.namespaces(),
            strategies: StrategyTable::from_config(&config),
            lifecycle: LifecycleManager::new(event_tx.clone()),
            clients: Arc::new(RwLock::new(Clients::new(event_tx.clone()))),
            notifications: Arc::new(RwLock::new(Notifications::new(event_tx))),
            sync_task: Arc::new(NoopSync),
            config: Arc::new(config),
            storage,
            fetcher,
            handlers,
        };
        info!(version = %worker.version(), "Offline worker created");

        (worker, event_rx)
    }

    /// Use `task` for recognized sync tags.
    pub fn with_sync_task(mut self, task: Arc<dyn SyncTask>) -> Self {
        self.sync_task = task;
        self
    }

    /// Replace the strategy table.
    pub fn with_strategies(mut self, strategies: StrategyTable) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    /// Primary cache namespace in effect.
    pub fn version(&self) -> &CacheNamespace {
        &self.namespaces.primary
    }

    pub fn namespaces(&self) -> &CacheSet {
        &self.namespaces
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn clients(&self) -> &Arc<RwLock<Clients>> {
        &self.clients
    }

    pub fn notifications(&self) -> &Arc<RwLock<Notifications>> {
        &self.notifications
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.state().await
    }

    /// Registered event kinds, in a stable order.
    pub fn registered_events(&self) -> Vec<EventKind> {
        let mut kinds: Vec<EventKind> = self.handlers.iter().copied().collect();
        kinds.sort();
        kinds
    }

    /// Route a platform event to its handler.
    ///
    /// The returned future completes when the handler does. Work the handler
    /// leaves running is registered on `lifetime`.
    pub async fn dispatch(
        &self,
        event: PlatformEvent,
        lifetime: &ExtendableEvent,
    ) -> Result<EventReply, ServiceWorkerError> {
        let kind = event.kind();
        if !self.handlers.contains(&kind) {
            trace!(?kind, "No handler registered, ignoring event");
            return Ok(EventReply::Ignored);
        }

        match event {
            PlatformEvent::Install => self.handle_install().await?,
            PlatformEvent::Activate => {
                self.handle_activate().await?;
            }
            PlatformEvent::Fetch(request) => {
                let response = self.handle_fetch(&request, lifetime).await?;
                return Ok(EventReply::Fetch(response));
            }
            PlatformEvent::Push(payload) => {
                self.handle_push(payload.as_deref()).await;
            }
            PlatformEvent::NotificationClick {
                notification,
                action,
            } => {
                self.handle_notification_click(&notification, action.as_deref())
                    .await
            }
            PlatformEvent::Sync { tag } => self.handle_sync(&tag).await,
            PlatformEvent::PeriodicSync { tag } => self.handle_periodic_sync(&tag).await,
            PlatformEvent::Message { data, reply } => self.handle_message(data, reply).await,
        }
        Ok(EventReply::Done)
    }

    /// Pre-cache the manifest.
    pub async fn handle_install(&self) -> Result<(), ServiceWorkerError> {
        self.lifecycle
            .install(
                &self.config,
                &self.namespaces,
                &self.storage,
                self.fetcher.as_ref(),
            )
            .await
    }

    /// Drop old namespaces and claim clients. Returns the deleted namespaces.
    pub async fn handle_activate(&self) -> Result<Vec<CacheNamespace>, ServiceWorkerError> {
        self.lifecycle
            .activate(&self.namespaces, &self.storage, &self.clients)
            .await
    }

    /// Answer an intercepted request.
    ///
    /// `Ok(None)` means the request is not intercepted.
    pub async fn handle_fetch(
        &self,
        request: &Request,
        lifetime: &ExtendableEvent,
    ) -> Result<Option<Response>, NetError> {
        let class = match classify::route(request) {
            Interception::Bypass => {
                trace!(method = %request.method, url = %request.url, "Request bypasses worker");
                return Ok(None);
            }
            Interception::Handle(class) => class,
        };

        let Some(route) = self.strategies.route(class) else {
            warn!(%class, "No strategy for resource class, bypassing");
            return Ok(None);
        };

        let cache = self
            .storage
            .cache(&route.namespace)
            .with_max_entries(route.max_entries);
        let ctx = StrategyContext {
            fetcher: Arc::clone(&self.fetcher),
            storage: self.storage.clone(),
            lifetime: lifetime.clone(),
        };

        debug!(url = %request.url, %class, strategy = route.strategy.name(), "Handling fetch");
        route.strategy.handle(&ctx, request, &cache).await.map(Some)
    }
}
