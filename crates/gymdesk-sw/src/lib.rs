//! # GymDesk Offline Worker
//!
//! Request interception and caching engine that sits between the GymDesk web
//! application and the network.
//!
//! ## Features
//!
//! - **Classification**: every GET request maps to exactly one resource class
//! - **Strategies**: Network-First for API and documents, Cache-First with
//!   background revalidation for images and static assets
//! - **Lifecycle**: install pre-warms caches, activate drops old versions
//! - **Notifications**: push rendering and click navigation
//! - **Background sync**: status relay to open pages
//! - **Messaging**: skip-waiting and version queries from pages
//!
//! ## Architecture
//!
//! ```text
//! PlatformEvent ──► OfflineWorker::dispatch
//!     │
//!     ├── Fetch ──► classify ──► StrategyTable ──► FetchStrategy ──► CacheStorage
//!     │                                               └── Fetcher (network)
//!     ├── Install / Activate ──► LifecycleManager ──► CacheStorage
//!     ├── Push / NotificationClick ──► Notifications, Clients
//!     ├── Sync / PeriodicSync ──► SyncTask, Clients
//!     └── Message ──► LifecycleManager, ReplyPort
//!
//! Host ◄── WorkerEvent (mpsc) ── state changes, window operations, messages
//! ```
//!
//! Work that must outlive a handler is registered on an [`ExtendableEvent`];
//! the host awaits [`ExtendableEvent::settled`] before letting the worker go.

use serde::Serialize;
use thiserror::Error;
use url::Url;

pub mod classify;
pub mod clients;
pub mod extendable;
pub mod lifecycle;
pub mod messenger;
pub mod notification;
pub mod strategy;
pub mod sync;
pub mod worker;

#[cfg(test)]
mod testing;

pub use classify::{classify, route, Interception};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use extendable::ExtendableEvent;
pub use lifecycle::{LifecycleManager, WorkerState};
pub use messenger::{ClientMessage, OutboundMessage, ReplyPort, SyncStatus};
pub use notification::{
    Notification, NotificationAction, NotificationData, NotificationId, Notifications,
    PushPayload,
};
pub use strategy::{CacheFirst, FetchStrategy, NetworkFirst, Route, StrategyContext, StrategyTable};
pub use sync::{NoopSync, SyncError, SyncTask};
pub use worker::{EventKind, EventReply, OfflineWorker, PlatformEvent};

use gymdesk_cache::CacheError;
use gymdesk_core::GymDeskError;
use gymdesk_net::NetError;
use http::StatusCode;

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("State error: {0}")]
    StateError(String),

    #[error("Precache of {url} failed with status {status}")]
    PrecacheFailed { url: Url, status: StatusCode },

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] GymDeskError),
}

// ==================== Events ====================

/// Events sent from the worker to its host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Lifecycle state changed.
    StateChange { from: WorkerState, to: WorkerState },
    /// The worker asks to be activated without waiting for old pages to close.
    SkipWaiting,
    /// The worker took control of these clients.
    ClientsClaimed { client_ids: Vec<String> },
    /// A window client should be focused.
    ClientFocused { client_id: String },
    /// A window client should navigate.
    ClientNavigated { client_id: String, url: Url },
    /// A new window should be opened.
    WindowOpened { client_id: String, url: Url },
    /// A message for a page.
    ClientMessage {
        client_id: String,
        message: OutboundMessage,
    },
    /// A notification should be displayed.
    NotificationShown(Notification),
    /// A notification should be dismissed.
    NotificationClosed { id: NotificationId },
}
