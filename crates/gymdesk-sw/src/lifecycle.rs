//! Worker lifecycle: install pre-warms the caches, activate drops old versions.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::try_join_all;
use gymdesk_cache::CacheStorage;
use gymdesk_core::{CacheNamespace, CacheRole, CacheSet, OfflineConfig};
use gymdesk_net::{Fetcher, Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};

use crate::clients::Clients;
use crate::{ServiceWorkerError, WorkerEvent};

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Initial state, nothing run yet.
    #[default]
    Parsed,
    /// Install event in progress.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activate event in progress.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed; this version will never serve.
    Redundant,
}

impl WorkerState {
    /// Whether `self -> to` is allowed. Re-entering an in-progress state is,
    /// so an interrupted install or activate can run again.
    pub fn can_transition(self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Parsed, Installing)
                | (Installing, Installing)
                | (Installing, Installed)
                | (Installed, Activating)
                | (Activating, Activating)
                | (Activating, Activated)
        ) || (to == Redundant && self != Redundant)
    }
}

/// Drives install and activate and tracks the resulting state.
#[derive(Debug)]
pub struct LifecycleManager {
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl LifecycleManager {
    pub fn new(event_tx: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            event_tx,
        }
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Move to `to`, emitting a state-change event.
    pub async fn transition(&self, to: WorkerState) -> Result<(), ServiceWorkerError> {
        let mut state = self.state.write().await;
        let from = *state;
        if !from.can_transition(to) {
            return Err(ServiceWorkerError::StateError(format!(
                "invalid transition {:?} -> {:?}",
                from, to
            )));
        }
        *state = to;
        drop(state);

        info!(?from, ?to, "Worker state changed");
        let _ = self.event_tx.send(WorkerEvent::StateChange { from, to });
        Ok(())
    }

    /// Ask the host to activate this version without waiting for old pages to close.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
        let _ = self.event_tx.send(WorkerEvent::SkipWaiting);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Pre-cache the application shell and static assets.
    ///
    /// Every manifest entry is fetched before anything is written, and each
    /// namespace is written in one transaction. Any fetch failure or non-ok
    /// status fails the install and makes the worker redundant.
    pub async fn install(
        &self,
        config: &OfflineConfig,
        namespaces: &CacheSet,
        storage: &CacheStorage,
        fetcher: &dyn Fetcher,
    ) -> Result<(), ServiceWorkerError> {
        self.transition(WorkerState::Installing).await?;

        match precache(config, namespaces, storage, fetcher).await {
            Ok(count) => {
                info!(entries = count, "Pre-cache complete");
                self.transition(WorkerState::Installed).await?;
                self.skip_waiting();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                self.transition(WorkerState::Redundant).await?;
                Err(e)
            }
        }
    }

    /// Delete every namespace outside the current set, then claim all clients.
    ///
    /// Returns the deleted namespaces. A failed activation leaves the worker
    /// in `Activating` so it can be retried.
    pub async fn activate(
        &self,
        namespaces: &CacheSet,
        storage: &CacheStorage,
        clients: &RwLock<Clients>,
    ) -> Result<Vec<CacheNamespace>, ServiceWorkerError> {
        self.transition(WorkerState::Activating).await?;

        let mut deleted = Vec::new();
        for namespace in storage.list_namespaces().await? {
            if namespaces.contains(&namespace) {
                continue;
            }
            if storage.delete(&namespace).await? {
                debug!(namespace = %namespace, "Old cache namespace deleted");
                deleted.push(namespace);
            }
        }
        for namespace in namespaces.allow_list() {
            storage.open(&namespace).await?;
        }

        let claimed = clients.write().await.claim();
        info!(deleted = deleted.len(), claimed = claimed.len(), "Activation cleanup done");

        self.transition(WorkerState::Activated).await?;
        Ok(deleted)
    }
}

async fn fetch_manifest(
    config: &OfflineConfig,
    paths: &[String],
    fetcher: &dyn Fetcher,
) -> Result<Vec<(Request, Response)>, ServiceWorkerError> {
    let requests = paths
        .iter()
        .map(|path| config.resolve(path).map(Request::get))
        .collect::<Result<Vec<_>, _>>()?;

    try_join_all(requests.into_iter().map(|request| async move {
        let response = fetcher.fetch(&request).await?;
        if !response.ok() {
            return Err(ServiceWorkerError::PrecacheFailed {
                url: request.url,
                status: response.status,
            });
        }
        Ok((request, response))
    }))
    .await
}

async fn precache(
    config: &OfflineConfig,
    namespaces: &CacheSet,
    storage: &CacheStorage,
    fetcher: &dyn Fetcher,
) -> Result<usize, ServiceWorkerError> {
    let plan = [
        (CacheRole::Primary, &config.precache.shell),
        (CacheRole::Static, &config.precache.static_assets),
    ];

    let mut batches = Vec::with_capacity(plan.len());
    for (role, paths) in plan {
        let entries = fetch_manifest(config, paths, fetcher).await?;
        batches.push((namespaces.get(role), entries));
    }

    let mut count = 0;
    for (namespace, entries) in batches {
        storage.put_all(namespace, &entries).await?;
        debug!(namespace = %namespace, entries = entries.len(), "Namespace pre-cached");
        count += entries.len();
    }
    Ok(count)
}
