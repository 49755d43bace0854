//! Background and periodic sync relay.
//!
//! The worker only reports progress to open pages. The reconciliation work
//! itself is supplied by the application as a [`SyncTask`].

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::messenger::{OutboundMessage, SyncStatus};
use crate::worker::OfflineWorker;

/// Errors reported by a sync task.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync failed: {0}")]
    Failed(String),
}

/// Work performed when a recognized sync tag fires.
#[async_trait]
pub trait SyncTask: Send + Sync {
    async fn run(&self, tag: &str) -> Result<(), SyncError>;
}

/// Sync task that has nothing to reconcile.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSync;

#[async_trait]
impl SyncTask for NoopSync {
    async fn run(&self, tag: &str) -> Result<(), SyncError> {
        debug!(tag, "No sync work configured");
        Ok(())
    }
}

impl OfflineWorker {
    /// One-shot background sync.
    pub async fn handle_sync(&self, tag: &str) {
        if tag != self.config.sync.tag {
            debug!(tag, "Ignoring unknown sync tag");
            return;
        }
        self.relay_sync(tag).await;
    }

    /// Periodic background sync.
    pub async fn handle_periodic_sync(&self, tag: &str) {
        if tag != self.config.sync.periodic_tag {
            debug!(tag, "Ignoring unknown periodic sync tag");
            return;
        }
        self.relay_sync(tag).await;
    }

    /// Announce, run, announce. A failed task is logged and swallowed:
    /// no completion message and no retry.
    async fn relay_sync(&self, tag: &str) {
        self.broadcast_sync(SyncStatus::Started).await;

        match self.sync_task.run(tag).await {
            Ok(()) => {
                info!(tag, "Background sync completed");
                self.broadcast_sync(SyncStatus::Completed).await;
            }
            Err(e) => {
                warn!(tag, error = %e, "Background sync failed");
            }
        }
    }

    async fn broadcast_sync(&self, status: SyncStatus) {
        let message = OutboundMessage::BackgroundSync { status };
        let recipients = self.clients.read().await.broadcast(&message);
        debug!(?status, recipients, "Sync status sent to clients");
    }
}
