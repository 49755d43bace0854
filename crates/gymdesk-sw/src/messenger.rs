//! Two-way control channel between the worker and its pages.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::worker::OfflineWorker;

/// Commands a page can send to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Activate the waiting worker immediately.
    SkipWaiting,
    /// Reply with the primary cache namespace in effect.
    GetVersion,
}

/// Background sync progress reported to pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Started,
    Completed,
}

/// Messages the worker posts to pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    BackgroundSync { status: SyncStatus },
}

/// Reply channel attached to a page message.
#[derive(Debug)]
pub struct ReplyPort(oneshot::Sender<JsonValue>);

impl ReplyPort {
    /// Create a port and the receiving end the page keeps.
    pub fn channel() -> (Self, oneshot::Receiver<JsonValue>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Send the reply. Returns false if the page stopped listening.
    pub fn send(self, reply: JsonValue) -> bool {
        self.0.send(reply).is_ok()
    }
}

impl OfflineWorker {
    /// Handle a message from a page. Unrecognized shapes are ignored.
    pub async fn handle_message(&self, data: JsonValue, reply: Option<ReplyPort>) {
        let message = match serde_json::from_value::<ClientMessage>(data) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Ignoring unrecognized client message");
                return;
            }
        };

        match message {
            ClientMessage::SkipWaiting => {
                info!("Skip waiting requested by client");
                self.lifecycle.skip_waiting();
            }
            ClientMessage::GetVersion => {
                let Some(port) = reply else {
                    debug!("GET_VERSION without a reply port");
                    return;
                };
                let version = self.version().as_str();
                if !port.send(json!({ "version": version })) {
                    debug!("Client dropped reply port before GET_VERSION reply");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::worker_with;
    use crate::WorkerEvent;

    #[test]
    fn test_client_message_wire_format() {
        let skip: ClientMessage = serde_json::from_value(json!({"type": "SKIP_WAITING"})).unwrap();
        assert_eq!(skip, ClientMessage::SkipWaiting);
        let version: ClientMessage = serde_json::from_value(json!({"type": "GET_VERSION"})).unwrap();
        assert_eq!(version, ClientMessage::GetVersion);
        assert!(serde_json::from_value::<ClientMessage>(json!({"type": "RELOAD"})).is_err());
    }

    #[test]
    fn test_outbound_wire_format() {
        let message = OutboundMessage::BackgroundSync {
            status: SyncStatus::Completed,
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "BACKGROUND_SYNC", "payload": {"status": "completed"}})
        );
    }

    #[tokio::test]
    async fn test_get_version_replies_primary_namespace() {
        let (worker, _fetcher, _rx) = worker_with(Default::default());
        let (port, reply) = ReplyPort::channel();

        worker
            .handle_message(json!({"type": "GET_VERSION"}), Some(port))
            .await;

        let reply = reply.await.unwrap();
        assert_eq!(reply["version"], "gymdesk-v1");
        assert_eq!(reply["version"], worker.version().as_str());
    }

    #[tokio::test]
    async fn test_skip_waiting_notifies_host() {
        let (worker, _fetcher, mut rx) = worker_with(Default::default());

        worker.handle_message(json!({"type": "SKIP_WAITING"}), None).await;

        assert!(worker.lifecycle().skip_waiting_requested());
        assert_eq!(rx.try_recv().unwrap(), WorkerEvent::SkipWaiting);
    }

    #[tokio::test]
    async fn test_unrecognized_messages_are_ignored() {
        let (worker, _fetcher, mut rx) = worker_with(Default::default());
        let (port, reply) = ReplyPort::channel();

        worker.handle_message(json!("SKIP_WAITING"), None).await;
        worker.handle_message(json!({"kind": "GET_VERSION"}), Some(port)).await;

        assert!(rx.try_recv().is_err());
        // The port was dropped without a reply
        assert!(reply.await.is_err());
    }
}
