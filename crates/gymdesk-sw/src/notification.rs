//! Push notifications and notification clicks.

use std::sync::atomic::{AtomicU64, Ordering};

use gymdesk_core::NotificationDefaults;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clients::{ClientMatchOptions, ClientType};
use crate::worker::OfflineWorker;
use crate::WorkerEvent;

/// Action that dismisses a notification without navigating.
pub const CLOSE_ACTION: &str = "close";
/// Action that opens the notification's target.
pub const OPEN_ACTION: &str = "open";

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(u64);

impl NotificationId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields a push message may carry. Anything missing takes its default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub url: Option<String>,
}

impl PushPayload {
    /// Parse a raw push message.
    ///
    /// A JSON object supplies fields; a field that is not a string counts as
    /// missing. Anything else that is not empty becomes the body as text,
    /// with every other field left to default.
    pub fn parse(raw: Option<&[u8]>) -> Self {
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            return Self::default();
        };

        let parsed = serde_json::from_slice::<JsonValue>(raw).ok();

        match parsed.as_ref().and_then(JsonValue::as_object) {
            Some(fields) => {
                let field = |key: &str| {
                    fields
                        .get(key)
                        .and_then(JsonValue::as_str)
                        .map(str::to_owned)
                };
                Self {
                    title: field("title"),
                    body: field("body"),
                    icon: field("icon"),
                    badge: field("badge"),
                    url: field("url"),
                }
            }
            None => {
                debug!("Push payload is not a JSON object, using it as text");
                Self {
                    body: Some(String::from_utf8_lossy(raw).into_owned()),
                    ..Self::default()
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Data attached to a notification for the click handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
}

/// A notification ready to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
    pub data: NotificationData,
}

impl Notification {
    /// Merge a payload over the defaults. Empty fields count as missing.
    pub fn render(payload: PushPayload, defaults: &NotificationDefaults) -> Self {
        let pick = |value: Option<String>, default: &str| {
            value
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            id: NotificationId::new(),
            title: pick(payload.title, &defaults.title),
            body: pick(payload.body, &defaults.body),
            icon: pick(payload.icon, &defaults.icon),
            badge: pick(payload.badge, &defaults.badge),
            vibrate: defaults.vibrate.clone(),
            actions: vec![
                NotificationAction {
                    action: OPEN_ACTION.to_string(),
                    title: "Open".to_string(),
                },
                NotificationAction {
                    action: CLOSE_ACTION.to_string(),
                    title: "Close".to_string(),
                },
            ],
            data: NotificationData {
                url: pick(payload.url, &defaults.url),
            },
        }
    }
}

/// Notifications currently on screen.
#[derive(Debug)]
pub struct Notifications {
    shown: HashMap<NotificationId, Notification>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl Notifications {
    pub fn new(event_tx: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            shown: HashMap::new(),
            event_tx,
        }
    }

    pub fn show(&mut self, notification: Notification) -> NotificationId {
        let id = notification.id;
        let _ = self
            .event_tx
            .send(WorkerEvent::NotificationShown(notification.clone()));
        self.shown.insert(id, notification);
        id
    }

    /// Dismiss a notification. Returns whether it was being tracked.
    pub fn close(&mut self, id: NotificationId) -> bool {
        let _ = self.event_tx.send(WorkerEvent::NotificationClosed { id });
        self.shown.remove(&id).is_some()
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.get(&id)
    }

    pub fn len(&self) -> usize {
        self.shown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}

impl OfflineWorker {
    /// Render and show a notification for a push message. Never drops one.
    pub async fn handle_push(&self, payload: Option<&[u8]>) -> NotificationId {
        let payload = PushPayload::parse(payload);
        let notification = Notification::render(payload, &self.config.notifications);
        info!(title = %notification.title, url = %notification.data.url, "Showing push notification");
        self.notifications.write().await.show(notification)
    }

    /// Close the notification, then bring the app to its target unless
    /// the close action was chosen.
    pub async fn handle_notification_click(&self, notification: &Notification, action: Option<&str>) {
        self.notifications.write().await.close(notification.id);

        if action == Some(CLOSE_ACTION) {
            debug!(id = notification.id.raw(), "Notification dismissed");
            return;
        }

        let origin = &self.config.origin;
        let target = origin.join(&notification.data.url).unwrap_or_else(|e| {
            warn!(url = %notification.data.url, error = %e, "Bad notification target, using origin");
            origin.clone()
        });

        let mut clients = self.clients.write().await;
        let options = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };
        let existing = clients
            .match_all(&options)
            .into_iter()
            .find(|c| c.same_origin(origin))
            .map(|c| c.id.clone());

        match existing {
            Some(id) => {
                if let Err(e) = clients.focus(&id) {
                    warn!(client_id = %id, error = %e, "Focus failed");
                }
                if let Err(e) = clients.navigate(&id, target.clone()) {
                    warn!(client_id = %id, url = %target, error = %e, "In-place navigation failed");
                }
            }
            None => {
                let client = clients.open_window(target);
                info!(client_id = %client.id, url = %client.url, "Opened window for notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::Client;
    use crate::testing::worker_with;
    use url::Url;

    fn defaults() -> NotificationDefaults {
        NotificationDefaults::default()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_malformed_payload_becomes_body() {
        let raw = br#"{"body": "not-json"#;
        let notification = Notification::render(PushPayload::parse(Some(&raw[..])), &defaults());

        assert_eq!(notification.body, r#"{"body": "not-json"#);
        assert_eq!(notification.title, "GymDesk");
        assert_eq!(notification.icon, "/logo.png");
        assert_eq!(notification.badge, "/logo.png");
        assert_eq!(notification.data.url, "/");
    }

    #[test]
    fn test_missing_payload_uses_defaults() {
        for raw in [None, Some(&b""[..])] {
            let notification = Notification::render(PushPayload::parse(raw), &defaults());
            assert_eq!(notification.title, "GymDesk");
            assert_eq!(notification.body, "You have a new notification");
            assert_eq!(notification.vibrate, vec![100, 50, 100]);
        }
    }

    #[test]
    fn test_payload_fields_override_defaults() {
        let raw = br#"{"title": "Payment due", "body": "Renew today", "url": "/payments", "extra": 1}"#;
        let notification = Notification::render(PushPayload::parse(Some(&raw[..])), &defaults());

        assert_eq!(notification.title, "Payment due");
        assert_eq!(notification.body, "Renew today");
        assert_eq!(notification.icon, "/logo.png");
        assert_eq!(notification.data.url, "/payments");
    }

    #[test]
    fn test_wrong_typed_field_falls_back_alone() {
        let raw = br#"{"title": 5, "body": "Class at 6pm", "url": "/classes", "icon": null}"#;
        let notification = Notification::render(PushPayload::parse(Some(&raw[..])), &defaults());

        assert_eq!(notification.title, "GymDesk");
        assert_eq!(notification.body, "Class at 6pm");
        assert_eq!(notification.icon, "/logo.png");
        assert_eq!(notification.data.url, "/classes");
    }

    #[test]
    fn test_empty_fields_fall_back() {
        let raw = br#"{"title": "", "body": "Hi"}"#;
        let notification = Notification::render(PushPayload::parse(Some(&raw[..])), &defaults());
        assert_eq!(notification.title, "GymDesk");
        assert_eq!(notification.body, "Hi");
    }

    #[test]
    fn test_non_object_json_is_text() {
        let payload = PushPayload::parse(Some(&b"\"class starts soon\""[..]));
        assert_eq!(payload.body.as_deref(), Some("\"class starts soon\""));
        assert_eq!(payload.title, None);
    }

    #[test]
    fn test_actions_always_present() {
        let notification = Notification::render(PushPayload::default(), &defaults());
        let actions: Vec<&str> = notification.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec![OPEN_ACTION, CLOSE_ACTION]);
    }

    #[test]
    fn test_registry_tracks_shown() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut notifications = Notifications::new(tx);
        let id = notifications.show(Notification::render(PushPayload::default(), &defaults()));

        assert_eq!(notifications.len(), 1);
        assert!(notifications.get(id).is_some());
        assert!(notifications.close(id));
        assert!(!notifications.close(id));
        assert!(notifications.is_empty());

        assert!(matches!(rx.try_recv().unwrap(), WorkerEvent::NotificationShown(_)));
        assert_eq!(rx.try_recv().unwrap(), WorkerEvent::NotificationClosed { id });
    }

    #[tokio::test]
    async fn test_push_always_shows() {
        let (worker, _fetcher, mut rx) = worker_with(Default::default());

        let id = worker.handle_push(Some(&b"\xff\xfe not utf8"[..])).await;

        assert!(worker.notifications().read().await.get(id).is_some());
        match rx.try_recv().unwrap() {
            WorkerEvent::NotificationShown(n) => {
                assert_eq!(n.id, id);
                assert!(n.body.contains("not utf8"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_click_close_action_does_nothing_else() {
        let (worker, _fetcher, mut rx) = worker_with(Default::default());
        let id = worker.handle_push(None).await;
        let notification = worker.notifications().read().await.get(id).cloned().unwrap();
        drain(&mut rx);

        worker
            .handle_notification_click(&notification, Some(CLOSE_ACTION))
            .await;

        assert_eq!(drain(&mut rx), vec![WorkerEvent::NotificationClosed { id }]);
        assert!(worker.notifications().read().await.is_empty());
    }

    #[tokio::test]
    async fn test_click_focuses_and_navigates_existing_client() {
        let (worker, _fetcher, mut rx) = worker_with(Default::default());
        {
            let mut clients = worker.clients().write().await;
            clients.add(Client::window("page", Url::parse("http://localhost:3000/home").unwrap()));
            clients.add(Client::window("other", Url::parse("https://elsewhere.example/").unwrap()));
            clients.claim();
        }
        let id = worker
            .handle_push(Some(&br#"{"url": "/members/9"}"#[..]))
            .await;
        let notification = worker.notifications().read().await.get(id).cloned().unwrap();
        drain(&mut rx);

        worker.handle_notification_click(&notification, None).await;

        let target = Url::parse("http://localhost:3000/members/9").unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![
                WorkerEvent::NotificationClosed { id },
                WorkerEvent::ClientFocused {
                    client_id: "page".to_string()
                },
                WorkerEvent::ClientNavigated {
                    client_id: "page".to_string(),
                    url: target.clone()
                },
            ]
        );
        assert_eq!(worker.clients().read().await.get("page").unwrap().url, target);
    }

    #[tokio::test]
    async fn test_click_on_uncontrolled_client_still_focuses() {
        let (worker, _fetcher, mut rx) = worker_with(Default::default());
        worker
            .clients()
            .write()
            .await
            .add(Client::window("page", Url::parse("http://localhost:3000/").unwrap()));
        let notification = Notification::render(PushPayload::default(), &defaults());

        worker.handle_notification_click(&notification, Some(OPEN_ACTION)).await;

        let events = drain(&mut rx);
        assert!(events.contains(&WorkerEvent::ClientFocused {
            client_id: "page".to_string()
        }));
        assert!(!events.iter().any(|e| matches!(e, WorkerEvent::WindowOpened { .. })));
    }

    #[tokio::test]
    async fn test_click_without_client_opens_window() {
        let (worker, _fetcher, mut rx) = worker_with(Default::default());
        let payload = PushPayload {
            url: Some("/classes?day=mon".to_string()),
            ..Default::default()
        };
        let notification = Notification::render(payload, &defaults());

        worker.handle_notification_click(&notification, None).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[1] {
            WorkerEvent::WindowOpened { url, .. } => {
                assert_eq!(url.as_str(), "http://localhost:3000/classes?day=mon");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
