//! NotificationDispatcher - Per-Monitor Subscriber Fan-out
//!
//! ## Responsibilities
//!
//! - Subscriber registration per monitor (insertion ordered, no duplicates)
//! - Single dispatch loop draining the notification queue
//! - Best-effort delivery; dead subscribers are dropped
//!
//! Pipeline workers never touch subscriber channels. They publish through a
//! `Notifier`, and only the dispatch loop delivers.

use crate::models::{IncidentId, MonitorId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

/// Subscriber handle id
pub type SubscriberId = Uuid;

/// Recording state reported with CAMERA_STATUS_CHANGED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Record,
    Watching,
}

/// Outbound event, serialized as `{"event": ..., "payload": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationEvent {
    ObjectDetected {
        object_type: String,
        camera_id: MonitorId,
        incident_id: IncidentId,
        shooters: Vec<String>,
    },
    IncidentEnd {
        camera_id: MonitorId,
    },
    CameraStatusChanged {
        camera_id: MonitorId,
        camera_status: CameraStatus,
    },
}

impl NotificationEvent {
    pub fn gun_detected(camera_id: &str, incident_id: IncidentId, shooters: Vec<String>) -> Self {
        NotificationEvent::ObjectDetected {
            object_type: "gun".to_string(),
            camera_id: camera_id.to_string(),
            incident_id,
            shooters,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::ObjectDetected { .. } => "object_detected",
            NotificationEvent::IncidentEnd { .. } => "incident_end",
            NotificationEvent::CameraStatusChanged { .. } => "camera_status_changed",
        }
    }
}

/// Queued notification
#[derive(Debug, Clone)]
pub struct NotificationMessage {
    pub monitor_id: MonitorId,
    pub event: NotificationEvent,
}

/// Producer side of the dispatch queue
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<NotificationMessage>,
}

impl Notifier {
    pub fn publish(&self, monitor_id: &str, event: NotificationEvent) {
        let message = NotificationMessage {
            monitor_id: monitor_id.to_string(),
            event,
        };
        if self.tx.send(message).is_err() {
            tracing::warn!(monitor_id = %monitor_id, "Dispatcher stopped, notification dropped");
        }
    }
}

/// Create the dispatch queue
pub fn channel() -> (Notifier, mpsc::UnboundedReceiver<NotificationMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Notifier { tx }, rx)
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<String>,
}

/// Subscriber registry and delivery
pub struct NotificationDispatcher {
    subscribers: RwLock<HashMap<MonitorId, Vec<Subscriber>>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new subscriber for a monitor
    pub async fn register(&self, monitor_id: &str) -> (SubscriberId, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(monitor_id, id, tx).await;
        (id, rx)
    }

    /// Attach an existing handle. Returns false if it is already registered.
    pub async fn attach(&self, monitor_id: &str, id: SubscriberId, tx: mpsc::UnboundedSender<String>) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let list = subscribers.entry(monitor_id.to_string()).or_default();
        if list.iter().any(|s| s.id == id) {
            tracing::debug!(monitor_id = %monitor_id, subscriber_id = %id, "Subscriber already registered");
            return false;
        }
        list.push(Subscriber { id, tx });
        tracing::info!(monitor_id = %monitor_id, subscriber_id = %id, "Subscriber registered");
        true
    }

    pub async fn unregister(&self, monitor_id: &str, id: &SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let Some(list) = subscribers.get_mut(monitor_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| &s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(monitor_id);
        }
        if removed {
            tracing::info!(monitor_id = %monitor_id, subscriber_id = %id, "Subscriber unregistered");
        }
        removed
    }

    pub async fn subscriber_count(&self, monitor_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(monitor_id)
            .map_or(0, |l| l.len())
    }

    /// Deliver to every subscriber of a monitor; returns the delivered count
    pub async fn publish(&self, monitor_id: &str, event: &NotificationEvent) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize notification");
                return 0;
            }
        };

        let snapshot: Vec<Subscriber> = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(monitor_id) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };

        tracing::debug!(
            monitor_id = %monitor_id,
            event = event.kind(),
            subscriber_count = snapshot.len(),
            "Publishing notification"
        );

        let mut delivered = 0;
        let mut dead = Vec::new();
        for sub in &snapshot {
            match sub.tx.send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(subscriber_id = %sub.id, error = %e, "Failed to send notification");
                    dead.push(sub.id);
                }
            }
        }

        for id in dead {
            self.unregister(monitor_id, &id).await;
        }
        delivered
    }

    /// Spawn the dispatch loop
    ///
    /// Exits once `running` clears (checked every `poll_interval`) or every
    /// `Notifier` is dropped.
    pub fn spawn(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<NotificationMessage>,
        running: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Notification dispatcher started");
            while running.load(Ordering::SeqCst) {
                match timeout(poll_interval, rx.recv()).await {
                    Ok(Some(message)) => {
                        self.publish(&message.monitor_id, &message.event).await;
                    }
                    Ok(None) => break,
                    Err(_) => {}
                }
            }
            tracing::info!("Notification dispatcher stopped");
        })
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
