//! Status events for the UI: queue depth, deliveries, drains, catalog syncs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::connectivity::NetworkState;
use crate::model::PendingId;

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEventKind {
    ConnectivityChanged { state: NetworkState },
    #[serde(rename_all = "camelCase")]
    SubmissionDelivered { submission_ref: String },
    #[serde(rename_all = "camelCase")]
    SubmissionQueued { id: PendingId, reason: String },
    PendingCountChanged { pending: u64 },
    RejectedCountChanged { rejected: u64 },
    DrainFinished { drained: usize, rejected: usize, remaining: u64 },
    CatalogRefreshed { entries: usize },
    CatalogRefreshFailed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SyncEventKind,
}

impl SyncEvent {
    pub fn new(kind: SyncEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Broadcasts [`SyncEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct SyncEventBroadcaster {
    sender: Arc<broadcast::Sender<SyncEvent>>,
}

impl SyncEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, kind: SyncEventKind) {
        // No active receivers is fine.
        let _ = self.sender.send(SyncEvent::new(kind));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for SyncEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_receive() {
        let broadcaster = SyncEventBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(SyncEventKind::PendingCountChanged { pending: 3 });

        let received = rx.try_recv().unwrap();
        assert_eq!(
            received.kind,
            SyncEventKind::PendingCountChanged { pending: 3 }
        );
    }

    #[test]
    fn test_send_without_subscribers() {
        SyncEventBroadcaster::default().send(SyncEventKind::CatalogRefreshed { entries: 0 });
    }

    #[test]
    fn test_serialized_shape() {
        let event = SyncEvent::new(SyncEventKind::SubmissionQueued {
            id: 4,
            reason: "offline".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "submissionQueued");
        assert_eq!(json["id"], 4);
        assert!(json.get("timestamp").is_some());
    }
}
