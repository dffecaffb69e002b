//! Event notification - best-effort, in-process fan-out keyed by user.
//!
//! Delivery failures never affect task execution; a subscriber whose channel
//! is gone gets pruned on the next publish to its key.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub user_id: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: &str, user_id: &str, data: Value) -> Self {
        Event {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            user_id: user_id.to_string(),
            data,
            created_at: Utc::now(),
        }
    }
}

/// Subscription handle; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

pub struct EventBroadcaster {
    subscribers: DashMap<String, Vec<(u64, mpsc::UnboundedSender<Event>)>>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        EventBroadcaster {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, user_id: &str) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(user_id.to_string())
            .or_default()
            .push((id, tx));
        (SubscriptionId(id), rx)
    }

    pub fn unsubscribe(&self, user_id: &str, subscription: SubscriptionId) {
        if let Some(mut entry) = self.subscribers.get_mut(user_id) {
            entry.retain(|(id, _)| *id != subscription.0);
        }
    }

    /// Deliver to every live subscriber for the event's user, dropping any
    /// whose receiver has gone away.
    pub fn publish(&self, event: Event) {
        let Some(mut entry) = self.subscribers.get_mut(&event.user_id) else {
            log::debug!(
                "[EVENTS] No subscribers for user {} ({})",
                event.user_id,
                event.event_type
            );
            return;
        };

        entry.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        log::debug!(
            "[EVENTS] Published {} to {} subscriber(s) for user {}",
            event.event_type,
            entry.len(),
            event.user_id
        );
    }

    pub fn publish_new(&self, event_type: &str, user_id: &str, data: Value) {
        self.publish(Event::new(event_type, user_id, data));
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_only_that_user() {
        let broadcaster = EventBroadcaster::new();
        let (_sub_a, mut rx_a) = broadcaster.subscribe("alice");
        let (_sub_b, mut rx_b) = broadcaster.subscribe("bob");

        broadcaster.publish_new("task_created", "alice", json!({"task_id": "t1"}));

        let event = rx_a.recv().await.unwrap();
        assert_eq!(event.event_type, "task_created");
        assert_eq!(event.data["task_id"], "t1");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broadcaster = EventBroadcaster::new();
        let (sub, mut rx) = broadcaster.subscribe("alice");
        broadcaster.unsubscribe("alice", sub);

        broadcaster.publish_new("status_changed", "alice", json!({}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_receiver_is_pruned() {
        let broadcaster = EventBroadcaster::new();
        let (_sub, rx) = broadcaster.subscribe("alice");
        drop(rx);

        // does not error, and the dead sender is removed
        broadcaster.publish_new("task_completed", "alice", json!({}));
        assert!(broadcaster.subscribers.get("alice").unwrap().is_empty());
    }
}
