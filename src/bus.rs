//! Notification bus for pipeline events.
//!
//! The core broadcasts lifecycle events (job created, progress,
//! completed, failed, stage transitions) through the [`NotificationBus`]
//! trait. Publishing is fire-and-forget: the core never blocks on
//! subscriber delivery, and a bus with no subscribers is not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Event type names emitted by the orchestration core.
pub mod event {
    pub const JOB_CREATED: &str = "job:created";
    pub const JOB_STARTED: &str = "job:started";
    pub const JOB_PROGRESS: &str = "job:progress";
    pub const JOB_COMPLETED: &str = "job:completed";
    pub const JOB_FAILED: &str = "job:failed";
    pub const STAGE_COMPLETED: &str = "pipeline:stage-completed";
    pub const STAGE_FAILED: &str = "pipeline:stage-failed";
}

/// A published event with its JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type name (see [`event`]).
    pub event_type: String,
    /// Structured payload.
    pub payload: serde_json::Value,
}

impl Event {
    /// Creates a new event.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Fire-and-forget broadcast channel consumed by the service layer.
pub trait NotificationBus: Send + Sync {
    /// Publishes an event. Must not block on subscriber delivery.
    fn publish(&self, event_type: &str, payload: serde_json::Value);
}

/// Bus backed by a `tokio::sync::broadcast` channel.
///
/// Slow subscribers lag and drop events rather than backpressuring the
/// core.
pub struct BroadcastBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastBus {
    /// Creates a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationBus for BroadcastBus {
    fn publish(&self, event_type: &str, payload: serde_json::Value) {
        // Send fails only when there are no subscribers.
        let _ = self.sender.send(Event::new(event_type, payload));
    }
}

/// Bus that discards all events. Useful in tests and embedded setups.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBus;

impl NotificationBus for NullBus {
    fn publish(&self, event_type: &str, _payload: serde_json::Value) {
        debug!(event_type, "Discarding event (null bus)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_bus_delivers_to_subscriber() {
        let bus = BroadcastBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(event::JOB_CREATED, json!({"job_id": "abc"}));

        let received = rx.recv().await.expect("should receive event");
        assert_eq!(received.event_type, event::JOB_CREATED);
        assert_eq!(received.payload["job_id"], "abc");
    }

    #[test]
    fn test_broadcast_bus_no_subscribers_is_ok() {
        let bus = BroadcastBus::new(8);
        // Must not panic or block.
        bus.publish(event::JOB_FAILED, json!({}));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_null_bus_discards() {
        let bus = NullBus;
        bus.publish(event::JOB_PROGRESS, json!({"progress": 50}));
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new(event::STAGE_COMPLETED, json!({"subject_id": "s1"}));
        let serialized = serde_json::to_string(&event).expect("serialization should work");
        let parsed: Event = serde_json::from_str(&serialized).expect("should parse back");
        assert_eq!(parsed, event);
    }
}
