//! Event bus for inter-component communication
//!
//! Uses tokio::sync::broadcast for pub/sub pattern.
//! The hub publishes entry and entity events; MQTT and the SSE endpoint consume them.
//! Control commands flow the other way, from MQTT to the hub.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::media_player::EntitySnapshot;

/// Event types that can be published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    // Entry lifecycle
    EntryLoaded {
        entry_id: String,
        title: String,
    },
    EntrySetupRetry {
        entry_id: String,
        error: String,
        retry_in_secs: u64,
    },
    EntrySetupError {
        entry_id: String,
        error: String,
    },
    EntryUnloaded {
        entry_id: String,
    },
    EntryRemoved {
        entry_id: String,
    },

    // Entity state, published when a poll or command changes it
    EntityUpdated {
        entry_id: String,
        name: String,
        snapshot: EntitySnapshot,
    },

    // A discovered box waiting for confirmation
    FlowDiscovered {
        flow_id: String,
        name: String,
        host: Option<String>,
    },

    // Control commands (for MQTT/external integration)
    ControlCommand {
        entry_id: String,
        action: String,
        value: Option<serde_json::Value>,
    },

    ShuttingDown {
        reason: Option<String>,
    },
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BusEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    /// Default capacity (256 events)
    fn default() -> Self {
        Self::new(256)
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pubsub() {
        let bus = create_bus();
        let mut rx = bus.subscribe();

        bus.publish(BusEvent::EntryLoaded {
            entry_id: "abc".to_string(),
            title: "Living room".to_string(),
        });

        let event = rx.recv().await.unwrap();
        match event {
            BusEvent::EntryLoaded { title, .. } => {
                assert_eq!(title, "Living room");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = create_bus();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(BusEvent::ShuttingDown { reason: None });

        assert!(matches!(rx1.recv().await.unwrap(), BusEvent::ShuttingDown { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), BusEvent::ShuttingDown { .. }));
    }

    #[test]
    fn test_event_serializes_tagged() {
        let event = BusEvent::ControlCommand {
            entry_id: "abc".to_string(),
            action: "media_stop".to_string(),
            value: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ControlCommand");
        assert_eq!(json["payload"]["entry_id"], "abc");
    }
}
