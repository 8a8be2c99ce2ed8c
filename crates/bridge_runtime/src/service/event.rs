//! Bus Events
//!
//! Events carry bridge activity (objects created, values changed, failed
//! points and polls) to observers subscribed through the manager.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::ServiceError;

/// Event types published by the bridge
pub mod topics {
    /// A protocol object was created for a point seen for the first time
    pub const OBJECT_CREATED: &str = "object/created";
    /// A protocol object's present value changed
    pub const OBJECT_CHANGED: &str = "object/changed";
    /// A single point failed translation or synchronization
    pub const POINT_FAILED: &str = "point/failed";
    /// The telemetry source could not be polled
    pub const POLL_FAILED: &str = "poll/failed";
}

// ─────────────────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type, one of [`topics`] for bridge-originated events
    pub event_type: String,

    /// Service that produced the event
    pub source: String,

    pub data: serde_json::Value,

    /// Unix milliseconds at creation
    pub timestamp: u64,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            data,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Publisher
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle onto the event bus
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<Event>,
}

impl EventPublisher {
    pub fn new(tx: broadcast::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Fails with `ChannelClosed` when nobody is subscribed
    pub fn publish(&self, event: Event) -> Result<(), ServiceError> {
        self.tx
            .send(event)
            .map(|_| ())
            .map_err(|_| ServiceError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload() {
        let event = Event::new(
            topics::OBJECT_CHANGED,
            "bridge/telemetry",
            serde_json::json!({"object": "Temp", "value": 22.0}),
        );

        assert_eq!(event.source, "bridge/telemetry");
        assert_eq!(event.get_str("object"), Some("Temp"));
        assert_eq!(event.get_str("value"), None);
        assert!(event.timestamp > 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let (tx, mut rx) = broadcast::channel(8);
        let publisher = EventPublisher::new(tx);

        publisher
            .publish(Event::new(topics::POLL_FAILED, "svc", serde_json::json!({})))
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, topics::POLL_FAILED);
    }

    #[test]
    fn test_publish_without_subscribers_is_closed() {
        let (tx, rx) = broadcast::channel(8);
        drop(rx);
        let publisher = EventPublisher::new(tx);

        let result = publisher.publish(Event::new(topics::POLL_FAILED, "svc", serde_json::Value::Null));
        assert!(matches!(result, Err(ServiceError::ChannelClosed)));
    }
}
