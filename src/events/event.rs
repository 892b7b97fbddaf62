//! Event definitions
//!
//! Topic names are stable strings so observers outside the crate (UI,
//! recorders, loggers) can subscribe without linking against device code.

use serde::Serialize;
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable topic names
pub mod topics {
    /// `{device_id, module_name}`
    pub const DEVICE_CREATED: &str = "device_created";
    /// `{device_id}`
    pub const DEVICE_REMOVED: &str = "device_removed";
    /// `{device_id, old_status, new_status}`
    pub const DEVICE_STATUS_CHANGED: &str = "device_status_changed";
    /// `{device_id, frame_ref, timestamp}`
    pub const FRAME_CAPTURED: &str = "frame_captured";
    /// `{device_id, result}`
    pub const PROCESSING_COMPLETE: &str = "processing_complete";
    /// `{device_id, error_msg}`
    pub const ERROR_OCCURRED: &str = "error_occurred";
}

/// An event travelling through the bus
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Topic the event was published on
    pub topic: String,
    /// Topic-specific body
    pub payload: Value,
    /// Publish time, milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Event {
    /// Create an event on an arbitrary topic
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            timestamp_ms: now_ms(),
        }
    }

    pub fn device_created(device_id: &str, module_name: &str) -> Self {
        Self::new(
            topics::DEVICE_CREATED,
            json!({ "device_id": device_id, "module_name": module_name }),
        )
    }

    pub fn device_removed(device_id: &str) -> Self {
        Self::new(topics::DEVICE_REMOVED, json!({ "device_id": device_id }))
    }

    pub fn device_status_changed(device_id: &str, old_status: &str, new_status: &str) -> Self {
        Self::new(
            topics::DEVICE_STATUS_CHANGED,
            json!({
                "device_id": device_id,
                "old_status": old_status,
                "new_status": new_status,
            }),
        )
    }

    pub fn frame_captured(device_id: &str, frame_ref: Value, timestamp_us: u64) -> Self {
        Self::new(
            topics::FRAME_CAPTURED,
            json!({
                "device_id": device_id,
                "frame_ref": frame_ref,
                "timestamp": timestamp_us,
            }),
        )
    }

    pub fn processing_complete(device_id: &str, result: Value) -> Self {
        Self::new(
            topics::PROCESSING_COMPLETE,
            json!({ "device_id": device_id, "result": result }),
        )
    }

    /// `device_id` is `None` when the failure is not tied to a device
    pub fn error_occurred(device_id: Option<&str>, error_msg: impl Into<String>) -> Self {
        Self::new(
            topics::ERROR_OCCURRED,
            json!({ "device_id": device_id, "error_msg": error_msg.into() }),
        )
    }

    /// Check the topic
    pub fn is_topic(&self, topic: &str) -> bool {
        self.topic == topic
    }

    /// Get device ID if the payload carries one
    pub fn device_id(&self) -> Option<&str> {
        self.payload.get("device_id").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_changed_shape() {
        let event = Event::device_status_changed("cam0", "ready", "running");
        assert!(event.is_topic(topics::DEVICE_STATUS_CHANGED));
        assert_eq!(event.device_id(), Some("cam0"));
        assert_eq!(event.payload["old_status"], "ready");
        assert_eq!(event.payload["new_status"], "running");
        assert!(event.timestamp_ms > 0);
    }

    #[test]
    fn test_device_id_extraction() {
        assert_eq!(
            Event::device_created("gpio0", "gpio").device_id(),
            Some("gpio0")
        );
        assert_eq!(Event::error_occurred(None, "boom").device_id(), None);
        assert_eq!(Event::new("custom", json!([1, 2])).device_id(), None);
    }

    #[test]
    fn test_frame_captured_shape() {
        let event = Event::frame_captured("cam0", json!({"sequence": 3}), 1_000);
        assert_eq!(event.payload["frame_ref"]["sequence"], 3);
        assert_eq!(event.payload["timestamp"], 1_000);
    }
}
