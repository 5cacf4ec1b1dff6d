//! Core data types for the message store
//!
//! `Message` is the unit that is accepted, persisted, replayed as backlog
//! and fanned out to every connection. It is also the wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender name used for messages generated by the server itself
pub const SERVER_SENDER: &str = "server";

/// A single accepted message
///
/// Serialized as `{"id", "type", "content", "sender", "timestamp"}` with the
/// timestamp in RFC 3339.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Identity assigned at acceptance, used to dedup backlog against live traffic
    pub id: Uuid,
    /// Free-text kind such as "chat" or "system"
    #[serde(rename = "type")]
    pub kind: String,
    /// Message body
    pub content: String,
    /// Display name of whoever sent it
    pub sender: String,
    /// Server-side acceptance time
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with a fresh id and the current time
    pub fn new(
        kind: impl Into<String>,
        content: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self::with_timestamp(kind, content, sender, Utc::now())
    }

    /// Create a message with an explicit timestamp
    pub fn with_timestamp(
        kind: impl Into<String>,
        content: impl Into<String>,
        sender: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            content: content.into(),
            sender: sender.into(),
            timestamp,
        }
    }

    /// A server-originated notice, never persisted
    pub fn notice(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(kind, content, SERVER_SENDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape_uses_type_field() {
        let msg = Message::new("chat", "hello", "alice");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "chat");
        assert_eq!(json["content"], "hello");
        assert_eq!(json["sender"], "alice");
        assert!(json.get("kind").is_none());
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_notice_comes_from_server() {
        let msg = Message::notice("error", "bad input");
        assert_eq!(msg.sender, SERVER_SENDER);
        assert_eq!(msg.kind, "error");
    }

    #[test]
    fn test_fresh_ids_differ() {
        let a = Message::new("chat", "x", "a");
        let b = Message::new("chat", "x", "a");
        assert_ne!(a.id, b.id);
    }
}
