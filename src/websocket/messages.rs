//! WebSocket Message Types
//!
//! Outbound frames are serialized [`Message`]s. Inbound frames use the same
//! shape, but every field is optional at parse time so that a missing field
//! is reported as such instead of as a generic JSON error. Any `id` or
//! `timestamp` the client sends is ignored.

use serde::Deserialize;

use crate::storage::Message;

/// Kind used for error notices sent back to a client
pub const ERROR_KIND: &str = "error";

/// Messages sent from client to server
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientMessage {
    /// Message kind, e.g. "chat"
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Message body
    #[serde(default)]
    pub content: Option<String>,
    /// Display name of the author
    #[serde(default)]
    pub sender: Option<String>,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Build the notice sent to a client whose message was rejected
pub fn error_notice(reason: impl std::fmt::Display) -> Message {
    Message::notice(ERROR_KIND, reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_deserialize() {
        let json = r#"{"type": "chat", "content": "hello", "sender": "alice"}"#;
        let msg = ClientMessage::parse(json).unwrap();
        assert_eq!(msg.kind.as_deref(), Some("chat"));
        assert_eq!(msg.content.as_deref(), Some("hello"));
        assert_eq!(msg.sender.as_deref(), Some("alice"));
    }

    #[test]
    fn test_client_timestamp_and_id_are_ignored() {
        let json = r#"{"type": "chat", "content": "x", "sender": "a",
                       "timestamp": "1999-01-01T00:00:00Z", "id": "not-a-uuid"}"#;
        assert!(ClientMessage::parse(json).is_ok());
    }

    #[test]
    fn test_missing_fields_parse_as_none() {
        let msg = ClientMessage::parse(r#"{"type": "chat"}"#).unwrap();
        assert!(msg.content.is_none());
        assert!(msg.sender.is_none());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(ClientMessage::parse("not json").is_err());
        assert!(ClientMessage::parse(r#"{"type": 5}"#).is_err());
    }

    #[test]
    fn test_error_notice_serialize() {
        let notice = error_notice("Content is required");
        let json = serde_json::to_string(&notice).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"sender\":\"server\""));
        assert!(json.contains("\"content\":\"Content is required\""));
    }
}
