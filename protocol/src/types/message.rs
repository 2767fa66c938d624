use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{MessageId, UserId};

/// Maximum body length accepted for an outgoing message, in characters
pub const MAX_MESSAGE_LEN: usize = 1000;

/// A chat message, as pushed over the socket or listed by the REST API.
///
/// Event chats and club chats use different field names on the wire
/// (`id`/`message`/`timestamp` vs `message_id`/`message_text`/`sent_at`);
/// both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned id; absent for messages the server has not confirmed
    #[serde(default, alias = "message_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,

    #[serde(default)]
    pub sender_id: Option<UserId>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub sender_name: String,

    #[serde(alias = "message_text")]
    pub message: String,

    #[serde(alias = "created_at", alias = "sent_at", with = "super::timestamp")]
    pub timestamp: DateTime<Utc>,

    #[serde(default, alias = "reply_to", skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<ReplyPreview>,
}

/// Context for the message being replied to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
    #[serde(default)]
    pub id: Option<MessageId>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sender_name: String,
    #[serde(default)]
    pub message: String,
}

impl ChatMessage {
    /// Whether two representations describe the same message.
    ///
    /// Ids decide when both sides carry one. Without ids on either side, a
    /// known sender and the exact timestamp must match. A message with an id
    /// is never the same as one without.
    pub fn is_same_as(&self, other: &ChatMessage) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => {
                self.sender_id.is_some()
                    && self.sender_id == other.sender_id
                    && self.timestamp == other.timestamp
            }
            _ => false,
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(id: Option<u64>, sender: u64, ts: &str) -> ChatMessage {
        serde_json::from_value(json!({
            "id": id,
            "sender_id": sender,
            "sender_name": "Ada",
            "message": "hi",
            "timestamp": ts,
        }))
        .unwrap()
    }

    #[test]
    fn test_deserialize_event_message() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "id": 17,
            "event_id": 42,
            "sender_id": 5,
            "sender_name": "Grace Hopper",
            "message": "Doors open at 9",
            "chat_type": "organizer_admin",
            "timestamp": "2024-05-01T09:00:00.000123",
            "reply_to_id": 12,
            "reply_to_message": { "id": 12, "sender_name": "Ada", "message": "When?" }
        }))
        .unwrap();

        assert_eq!(msg.id, Some(17));
        assert_eq!(msg.sender_id, Some(5));
        assert_eq!(msg.message, "Doors open at 9");
        assert_eq!(msg.reply_to_id, Some(12));
        assert_eq!(msg.reply_to_message.unwrap().sender_name, "Ada");
    }

    #[test]
    fn test_deserialize_club_message() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "message_id": 3,
            "sender_id": null,
            "sender_name": null,
            "message_text": "Welcome!",
            "sent_at": "2024-05-01T09:00:00",
            "is_leader": true
        }))
        .unwrap();

        assert_eq!(msg.id, Some(3));
        assert_eq!(msg.sender_id, None);
        assert_eq!(msg.sender_name, "");
        assert_eq!(msg.message, "Welcome!");
    }

    #[test]
    fn test_same_by_id() {
        let a = message(Some(1), 5, "2024-05-01T09:00:00");
        let b = message(Some(1), 6, "2024-05-01T10:00:00");
        let c = message(Some(2), 5, "2024-05-01T09:00:00");

        assert!(a.is_same_as(&b));
        assert!(!a.is_same_as(&c));
    }

    #[test]
    fn test_same_by_sender_and_timestamp() {
        let a = message(None, 5, "2024-05-01T09:00:00");
        let b = message(None, 5, "2024-05-01T09:00:00");
        let c = message(None, 6, "2024-05-01T09:00:00");
        let d = message(None, 5, "2024-05-01T09:00:01");

        assert!(a.is_same_as(&b));
        assert!(!a.is_same_as(&c));
        assert!(!a.is_same_as(&d));
    }

    #[test]
    fn test_mixed_ids_are_distinct() {
        let confirmed = message(Some(7), 5, "2024-05-01T09:00:00");
        let unconfirmed = message(None, 5, "2024-05-01T09:00:00");

        assert!(!confirmed.is_same_as(&unconfirmed));
        assert!(!unconfirmed.is_same_as(&confirmed));
    }

    #[test]
    fn test_unknown_senders_never_match() {
        let anonymous = |ts: &str| -> ChatMessage {
            serde_json::from_value(json!({
                "sender_id": null,
                "message_text": "hi",
                "sent_at": ts,
            }))
            .unwrap()
        };

        let a = anonymous("2024-05-01T09:00:00");
        let b = anonymous("2024-05-01T09:00:00");
        assert!(!a.is_same_as(&b));
    }
}
