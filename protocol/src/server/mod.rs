mod chat;
mod notification;

use crate::ParseError;
use crate::types::{ChatMessage, Notification, UserId};
use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Greeting sent right after the transport connects
    Connected,
    Authenticated {
        user_id: Option<UserId>,
    },
    AuthError {
        message: String,
    },
    /// Join acknowledgment; servers may or may not send it
    JoinedRoom {
        room: Option<String>,
    },
    LeftRoom {
        room: Option<String>,
    },
    NewMessage(ChatMessage),
    ChatHistory(Vec<ChatMessage>),
    TypingUpdate(TypingUpdate),
    Error {
        message: String,
    },
    NewNotification(Notification),
    UnreadCountUpdate {
        count: u64,
    },
    ClubNotification(Value),
    /// Reply to an outbound message sent with an ack id
    Ack {
        id: u64,
        response: AckResponse,
    },
    Raw(String),
}

/// Who is typing in a room
#[derive(Debug, Clone, PartialEq)]
pub enum TypingUpdate {
    /// Authoritative list of everyone currently typing
    Users(Vec<UserId>),
    /// A single user started or stopped typing
    User { user_id: UserId, is_typing: bool },
    /// Nobody is typing anymore
    Cleared,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AckResponse {
    Accepted(Value),
    Rejected(String),
}

impl AckResponse {
    /// Ack payloads carrying an `error` field are rejections
    pub fn from_payload(data: Value) -> Self {
        match data.get("error") {
            Some(Value::String(message)) => AckResponse::Rejected(message.clone()),
            Some(Value::Null) | None => AckResponse::Accepted(data),
            Some(other) => AckResponse::Rejected(other.to_string()),
        }
    }

    /// The confirmed message, when the server echoes it back in the ack
    pub fn message(&self) -> Option<ChatMessage> {
        match self {
            AckResponse::Accepted(data) => serde_json::from_value(data.clone()).ok(),
            AckResponse::Rejected(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    ack: Option<u64>,
}

/// Parse a complete WebSocket text frame into a structured message
pub fn parse_server_message(frame: &str) -> Result<ServerMessage> {
    let frame = frame.trim();

    if frame.is_empty() {
        return Err(ParseError::EmptyMessage.into());
    }

    let envelope: Envelope = serde_json::from_str(frame)
        .map_err(|e| ParseError::InvalidFormat(format!("frame is not an event envelope: {}", e)))?;

    if let Some(id) = envelope.ack {
        return Ok(ServerMessage::Ack {
            id,
            response: AckResponse::from_payload(envelope.data),
        });
    }

    let event = envelope
        .event
        .ok_or_else(|| ParseError::MissingField("event".to_string()))?;
    let data = envelope.data;

    match event.as_str() {
        "connected" => Ok(ServerMessage::Connected),
        "authenticated" => Ok(parse_authenticated(&data)),
        "auth_error" => Ok(ServerMessage::AuthError {
            message: message_field(&data, "Authentication failed"),
        }),
        "error" => Ok(ServerMessage::Error {
            message: message_field(&data, "Unknown error"),
        }),
        "joined_chat" | "joined_club_room" | "joined_room" => Ok(ServerMessage::JoinedRoom {
            room: room_field(&data),
        }),
        "left_club_room" | "left_chat" | "left_room" => Ok(ServerMessage::LeftRoom {
            room: room_field(&data),
        }),
        "new_message" | "new_event_message" | "new_club_message" | "newMessage" => {
            chat::parse_new_message(data)
        }
        "chat_history" => chat::parse_history(data),
        "typing_update" | "user_typing_event" | "userTyping" => chat::parse_typing(&data),
        "new_notification" => notification::parse_new_notification(data),
        "unread_count_update" => notification::parse_unread_count(&data),
        "club_notification" => Ok(ServerMessage::ClubNotification(data)),
        _ => Ok(ServerMessage::Raw(frame.to_string())),
    }
}

fn parse_authenticated(data: &Value) -> ServerMessage {
    // {"success": false} is how some server versions report a bad token
    if data.get("success").and_then(Value::as_bool) == Some(false) {
        return ServerMessage::AuthError {
            message: message_field(data, "Authentication failed"),
        };
    }

    ServerMessage::Authenticated {
        user_id: data.get("user_id").and_then(parse_user_id),
    }
}

/// Read `{"message": ...}`, or the payload itself when it is a bare string
fn message_field(data: &Value, fallback: &str) -> String {
    match data {
        Value::String(s) => s.clone(),
        _ => data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string(),
    }
}

fn room_field(data: &Value) -> Option<String> {
    data.get("room").and_then(Value::as_str).map(str::to_string)
}

/// User ids arrive as numbers, occasionally as numeric strings
pub(crate) fn parse_user_id(value: &Value) -> Option<UserId> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
