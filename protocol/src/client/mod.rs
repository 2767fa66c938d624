use serde_json::{Map, Value, json};

use crate::types::{ChatType, MessageId, RoomKey};

/// Commands that clients can send to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// authenticate {token}
    Authenticate { token: String },

    /// join_event_chat {event_id, chat_type} / join_club_room {club_id}
    JoinRoom(RoomKey),

    /// leave_event_chat {event_id, chat_type} / leave_club_room {club_id}
    LeaveRoom(RoomKey),

    /// send_event_message / send_club_message, acknowledged by the server
    SendMessage {
        room: RoomKey,
        message: String,
        reply_to: Option<MessageId>,
    },

    /// typing_event / club_typing {is_typing}
    Typing { room: RoomKey, is_typing: bool },

    /// request_unread_count
    RequestUnreadCount,

    /// Raw event for catch-all
    Raw { event: String, data: Value },
}

impl ClientCommand {
    /// Event name on the wire
    pub fn event_name(&self) -> &str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::JoinRoom(RoomKey::Event { .. }) => "join_event_chat",
            Self::JoinRoom(RoomKey::Club { .. }) => "join_club_room",
            Self::LeaveRoom(RoomKey::Event { .. }) => "leave_event_chat",
            Self::LeaveRoom(RoomKey::Club { .. }) => "leave_club_room",
            Self::SendMessage {
                room: RoomKey::Event { .. },
                ..
            } => "send_event_message",
            Self::SendMessage {
                room: RoomKey::Club { .. },
                ..
            } => "send_club_message",
            Self::Typing {
                room: RoomKey::Event { .. },
                ..
            } => "typing_event",
            Self::Typing {
                room: RoomKey::Club { .. },
                ..
            } => "club_typing",
            Self::RequestUnreadCount => "request_unread_count",
            Self::Raw { event, .. } => event,
        }
    }

    /// Event payload
    pub fn payload(&self) -> Value {
        match self {
            Self::Authenticate { token } => json!({ "token": token }),
            Self::JoinRoom(room) | Self::LeaveRoom(room) => Value::Object(room.scope_fields()),
            Self::SendMessage {
                room,
                message,
                reply_to,
            } => {
                let mut fields = room.scope_fields();
                fields.insert("message".to_string(), json!(message));
                if let Some(reply_to) = reply_to {
                    fields.insert("reply_to".to_string(), json!(reply_to));
                }
                Value::Object(fields)
            }
            Self::Typing { room, is_typing } => {
                let mut fields = room.scope_fields();
                fields.insert("is_typing".to_string(), json!(is_typing));
                Value::Object(fields)
            }
            Self::RequestUnreadCount => Value::Object(Map::new()),
            Self::Raw { data, .. } => data.clone(),
        }
    }

    /// Convenience for the most common event room
    pub fn join_event_chat(event_id: u64, chat_type: impl Into<ChatType>) -> Self {
        Self::JoinRoom(RoomKey::event(event_id, chat_type))
    }
}

/// Client message with an optional acknowledgment id
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessage {
    pub ack: Option<u64>,
    pub command: ClientCommand,
}

impl ClientMessage {
    pub fn new(command: ClientCommand) -> Self {
        Self { ack: None, command }
    }

    /// A message the server is expected to answer with `{"ack": id, ...}`
    pub fn with_ack(command: ClientCommand, ack: u64) -> Self {
        Self {
            ack: Some(ack),
            command,
        }
    }

    /// Serialize to wire format: {"event": NAME, "data": {...}, "ack": ID}
    pub fn to_wire_format(&self) -> String {
        let mut frame = Map::new();
        frame.insert("event".to_string(), json!(self.command.event_name()));
        frame.insert("data".to_string(), self.command.payload());
        if let Some(ack) = self.ack {
            frame.insert("ack".to_string(), json!(ack));
        }
        Value::Object(frame).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(msg: &ClientMessage) -> Value {
        serde_json::from_str(&msg.to_wire_format()).unwrap()
    }

    #[test]
    fn test_authenticate_wire_format() {
        let msg = ClientMessage::new(ClientCommand::Authenticate {
            token: "abc".to_string(),
        });

        assert_eq!(
            wire(&msg),
            json!({ "event": "authenticate", "data": { "token": "abc" } })
        );
    }

    #[test]
    fn test_join_event_and_club_rooms() {
        let event = ClientMessage::new(ClientCommand::join_event_chat(42, "organizer_admin"));
        assert_eq!(
            wire(&event),
            json!({
                "event": "join_event_chat",
                "data": { "event_id": 42, "chat_type": "organizer_admin" }
            })
        );

        let club = ClientMessage::new(ClientCommand::LeaveRoom(RoomKey::club(7)));
        assert_eq!(
            wire(&club),
            json!({ "event": "leave_club_room", "data": { "club_id": 7 } })
        );
    }

    #[test]
    fn test_send_message_carries_ack() {
        let msg = ClientMessage::with_ack(
            ClientCommand::SendMessage {
                room: RoomKey::event(42, "attendee_only"),
                message: "hello".to_string(),
                reply_to: Some(3),
            },
            11,
        );

        assert_eq!(
            wire(&msg),
            json!({
                "event": "send_event_message",
                "data": {
                    "event_id": 42,
                    "chat_type": "attendee_only",
                    "message": "hello",
                    "reply_to": 3
                },
                "ack": 11
            })
        );
    }

    #[test]
    fn test_send_message_without_reply() {
        let msg = ClientMessage::new(ClientCommand::SendMessage {
            room: RoomKey::club(1),
            message: "hey".to_string(),
            reply_to: None,
        });
        let value = wire(&msg);

        assert_eq!(value["event"], "send_club_message");
        assert!(value["data"].get("reply_to").is_none());
        assert!(value.get("ack").is_none());
    }

    #[test]
    fn test_typing() {
        let msg = ClientMessage::new(ClientCommand::Typing {
            room: RoomKey::event(1, "organizer_volunteer"),
            is_typing: true,
        });
        let value = wire(&msg);

        assert_eq!(value["event"], "typing_event");
        assert_eq!(value["data"]["is_typing"], true);
    }
}
