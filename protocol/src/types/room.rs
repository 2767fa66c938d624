//! Room addressing: which scope (event or club) and which sub-channel

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

/// Sub-channel of an event chat
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatType {
    OrganizerAdmin,
    OrganizerVolunteer,
    AttendeeOnly,
    Other(String),
}

impl ChatType {
    /// Parse from protocol string ("organizer_admin", "organizer_volunteer", "attendee_only")
    pub fn from_protocol(s: &str) -> Self {
        match s {
            "organizer_admin" => ChatType::OrganizerAdmin,
            "organizer_volunteer" => ChatType::OrganizerVolunteer,
            "attendee_only" => ChatType::AttendeeOnly,
            other => ChatType::Other(other.to_string()),
        }
    }

    /// Convert to protocol format
    pub fn as_str(&self) -> &str {
        match self {
            ChatType::OrganizerAdmin => "organizer_admin",
            ChatType::OrganizerVolunteer => "organizer_volunteer",
            ChatType::AttendeeOnly => "attendee_only",
            ChatType::Other(s) => s,
        }
    }
}

impl From<&str> for ChatType {
    fn from(s: &str) -> Self {
        Self::from_protocol(s)
    }
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for ChatType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChatType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_protocol(&s))
    }
}

/// Identifies a chat room on the server.
///
/// Event chats are split by [`ChatType`]; club chats have a single room per club.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Event { event_id: u64, chat_type: ChatType },
    Club { club_id: u64 },
}

impl RoomKey {
    pub fn event(event_id: u64, chat_type: impl Into<ChatType>) -> Self {
        RoomKey::Event {
            event_id,
            chat_type: chat_type.into(),
        }
    }

    pub fn club(club_id: u64) -> Self {
        RoomKey::Club { club_id }
    }

    /// The entity id the room is attached to
    pub fn scope_id(&self) -> u64 {
        match self {
            RoomKey::Event { event_id, .. } => *event_id,
            RoomKey::Club { club_id } => *club_id,
        }
    }

    /// The sub-channel, if the scope has more than one
    pub fn channel(&self) -> Option<&ChatType> {
        match self {
            RoomKey::Event { chat_type, .. } => Some(chat_type),
            RoomKey::Club { .. } => None,
        }
    }

    /// Server-side room name, e.g. `event_42_organizer_admin` or `club_7`
    pub fn room_name(&self) -> String {
        match self {
            RoomKey::Event {
                event_id,
                chat_type,
            } => format!("event_{}_{}", event_id, chat_type),
            RoomKey::Club { club_id } => format!("club_{}", club_id),
        }
    }

    /// The fields that address this room in a socket payload
    pub fn scope_fields(&self) -> Map<String, Value> {
        let value = match self {
            RoomKey::Event {
                event_id,
                chat_type,
            } => json!({ "event_id": event_id, "chat_type": chat_type.as_str() }),
            RoomKey::Club { club_id } => json!({ "club_id": club_id }),
        };

        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

impl std::fmt::Display for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.room_name())
    }
}
