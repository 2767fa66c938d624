//! RoomState - everything the client knows about the active chat room

use rally_protocol::{RoomKey, ServerMessage, UserId};

use crate::messages::MessageStore;
use crate::typing::TypingUsers;

/// Whether the server has been asked to put us in the room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    None,
    /// Join sent; servers are not required to acknowledge it
    Requested,
    /// Join acknowledged
    Confirmed,
}

/// State of the single room a chat connection is attached to.
///
/// Switching rooms is destructive: messages, typing users and pagination are
/// dropped, and the generation counter moves on so that results of work
/// started for the old room can be recognised and discarded.
#[derive(Debug, Clone)]
pub struct RoomState {
    key: Option<RoomKey>,
    generation: u64,
    membership: Membership,

    /// Sorted, deduplicated history
    pub messages: MessageStore,

    /// Other users typing in this room
    pub typing: TypingUsers,

    /// A history page request is in flight
    pub history_loading: bool,

    /// Last history load failure, cleared by the next successful load
    pub history_error: Option<String>,
}

impl RoomState {
    pub fn new(own_id: Option<UserId>) -> Self {
        Self::with_page_size(own_id, crate::DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(own_id: Option<UserId>, page_size: u32) -> Self {
        Self {
            key: None,
            generation: 0,
            membership: Membership::None,
            messages: MessageStore::with_page_size(page_size),
            typing: TypingUsers::new(own_id),
            history_loading: false,
            history_error: None,
        }
    }

    pub fn key(&self) -> Option<&RoomKey> {
        self.key.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn membership(&self) -> Membership {
        self.membership
    }

    pub fn set_membership(&mut self, membership: Membership) {
        self.membership = membership;
    }

    /// Joined or join requested
    pub fn is_joined(&self) -> bool {
        self.membership != Membership::None
    }

    /// Attach to a new room, discarding everything about the previous one.
    ///
    /// Returns the previous key.
    pub fn switch_to(&mut self, key: RoomKey) -> Option<RoomKey> {
        let previous = self.key.replace(key);
        self.discard();
        previous
    }

    /// Detach from any room
    pub fn reset(&mut self) -> Option<RoomKey> {
        let previous = self.key.take();
        self.discard();
        previous
    }

    fn discard(&mut self) {
        self.generation += 1;
        self.membership = Membership::None;
        self.messages.clear();
        self.typing.clear();
        self.history_loading = false;
        self.history_error = None;
    }

    /// Update room state from a server message.
    ///
    /// Returns whether anything observable changed.
    pub fn update(&mut self, msg: &ServerMessage) -> bool {
        match msg {
            ServerMessage::Authenticated {
                user_id: Some(user_id),
            } => {
                self.typing.set_own_id(*user_id);
                false
            }

            ServerMessage::NewMessage(message) => {
                self.key.is_some() && self.messages.merge(message.clone())
            }

            ServerMessage::ChatHistory(messages) => {
                self.key.is_some() && self.messages.merge_all(messages.iter().cloned()) > 0
            }

            ServerMessage::TypingUpdate(update) => self.key.is_some() && self.typing.apply(update),

            ServerMessage::JoinedRoom { room } => {
                if self.membership == Membership::Requested && self.names_this_room(room) {
                    self.membership = Membership::Confirmed;
                    true
                } else {
                    false
                }
            }

            ServerMessage::LeftRoom { room } => {
                if self.is_joined() && self.names_this_room(room) {
                    self.membership = Membership::None;
                    self.typing.clear();
                    true
                } else {
                    false
                }
            }

            _ => false,
        }
    }

    /// Acks that don't name a room are assumed to be about ours
    fn names_this_room(&self, room: &Option<String>) -> bool {
        match (room, &self.key) {
            (Some(name), Some(key)) => *name == key.room_name(),
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }
}
