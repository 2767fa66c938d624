//! Client-side state tracking for Rally chat rooms and notifications.
//!
//! Nothing in this crate performs I/O. The async client feeds parsed
//! [`ServerMessage`](rally_protocol::ServerMessage)s and REST results in, and
//! reads sorted, deduplicated views back out.
//!
//! ```text
//! rally-protocol (wire format)
//!        │
//!        ▼
//! rally-state (room + notification state) ← THIS CRATE
//!        │
//!        ▼
//! rally-client (sockets, timers, REST)
//! ```
//!
//! # Main Types
//!
//! - [`MessageStore`] - ordered, deduplicated chat history of one room
//! - [`TypingUsers`] - who is typing in the room, never including ourselves
//! - [`RoomState`] - the above plus membership and history-load bookkeeping
//! - [`NotificationStore`] - notifications and the unread counter
//!
//! # Example Usage
//!
//! ```ignore
//! use rally_state::RoomState;
//! use rally_protocol::RoomKey;
//!
//! let mut room = RoomState::new(Some(5));
//! room.switch_to(RoomKey::event(42, "organizer_admin"));
//!
//! // Process server messages
//! room.update(&message);
//!
//! for msg in room.messages.messages() {
//!     println!("{}: {}", msg.sender_name, msg.message);
//! }
//! ```

pub mod messages;
pub mod notifications;
pub mod room;
pub mod typing;

pub use messages::{DEFAULT_PAGE_SIZE, MessageStore};
pub use notifications::NotificationStore;
pub use room::{Membership, RoomState};
pub use typing::TypingUsers;
