//! Payload types shared by the socket and the REST API

mod message;
mod notification;
mod room;
pub mod timestamp;

pub use message::{ChatMessage, MAX_MESSAGE_LEN, ReplyPreview};
pub use notification::Notification;
pub use room::{ChatType, RoomKey};

pub type UserId = u64;
pub type MessageId = u64;
