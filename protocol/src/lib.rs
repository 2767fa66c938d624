use thiserror::Error;

pub mod client;
pub mod rest;
pub mod server;
pub mod types;

pub use client::{ClientCommand, ClientMessage};
pub use server::{AckResponse, ServerMessage, TypingUpdate, parse_server_message};
pub use types::{
    ChatMessage, ChatType, MAX_MESSAGE_LEN, MessageId, Notification, ReplyPreview, RoomKey, UserId,
};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Empty message")]
    EmptyMessage,
}
