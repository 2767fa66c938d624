use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to client users.
///
/// Lifecycle failures (`Auth`, `Connection`, `Server`) are published through
/// connection status and events; the rest come back from the call that
/// caused them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Missing, invalid or expired token
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transport failure or drop
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("No acknowledgment from server within {0:?}")]
    SendTimeout(Duration),

    #[error("Message rejected: {0}")]
    SendRejected(String),

    /// Local precondition failure; nothing was sent
    #[error("Not connected to a chat room")]
    NotConnected,

    #[error("Failed to load history: {0}")]
    HistoryLoad(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// REST failure outside history loading
    #[error("Request failed: {0}")]
    Request(String),

    /// `error` event pushed by the server mid-session
    #[error("Server error: {0}")]
    Server(String),

    /// The connection was closed by its owner
    #[error("Connection closed")]
    Closed,
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

impl ChatError {
    pub(crate) fn request(err: &anyhow::Error) -> Self {
        ChatError::Request(format!("{:#}", err))
    }
}
