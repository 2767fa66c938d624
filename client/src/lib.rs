//! Async client for Rally event chats and notifications.
//!
//! A [`ChatConnection`] owns one authenticated socket bound to a single chat
//! room: it joins the room, merges live pushes and REST history pages into one
//! ordered, deduplicated list, sends messages with acknowledgment timeouts and
//! manages typing signals. A [`NotificationStream`] keeps the user's
//! notifications and unread counter current. Both reconnect on their own and
//! publish status and events that a [`Handler`] can consume.
//!
//! ```ignore
//! use rally_client::{ChatConnection, ClientConfig, RoomKey, Session};
//!
//! let config = ClientConfig::from_env();
//! let session = Session::new(token);
//! let chat = ChatConnection::connect(&config, &session, Some(RoomKey::event(42, "organizer_admin")))?;
//!
//! let mut events = chat.events();
//! tokio::spawn(async move { events.run(&mut my_handler).await });
//!
//! chat.send_message("hello", None).await?;
//! ```

mod api;
mod config;
mod connection;
mod error;
mod handle;
mod handler;
mod notifications;
mod receiver;
mod registry;
mod room;
mod state;
mod transport;

#[cfg(test)]
mod tests;

pub use rally_protocol::{ChatMessage, ChatType, MessageId, Notification, RoomKey, UserId};
pub use rally_protocol::rest::NotificationPage;

pub use api::{ChatApi, NotificationApi, RestClient};
pub use config::{ClientConfig, DEFAULT_API_URL, ReconnectPolicy, Session};
pub use connection::{ConnectionState, ConnectionStatus};
pub use error::{ChatError, Result};
pub use handle::ChatConnection;
pub use handler::Handler;
pub use notifications::NotificationStream;
pub use receiver::{ChatEvent, Dispatch, EventReceiver, NotificationEvent};
pub use registry::{ConnectionManager, SharedRoom};
pub use room::HistoryLoad;
pub use transport::{Connector, Transport, WsConnector, WsTransport};
