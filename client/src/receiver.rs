use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rally_protocol::{ChatMessage, Notification, RoomKey, UserId};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::connection::ConnectionStatus;
use crate::error::ChatError;
use crate::handler::Handler;

/// Events published by a chat connection
#[derive(Debug, Clone)]
pub enum ChatEvent {
    StatusChanged(ConnectionStatus),
    Authenticated { user_id: Option<UserId> },
    Error(ChatError),
    RoomJoined(RoomKey),
    RoomLeft(RoomKey),
    MessageReceived { room: RoomKey, message: ChatMessage },
    HistoryLoaded { room: RoomKey, page: u32, added: usize },
    TypingChanged { room: RoomKey, users: Vec<UserId> },
}

/// Events published by a notification stream
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    StatusChanged(ConnectionStatus),
    Authenticated { user_id: Option<UserId> },
    Error(ChatError),
    NotificationReceived(Notification),
    UnreadCountChanged(u64),
    ClubNotification(Value),
    Refreshed,
}

/// Event types a [`Handler`] can be driven with
pub trait Dispatch: Clone + Send + 'static {
    fn dispatch<H: Handler>(self, handler: &mut H) -> impl Future<Output = ()> + Send;
}

impl Dispatch for ChatEvent {
    async fn dispatch<H: Handler>(self, handler: &mut H) {
        match self {
            ChatEvent::StatusChanged(status) => handler.on_status(&status).await,
            ChatEvent::Authenticated { user_id } => handler.on_authenticated(user_id).await,
            ChatEvent::Error(error) => handler.on_error(&error).await,
            ChatEvent::RoomJoined(room) => handler.on_room_joined(&room).await,
            ChatEvent::RoomLeft(room) => handler.on_room_left(&room).await,
            ChatEvent::MessageReceived { room, message } => {
                handler.on_message(&room, &message).await
            }
            ChatEvent::HistoryLoaded { room, page, added } => {
                handler.on_history_loaded(&room, page, added).await
            }
            ChatEvent::TypingChanged { room, users } => handler.on_typing(&room, &users).await,
        }
    }
}

impl Dispatch for NotificationEvent {
    async fn dispatch<H: Handler>(self, handler: &mut H) {
        match self {
            NotificationEvent::StatusChanged(status) => handler.on_status(&status).await,
            NotificationEvent::Authenticated { user_id } => {
                handler.on_authenticated(user_id).await
            }
            NotificationEvent::Error(error) => handler.on_error(&error).await,
            NotificationEvent::NotificationReceived(notification) => {
                handler.on_notification(&notification).await
            }
            NotificationEvent::UnreadCountChanged(count) => handler.on_unread_count(count).await,
            NotificationEvent::ClubNotification(payload) => {
                handler.on_club_notification(&payload).await
            }
            NotificationEvent::Refreshed => handler.on_notifications_refreshed().await,
        }
    }
}

/// Receives events from a connection and dispatches them to a handler.
///
/// The subscription ends when its connection is closed: no handler method is
/// called once `close` has returned.
pub struct EventReceiver<E> {
    incoming: broadcast::Receiver<E>,
    closed: Arc<AtomicBool>,
}

impl<E: Dispatch> EventReceiver<E> {
    pub(crate) fn new(incoming: broadcast::Receiver<E>, closed: Arc<AtomicBool>) -> Self {
        Self { incoming, closed }
    }

    /// Run the event loop, dispatching events to the handler.
    ///
    /// This will run until the connection is closed.
    pub async fn run<H: Handler>(&mut self, handler: &mut H) {
        while let Some(event) = self.next().await {
            event.dispatch(handler).await;
        }
    }

    /// Next event, or `None` once the connection is closed
    pub async fn next(&mut self) -> Option<E> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            match self.incoming.recv().await {
                Ok(event) if !self.closed.load(Ordering::Acquire) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event receiver lagged, events dropped");
                }
            }
        }
    }
}
