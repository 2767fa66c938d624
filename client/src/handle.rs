use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rally_protocol::{ChatMessage, MAX_MESSAGE_LEN, MessageId, RoomKey, UserId};
use rally_state::RoomState;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::api::{ChatApi, RestClient};
use crate::config::{ClientConfig, Session};
use crate::connection::{ConnectionStatus, Link};
use crate::error::{ChatError, Result};
use crate::receiver::{ChatEvent, EventReceiver};
use crate::room::{ChatWorker, Command, HistoryLoad, Reply};
use crate::state::Shared;
use crate::transport::{Connector, WsConnector};

/// Handle to one authenticated chat connection bound to a room.
///
/// Opening spawns a worker task that owns the socket. The handle reads room
/// state directly and sends everything else to the worker. Dropping the handle
/// closes the connection; [`close`](Self::close) does so and waits for it.
pub struct ChatConnection {
    commands: mpsc::UnboundedSender<Command>,
    room: Arc<Shared<RoomState>>,
    status: watch::Receiver<ConnectionStatus>,
    events: Shared<Option<broadcast::Sender<ChatEvent>>>,
    closed: Arc<AtomicBool>,
    api: Arc<dyn ChatApi>,
    send_timeout: Duration,
}

impl ChatConnection {
    /// Open over WebSocket, with history served by the REST API
    pub fn connect(config: &ClientConfig, session: &Session, room: Option<RoomKey>) -> Result<Self> {
        require_token(session)?;
        let api = RestClient::new(config, session).map_err(|e| ChatError::request(&e))?;
        Self::open(config, session, room, Arc::new(WsConnector), Arc::new(api))
    }

    /// Open with explicit transport and REST implementations.
    ///
    /// Fails with [`ChatError::Auth`] without touching the network when the
    /// session has no token. Must be called within a Tokio runtime.
    pub fn open(
        config: &ClientConfig,
        session: &Session,
        room: Option<RoomKey>,
        connector: Arc<dyn Connector>,
        api: Arc<dyn ChatApi>,
    ) -> Result<Self> {
        require_token(session)?;

        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let mut state = RoomState::with_page_size(session.user_id(), config.history_page_size);
        if let Some(room) = room {
            state.switch_to(room);
        }
        let room = Arc::new(Shared::new(state));

        let link = Link::new(
            "chat",
            config.socket_url.clone(),
            session.token().to_string(),
            config.reconnect.clone(),
            config.connect_timeout,
            connector,
            status_tx,
        );
        let worker = ChatWorker::new(
            link,
            commands_rx,
            Arc::clone(&room),
            Arc::clone(&api),
            events.clone(),
            config.typing_timeout,
        );
        tokio::spawn(worker.run());

        Ok(Self {
            commands,
            room,
            status,
            events: Shared::new(Some(events)),
            closed: Arc::new(AtomicBool::new(false)),
            api,
            send_timeout: config.send_timeout,
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Watch connection status changes
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Subscribe to events from this connection
    pub fn events(&self) -> EventReceiver<ChatEvent> {
        let incoming = match self.events.read().as_ref() {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).0.subscribe(),
        };
        EventReceiver::new(incoming, Arc::clone(&self.closed))
    }

    pub fn room(&self) -> Option<RoomKey> {
        self.room.read().key().cloned()
    }

    /// Joined, or join sent and not yet refused
    pub fn is_joined(&self) -> bool {
        self.room.read().is_joined()
    }

    /// Snapshot of the room's history, oldest first
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.room.read().messages.messages().to_vec()
    }

    /// Other users typing, in ascending id order
    pub fn typing_users(&self) -> Vec<UserId> {
        self.room.read().typing.users()
    }

    pub fn has_more_history(&self) -> bool {
        self.room.read().messages.has_more()
    }

    pub fn is_loading_history(&self) -> bool {
        self.room.read().history_loading
    }

    /// Last history failure; the store keeps what it had
    pub fn history_error(&self) -> Option<String> {
        self.room.read().history_error.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ChatError::Closed)?;
        response.await.map_err(|_| ChatError::Closed)?
    }

    /// Join a room on an authenticated connection.
    ///
    /// A different room than the active one is switched to.
    pub async fn join_room(&self, room: RoomKey) -> Result<()> {
        self.request(|reply| Command::JoinRoom { room, reply }).await
    }

    /// Leave the active room and attach to another.
    ///
    /// Messages, typing users and pagination of the old room are gone once
    /// this returns; late results for it are discarded.
    pub async fn switch_room(&self, room: RoomKey) -> Result<()> {
        self.request(|reply| Command::SwitchRoom { room, reply }).await
    }

    /// Send a message and wait for the server to acknowledge it.
    ///
    /// Returns the stored message when the server echoes it back. Fails
    /// without any network traffic unless authenticated and joined.
    pub async fn send_message(
        &self,
        body: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Option<ChatMessage>> {
        let message = validate_message(body)?;

        if self.is_closed() {
            return Err(ChatError::Closed);
        }
        if !self.status.borrow().is_authenticated() || !self.is_joined() {
            return Err(ChatError::NotConnected);
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send {
                message,
                reply_to,
                reply,
            })
            .map_err(|_| ChatError::Closed)?;

        match tokio::time::timeout(self.send_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChatError::Closed),
            Err(_) => {
                tracing::warn!(timeout = ?self.send_timeout, "Message not acknowledged in time");
                Err(ChatError::SendTimeout(self.send_timeout))
            }
        }
    }

    /// Send through the REST API instead of the socket, then refetch the
    /// newest page so the message shows up in history
    pub async fn post_message(&self, body: &str, reply_to: Option<MessageId>) -> Result<()> {
        let message = validate_message(body)?;
        let room = self.room().ok_or(ChatError::NotConnected)?;

        self.api
            .post_message(&room, &message, reply_to)
            .await
            .map_err(|e| ChatError::request(&e))?;

        let _ = self.commands.send(Command::CatchUp);
        Ok(())
    }

    /// Signal typing activity.
    ///
    /// `true` (re)arms the inactivity timer; a stop goes out once it lapses.
    pub fn set_typing(&self, is_typing: bool) -> Result<()> {
        if self.is_closed() {
            return Err(ChatError::Closed);
        }
        self.commands
            .send(Command::Typing(is_typing))
            .map_err(|_| ChatError::Closed)
    }

    /// Fetch the next older history page
    pub async fn load_more(&self) -> Result<HistoryLoad> {
        self.request(|reply| Command::LoadMore { reply }).await
    }

    /// Reconnect now with a fresh attempt budget
    pub fn retry(&self) -> Result<()> {
        self.commands
            .send(Command::Retry)
            .map_err(|_| ChatError::Closed)
    }

    /// Leave the room, close the socket and wait for the worker to stop.
    ///
    /// Idempotent. No events are delivered once this returns.
    pub async fn close(&self) {
        let (done, finished) = oneshot::channel();
        if self
            .commands
            .send(Command::Close { done: Some(done) })
            .is_ok()
        {
            let _ = finished.await;
        }

        self.closed.store(true, Ordering::Release);
        self.events.write().take();
    }
}

impl Drop for ChatConnection {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Close { done: None });
        }
    }
}

pub(crate) fn require_token(session: &Session) -> Result<()> {
    if session.has_token() {
        Ok(())
    } else {
        tracing::warn!("Refusing to connect without a session token");
        Err(ChatError::Auth("Missing session token".to_string()))
    }
}

/// Trimmed body of a sendable message
pub(crate) fn validate_message(body: &str) -> Result<String> {
    let body = body.trim();

    if body.is_empty() {
        return Err(ChatError::InvalidMessage("Message is empty".to_string()));
    }

    if body.chars().count() > MAX_MESSAGE_LEN {
        return Err(ChatError::InvalidMessage(format!(
            "Message exceeds {} characters",
            MAX_MESSAGE_LEN
        )));
    }

    Ok(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_message() {
        assert_eq!(validate_message("  hi  ").unwrap(), "hi");
        assert!(matches!(validate_message(""), Err(ChatError::InvalidMessage(_))));
        assert!(matches!(validate_message(" \n\t "), Err(ChatError::InvalidMessage(_))));
    }

    #[test]
    fn test_length_limit_counts_characters() {
        assert!(validate_message(&"é".repeat(MAX_MESSAGE_LEN)).is_ok());
        assert!(validate_message(&"a".repeat(MAX_MESSAGE_LEN + 1)).is_err());
    }

    #[test]
    fn test_missing_token() {
        assert!(matches!(
            require_token(&Session::new("")),
            Err(ChatError::Auth(_))
        ));
    }
}
