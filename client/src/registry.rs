use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use rally_protocol::{ChatMessage, MessageId, RoomKey, UserId};
use tokio::sync::watch;

use crate::api::{ChatApi, RestClient};
use crate::config::{ClientConfig, Session};
use crate::connection::ConnectionStatus;
use crate::error::{ChatError, Result};
use crate::handle::ChatConnection;
use crate::receiver::{ChatEvent, EventReceiver};
use crate::room::HistoryLoad;
use crate::transport::{Connector, WsConnector};

/// Hands out one chat connection per room, shared by every subscriber.
///
/// A connection lives as long as some [`SharedRoom`] for it does; the last
/// one dropped closes it.
pub struct ConnectionManager {
    config: ClientConfig,
    session: Session,
    connector: Arc<dyn Connector>,
    api: Arc<dyn ChatApi>,
    rooms: Mutex<HashMap<RoomKey, Weak<ChatConnection>>>,
}

impl ConnectionManager {
    pub fn new(
        config: ClientConfig,
        session: Session,
        connector: Arc<dyn Connector>,
        api: Arc<dyn ChatApi>,
    ) -> Self {
        Self {
            config,
            session,
            connector,
            api,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// WebSocket transport and the REST API
    pub fn connect(config: ClientConfig, session: Session) -> Result<Self> {
        let api = RestClient::new(&config, &session).map_err(|e| ChatError::request(&e))?;
        Ok(Self::new(config, session, Arc::new(WsConnector), Arc::new(api)))
    }

    /// The room's connection, opened on first use
    pub fn acquire(&self, room: RoomKey) -> Result<SharedRoom> {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms.retain(|_, connection| connection.strong_count() > 0);

        if let Some(connection) = rooms.get(&room).and_then(Weak::upgrade) {
            tracing::debug!(room = %room, "Sharing existing connection");
            return Ok(SharedRoom(connection));
        }

        let connection = Arc::new(ChatConnection::open(
            &self.config,
            &self.session,
            Some(room.clone()),
            Arc::clone(&self.connector),
            Arc::clone(&self.api),
        )?);

        tracing::debug!(room = %room, "Opened connection");
        rooms.insert(room, Arc::downgrade(&connection));
        Ok(SharedRoom(connection))
    }

    /// Rooms with at least one live subscriber
    pub fn active_rooms(&self) -> Vec<RoomKey> {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms
            .iter()
            .filter(|(_, connection)| connection.strong_count() > 0)
            .map(|(room, _)| room.clone())
            .collect()
    }
}

/// A subscriber's reference to a shared room connection.
///
/// Exposes what one subscriber may do without affecting the others: reading
/// room state, sending, typing and paging. The connection is closed by
/// dropping the last handle, and a different room is a separate
/// [`ConnectionManager::acquire`].
#[derive(Clone)]
pub struct SharedRoom(Arc<ChatConnection>);

impl SharedRoom {
    /// Live subscribers of this room, including this one
    pub fn subscribers(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.0.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.0.subscribe_status()
    }

    pub fn events(&self) -> EventReceiver<ChatEvent> {
        self.0.events()
    }

    pub fn room(&self) -> Option<RoomKey> {
        self.0.room()
    }

    pub fn is_joined(&self) -> bool {
        self.0.is_joined()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.0.messages()
    }

    pub fn typing_users(&self) -> Vec<UserId> {
        self.0.typing_users()
    }

    pub fn has_more_history(&self) -> bool {
        self.0.has_more_history()
    }

    pub fn is_loading_history(&self) -> bool {
        self.0.is_loading_history()
    }

    pub fn history_error(&self) -> Option<String> {
        self.0.history_error()
    }

    pub async fn send_message(
        &self,
        body: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Option<ChatMessage>> {
        self.0.send_message(body, reply_to).await
    }

    pub async fn post_message(&self, body: &str, reply_to: Option<MessageId>) -> Result<()> {
        self.0.post_message(body, reply_to).await
    }

    pub fn set_typing(&self, is_typing: bool) -> Result<()> {
        self.0.set_typing(is_typing)
    }

    pub async fn load_more(&self) -> Result<HistoryLoad> {
        self.0.load_more().await
    }

    pub fn retry(&self) -> Result<()> {
        self.0.retry()
    }
}
