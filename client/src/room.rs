use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rally_protocol::{AckResponse, ChatMessage, ClientCommand, MessageId, RoomKey, ServerMessage};
use rally_state::{Membership, RoomState};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use crate::api::ChatApi;
use crate::connection::{ConnectionStatus, Link, LinkEvent, sleep_until_opt};
use crate::error::{ChatError, Result};
use crate::receiver::ChatEvent;
use crate::state::Shared;

/// Outcome of asking for an older history page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryLoad {
    /// Page merged; the number of messages not held before
    Loaded(usize),
    /// A page request was already running, so this one was dropped
    InFlight,
    /// The server has no older messages
    Exhausted,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Command {
    JoinRoom {
        room: RoomKey,
        reply: Reply<()>,
    },
    SwitchRoom {
        room: RoomKey,
        reply: Reply<()>,
    },
    Send {
        message: String,
        reply_to: Option<MessageId>,
        reply: Reply<Option<ChatMessage>>,
    },
    Typing(bool),
    LoadMore {
        reply: Reply<HistoryLoad>,
    },
    /// Refetch the newest page without moving the pagination cursor
    CatchUp,
    Retry,
    Close {
        done: Option<oneshot::Sender<()>>,
    },
}

struct PendingSend {
    generation: u64,
    reply: Reply<Option<ChatMessage>>,
}

struct HistoryResult {
    generation: u64,
    room: RoomKey,
    page: u32,
    result: std::result::Result<Vec<ChatMessage>, String>,
}

/// Task owning one chat connection.
///
/// Every mutation of the room happens here, in the order the worker observes
/// commands, frames, timers and REST results.
pub(crate) struct ChatWorker {
    link: Link,
    commands: mpsc::UnboundedReceiver<Command>,
    room: Arc<Shared<RoomState>>,
    api: Arc<dyn ChatApi>,
    events: broadcast::Sender<ChatEvent>,
    history_tx: mpsc::UnboundedSender<HistoryResult>,
    history_rx: mpsc::UnboundedReceiver<HistoryResult>,
    history_waiter: Option<Reply<HistoryLoad>>,
    /// A newest-page refetch was asked for while another page was loading
    catch_up_owed: bool,
    pending: HashMap<u64, PendingSend>,
    typing_deadline: Option<Instant>,
    typing_timeout: Duration,
    last_status: ConnectionStatus,
}

impl ChatWorker {
    pub fn new(
        link: Link,
        commands: mpsc::UnboundedReceiver<Command>,
        room: Arc<Shared<RoomState>>,
        api: Arc<dyn ChatApi>,
        events: broadcast::Sender<ChatEvent>,
        typing_timeout: Duration,
    ) -> Self {
        let (history_tx, history_rx) = mpsc::unbounded_channel();
        let last_status = link.status();

        Self {
            link,
            commands,
            room,
            api,
            events,
            history_tx,
            history_rx,
            history_waiter: None,
            catch_up_owed: false,
            pending: HashMap::new(),
            typing_deadline: None,
            typing_timeout,
            last_status,
        }
    }

    pub async fn run(mut self) {
        self.link.start();

        loop {
            self.publish_status();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Close { done }) => {
                        self.shutdown().await;
                        self.publish_status();
                        if let Some(done) = done {
                            let _ = done.send(());
                        }
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                event = self.link.next_event() => self.handle_link_event(event).await,
                Some(result) = self.history_rx.recv() => self.on_history(result),
                _ = sleep_until_opt(self.typing_deadline) => {
                    self.typing_deadline = None;
                    tracing::debug!("Typing timed out");
                    self.send_typing(false).await;
                }
            }
        }

        tracing::debug!("Chat worker stopped");
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_status(&mut self) {
        let status = self.link.status();
        if status != self.last_status {
            self.last_status = status.clone();
            self.emit(ChatEvent::StatusChanged(status));
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::JoinRoom { room, reply } => {
                if !self.link.is_authenticated() {
                    let _ = reply.send(Err(ChatError::NotConnected));
                    return;
                }
                self.switch_room(room).await;
                let _ = reply.send(Ok(()));
            }
            Command::SwitchRoom { room, reply } => {
                self.switch_room(room).await;
                let _ = reply.send(Ok(()));
            }
            Command::Send {
                message,
                reply_to,
                reply,
            } => self.send_message(message, reply_to, reply).await,
            Command::Typing(is_typing) => self.set_typing(is_typing).await,
            Command::LoadMore { reply } => self.load_more(reply),
            Command::CatchUp => self.load_page(1, None),
            Command::Retry => self.link.retry(),
            // Handled by the run loop
            Command::Close { .. } => {}
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                if let Err(e) = self.link.authenticate().await {
                    tracing::warn!(error = %e, "Failed to send authentication");
                }
            }
            LinkEvent::Authenticated { user_id } => {
                self.room
                    .write()
                    .update(&ServerMessage::Authenticated { user_id });
                self.emit(ChatEvent::Authenticated { user_id });
                self.join_current().await;
            }
            LinkEvent::AuthFailed(message) => {
                self.fail_pending(ChatError::Auth(message.clone()));
                self.emit(ChatEvent::Error(ChatError::Auth(message)));
            }
            LinkEvent::Message(message) => self.route(message),
            LinkEvent::Disconnected { reason, .. } => {
                {
                    let mut room = self.room.write();
                    room.set_membership(Membership::None);
                    room.typing.clear();
                }
                self.typing_deadline = None;
                self.fail_pending(ChatError::Connection(reason.clone()));
                self.emit(ChatEvent::Error(ChatError::Connection(reason)));
            }
        }
    }

    fn route(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Ack { id, response } => self.on_ack(id, response),
            ServerMessage::Error { message } => {
                tracing::warn!(error = %message, "Server reported an error");
                self.emit(ChatEvent::Error(ChatError::Server(message)));
            }
            ServerMessage::NewMessage(message) => self.add_message(message),
            ServerMessage::ChatHistory(messages) => {
                let (added, key) = {
                    let mut room = self.room.write();
                    if room.key().is_none() {
                        return;
                    }
                    (room.messages.merge_all(messages), room.key().cloned())
                };
                if let Some(room) = key
                    && added > 0
                {
                    self.emit(ChatEvent::HistoryLoaded {
                        room,
                        page: 1,
                        added,
                    });
                }
            }
            message @ ServerMessage::TypingUpdate(_) => {
                let change = {
                    let mut room = self.room.write();
                    if room.update(&message) {
                        room.key().cloned().map(|key| (key, room.typing.users()))
                    } else {
                        None
                    }
                };
                if let Some((room, users)) = change {
                    self.emit(ChatEvent::TypingChanged { room, users });
                }
            }
            message @ ServerMessage::JoinedRoom { .. } => {
                if self.room.write().update(&message) {
                    tracing::debug!("Join acknowledged");
                }
            }
            message @ ServerMessage::LeftRoom { .. } => {
                let left = {
                    let mut room = self.room.write();
                    if room.update(&message) {
                        room.key().cloned()
                    } else {
                        None
                    }
                };
                if let Some(room) = left {
                    self.typing_deadline = None;
                    tracing::info!(room = %room, "Removed from room by server");
                    self.emit(ChatEvent::RoomLeft(room));
                }
            }
            ServerMessage::Raw(frame) => {
                tracing::debug!(frame = %frame, "Unhandled event");
            }
            other => {
                tracing::trace!(message = ?other, "Ignoring event outside chat");
            }
        }
    }

    fn add_message(&mut self, message: ChatMessage) {
        let added = {
            let mut room = self.room.write();
            let key = room.key().cloned();
            key.filter(|_| room.messages.merge(message.clone()))
        };

        if let Some(room) = added {
            self.emit(ChatEvent::MessageReceived { room, message });
        }
    }

    fn on_ack(&mut self, id: u64, response: AckResponse) {
        let Some(pending) = self.pending.remove(&id) else {
            tracing::debug!(ack = id, "Ack for an unknown or expired send");
            return;
        };

        let result = match response {
            AckResponse::Rejected(reason) => {
                tracing::warn!(ack = id, reason = %reason, "Message rejected");
                Err(ChatError::SendRejected(reason))
            }
            accepted => {
                let message = accepted.message();
                let current = self.room.read().generation() == pending.generation;
                if let Some(message) = message.clone()
                    && current
                {
                    self.add_message(message);
                }
                Ok(message)
            }
        };

        let _ = pending.reply.send(result);
    }

    fn fail_pending(&mut self, error: ChatError) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(error.clone()));
        }
    }

    /// Key and generation of the room when it can take room traffic
    fn joined_room(&self) -> Option<(RoomKey, u64)> {
        if !self.link.is_authenticated() {
            return None;
        }

        let room = self.room.read();
        if !room.is_joined() {
            return None;
        }
        room.key().cloned().map(|key| (key, room.generation()))
    }

    async fn send_message(
        &mut self,
        message: String,
        reply_to: Option<MessageId>,
        reply: Reply<Option<ChatMessage>>,
    ) {
        let Some((room, generation)) = self.joined_room() else {
            let _ = reply.send(Err(ChatError::NotConnected));
            return;
        };

        let command = ClientCommand::SendMessage {
            room,
            message,
            reply_to,
        };

        match self.link.send_with_ack(command).await {
            Ok(id) => {
                // Callers that timed out have dropped their receiver
                self.pending.retain(|_, p| !p.reply.is_closed());
                self.pending.insert(id, PendingSend { generation, reply });
            }
            Err(e) => {
                let _ = reply.send(Err(ChatError::Connection(format!("{:#}", e))));
            }
        }
    }

    async fn set_typing(&mut self, is_typing: bool) {
        if is_typing {
            if self.send_typing(true).await {
                self.typing_deadline = Some(Instant::now() + self.typing_timeout);
            }
        } else {
            self.typing_deadline = None;
            self.send_typing(false).await;
        }
    }

    /// Returns whether the signal went out
    async fn send_typing(&mut self, is_typing: bool) -> bool {
        let Some((room, _)) = self.joined_room() else {
            return false;
        };

        match self.link.send(ClientCommand::Typing { room, is_typing }).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to send typing signal");
                false
            }
        }
    }

    async fn switch_room(&mut self, key: RoomKey) {
        let (same_room, joined) = {
            let room = self.room.read();
            (room.key() == Some(&key), room.is_joined())
        };

        if same_room {
            if !joined && self.link.is_authenticated() {
                self.join_current().await;
            }
            return;
        }

        self.leave_current().await;

        if let Some(waiter) = self.history_waiter.take() {
            let _ = waiter.send(Err(ChatError::HistoryLoad(
                "Room changed before the page arrived".to_string(),
            )));
        }

        self.catch_up_owed = false;
        let previous = self.room.write().switch_to(key.clone());
        tracing::info!(room = %key, previous = ?previous.as_ref().map(RoomKey::room_name), "Switched room");

        if let Some(previous) = previous {
            self.emit(ChatEvent::RoomLeft(previous));
        }

        if self.link.is_authenticated() {
            self.join_current().await;
        }
    }

    /// Stop typing and leave the active room if we are in it
    async fn leave_current(&mut self) {
        if self.typing_deadline.take().is_some() {
            self.send_typing(false).await;
        }

        if let Some((room, _)) = self.joined_room() {
            if let Err(e) = self.link.send(ClientCommand::LeaveRoom(room.clone())).await {
                tracing::debug!(room = %room, error = %e, "Failed to send leave");
            }
            self.room.write().set_membership(Membership::None);
        }
    }

    async fn join_current(&mut self) {
        let Some(key) = self.room.read().key().cloned() else {
            return;
        };

        if let Err(e) = self.link.send(ClientCommand::JoinRoom(key.clone())).await {
            tracing::warn!(room = %key, error = %e, "Failed to send join");
            return;
        }

        self.room.write().set_membership(Membership::Requested);
        tracing::info!(room = %key, "Joined room");
        self.emit(ChatEvent::RoomJoined(key));

        // Initial load, or a catch-up of the newest page after a reconnect
        self.load_page(1, None);
    }

    fn load_more(&mut self, reply: Reply<HistoryLoad>) {
        if self.joined_room().is_none() {
            let _ = reply.send(Err(ChatError::NotConnected));
            return;
        }

        let (has_more, next_page) = {
            let room = self.room.read();
            (room.messages.has_more(), room.messages.next_page())
        };

        if !has_more {
            let _ = reply.send(Ok(HistoryLoad::Exhausted));
            return;
        }

        self.load_page(next_page, Some(reply));
    }

    fn load_page(&mut self, page: u32, waiter: Option<Reply<HistoryLoad>>) {
        let (key, generation, per_page) = {
            let mut room = self.room.write();
            let Some(key) = room.key().cloned() else {
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(ChatError::NotConnected));
                }
                return;
            };

            if room.history_loading {
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(Ok(HistoryLoad::InFlight));
                    }
                    None => {
                        tracing::debug!(room = %key, "Catch-up deferred until the running page settles");
                        self.catch_up_owed = true;
                    }
                }
                return;
            }

            room.history_loading = true;
            (key, room.generation(), room.messages.page_size())
        };

        self.history_waiter = waiter;
        tracing::debug!(room = %key, page, "Loading history page");

        let api = Arc::clone(&self.api);
        let results = self.history_tx.clone();

        tokio::spawn(async move {
            let result = api
                .list_messages(&key, page, per_page)
                .await
                .map_err(|e| format!("{:#}", e));
            let _ = results.send(HistoryResult {
                generation,
                room: key,
                page,
                result,
            });
        });
    }

    fn on_history(&mut self, result: HistoryResult) {
        let HistoryResult {
            generation,
            room: key,
            page,
            result,
        } = result;

        let outcome = {
            let mut room = self.room.write();
            if room.generation() != generation {
                tracing::debug!(room = %key, page, "Dropping history page for a previous room");
                return;
            }

            room.history_loading = false;
            match result {
                Ok(messages) => {
                    let loaded = messages.len();
                    let added = room.messages.merge_all(messages);
                    room.messages.record_page(page, loaded);
                    room.history_error = None;
                    tracing::debug!(room = %key, page, loaded, added, "History page merged");
                    Ok(added)
                }
                Err(error) => {
                    room.history_error = Some(error.clone());
                    Err(error)
                }
            }
        };

        let waiter = self.history_waiter.take();
        match outcome {
            Ok(added) => {
                self.emit(ChatEvent::HistoryLoaded {
                    room: key,
                    page,
                    added,
                });
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Ok(HistoryLoad::Loaded(added)));
                }
            }
            Err(error) => {
                tracing::warn!(room = %key, page, error = %error, "Failed to load history");
                self.emit(ChatEvent::Error(ChatError::HistoryLoad(error.clone())));
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(ChatError::HistoryLoad(error)));
                }
            }
        }

        if std::mem::take(&mut self.catch_up_owed) {
            self.load_page(1, None);
        }
    }

    async fn shutdown(&mut self) {
        self.leave_current().await;

        if let Some(waiter) = self.history_waiter.take() {
            let _ = waiter.send(Err(ChatError::Closed));
        }
        self.fail_pending(ChatError::Closed);
        self.catch_up_owed = false;

        if let Some(room) = self.room.write().reset() {
            tracing::debug!(room = %room, "Discarded room state");
        }

        self.link.close().await;
    }
}
