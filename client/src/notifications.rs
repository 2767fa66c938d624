use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rally_protocol::rest::NotificationPage;
use rally_protocol::{ClientCommand, Notification, RoomKey, ServerMessage};
use rally_state::NotificationStore;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Interval, MissedTickBehavior};

use crate::api::{NotificationApi, RestClient};
use crate::config::{ClientConfig, Session};
use crate::connection::{ConnectionStatus, Link, LinkEvent};
use crate::error::{ChatError, Result};
use crate::handle::require_token;
use crate::receiver::{EventReceiver, NotificationEvent};
use crate::state::Shared;
use crate::transport::{Connector, WsConnector};

enum Command {
    JoinClub(u64),
    LeaveClub(u64),
    /// Refetch the list and the counter from the server
    Reconcile,
    Retry,
    Close { done: Option<oneshot::Sender<()>> },
}

enum Fetched {
    UnreadCount(std::result::Result<u64, String>),
    Page(std::result::Result<NotificationPage, String>),
}

/// Everything the handle and the worker both touch
struct Inner {
    store: Shared<NotificationStore>,
    api: Arc<dyn NotificationApi>,
    events: Shared<Option<broadcast::Sender<NotificationEvent>>>,
    page_size: u32,
}

impl Inner {
    fn emit(&self, event: NotificationEvent) {
        if let Some(events) = self.events.read().as_ref() {
            let _ = events.send(event);
        }
    }

    fn set_unread_count(&self, count: u64) {
        let changed = {
            let mut store = self.store.write();
            let changed = store.unread_count() != count;
            store.set_unread_count(count);
            changed
        };
        if changed {
            self.emit(NotificationEvent::UnreadCountChanged(count));
        }
    }

    fn replace(&self, page: &NotificationPage) {
        self.store.write().replace(page.notifications.clone());
        self.emit(NotificationEvent::Refreshed);
    }

    fn unread_count(&self) -> u64 {
        self.store.read().unread_count()
    }
}

/// Task owning the notification socket and the unread poll
struct NotificationWorker {
    link: Link,
    commands: mpsc::UnboundedReceiver<Command>,
    inner: Arc<Inner>,
    clubs: BTreeSet<u64>,
    poll: Interval,
    fetched_tx: mpsc::UnboundedSender<Fetched>,
    fetched_rx: mpsc::UnboundedReceiver<Fetched>,
    last_status: ConnectionStatus,
}

impl NotificationWorker {
    async fn run(mut self) {
        self.link.start();

        loop {
            self.publish_status();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Close { done }) => {
                        self.link.close().await;
                        self.publish_status();
                        if let Some(done) = done {
                            let _ = done.send(());
                        }
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.link.close().await;
                        break;
                    }
                },
                event = self.link.next_event() => self.handle_link_event(event).await,
                _ = self.poll.tick() => self.fetch_unread_count(),
                Some(fetched) = self.fetched_rx.recv() => self.on_fetched(fetched),
            }
        }

        tracing::debug!("Notification worker stopped");
    }

    fn publish_status(&mut self) {
        let status = self.link.status();
        if status != self.last_status {
            self.last_status = status.clone();
            self.inner.emit(NotificationEvent::StatusChanged(status));
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::JoinClub(club_id) => {
                if self.clubs.insert(club_id) && self.link.is_authenticated() {
                    self.send(ClientCommand::JoinRoom(RoomKey::club(club_id)))
                        .await;
                }
            }
            Command::LeaveClub(club_id) => {
                if self.clubs.remove(&club_id) && self.link.is_authenticated() {
                    self.send(ClientCommand::LeaveRoom(RoomKey::club(club_id)))
                        .await;
                }
            }
            Command::Reconcile => self.reconcile(),
            Command::Retry => self.link.retry(),
            Command::Close { .. } => {}
        }
    }

    async fn send(&mut self, command: ClientCommand) {
        let event = command.event_name().to_string();
        if let Err(e) = self.link.send(command).await {
            tracing::debug!(event = %event, error = %e, "Failed to send");
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
                self.inner
                    .emit(NotificationEvent::Authenticated { user_id });
                self.send(ClientCommand::RequestUnreadCount).await;
                let clubs: Vec<u64> = self.clubs.iter().copied().collect();
                for club_id in clubs {
                    self.send(ClientCommand::JoinRoom(RoomKey::club(club_id)))
                        .await;
                }
                self.reconcile();
            }
            LinkEvent::AuthFailed(message) => {
                self.inner
                    .emit(NotificationEvent::Error(ChatError::Auth(message)));
            }
            LinkEvent::Message(message) => self.route(message),
            LinkEvent::Disconnected { reason, .. } => {
                self.inner
                    .emit(NotificationEvent::Error(ChatError::Connection(reason)));
            }
        }
    }

    fn route(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::NewNotification(notification) => {
                tracing::debug!(id = notification.id, "Notification received");
                let (added, count) = {
                    let mut store = self.inner.store.write();
                    (store.push(notification.clone()), store.unread_count())
                };
                if added {
                    self.inner
                        .emit(NotificationEvent::NotificationReceived(notification));
                    self.inner
                        .emit(NotificationEvent::UnreadCountChanged(count));
                }
            }
            ServerMessage::UnreadCountUpdate { count } => self.inner.set_unread_count(count),
            ServerMessage::ClubNotification(payload) => {
                self.inner
                    .emit(NotificationEvent::ClubNotification(payload));
            }
            ServerMessage::Error { message } => {
                tracing::warn!(error = %message, "Server reported an error");
                self.inner
                    .emit(NotificationEvent::Error(ChatError::Server(message)));
            }
            other => {
                tracing::trace!(message = ?other, "Ignoring event outside notifications");
            }
        }
    }

    fn fetch_unread_count(&self) {
        let api = Arc::clone(&self.inner.api);
        let fetched = self.fetched_tx.clone();

        tokio::spawn(async move {
            let result = api.unread_count().await.map_err(|e| format!("{:#}", e));
            let _ = fetched.send(Fetched::UnreadCount(result));
        });
    }

    fn reconcile(&self) {
        let api = Arc::clone(&self.inner.api);
        let fetched = self.fetched_tx.clone();
        let per_page = self.inner.page_size;

        tokio::spawn(async move {
            let page = api
                .list_notifications(1, per_page, false)
                .await
                .map_err(|e| format!("{:#}", e));
            let _ = fetched.send(Fetched::Page(page));
        });

        self.fetch_unread_count();
    }

    fn on_fetched(&mut self, fetched: Fetched) {
        match fetched {
            Fetched::UnreadCount(Ok(count)) => self.inner.set_unread_count(count),
            Fetched::Page(Ok(page)) => self.inner.replace(&page),
            // The last known values stay until a fetch succeeds
            Fetched::UnreadCount(Err(error)) | Fetched::Page(Err(error)) => {
                tracing::warn!(error = %error, "Failed to refresh notifications");
            }
        }
    }
}

/// Handle to the user's notification stream.
///
/// Keeps the newest page of notifications and an unread counter current
/// through socket pushes, a periodic REST poll of the counter, and
/// reconciliation after every (re)authentication.
pub struct NotificationStream {
    commands: mpsc::UnboundedSender<Command>,
    inner: Arc<Inner>,
    status: watch::Receiver<ConnectionStatus>,
    closed: Arc<AtomicBool>,
}

impl NotificationStream {
    /// Start over WebSocket with the REST API
    pub fn connect(config: &ClientConfig, session: &Session) -> Result<Self> {
        require_token(session)?;
        let api = RestClient::new(config, session).map_err(|e| ChatError::request(&e))?;
        Self::start(config, session, Arc::new(WsConnector), Arc::new(api))
    }

    /// Start with explicit transport and REST implementations.
    ///
    /// Fails with [`ChatError::Auth`] without touching the network when the
    /// session has no token. Must be called within a Tokio runtime.
    pub fn start(
        config: &ClientConfig,
        session: &Session,
        connector: Arc<dyn Connector>,
        api: Arc<dyn NotificationApi>,
    ) -> Result<Self> {
        require_token(session)?;

        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (fetched_tx, fetched_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            store: Shared::new(NotificationStore::new()),
            api,
            events: Shared::new(Some(events)),
            page_size: config.notification_page_size,
        });

        let mut poll = tokio::time::interval(config.unread_poll_interval.max(Duration::from_millis(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let link = Link::new(
            "notifications",
            config.socket_url.clone(),
            session.token().to_string(),
            config.reconnect.clone(),
            config.connect_timeout,
            connector,
            status_tx,
        );
        let last_status = link.status();

        let worker = NotificationWorker {
            link,
            commands: commands_rx,
            inner: Arc::clone(&inner),
            clubs: BTreeSet::new(),
            poll,
            fetched_tx,
            fetched_rx,
            last_status,
        };
        tokio::spawn(worker.run());

        Ok(Self {
            commands,
            inner,
            status,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn events(&self) -> EventReceiver<NotificationEvent> {
        let incoming = match self.inner.events.read().as_ref() {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).0.subscribe(),
        };
        EventReceiver::new(incoming, Arc::clone(&self.closed))
    }

    /// Newest first
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.store.read().notifications().to_vec()
    }

    pub fn unread_count(&self) -> u64 {
        self.inner.unread_count()
    }

    /// Fetch a page and make it the local list
    pub async fn fetch_notifications(
        &self,
        page: u32,
        unread_only: bool,
    ) -> Result<NotificationPage> {
        let fetched = self
            .inner
            .api
            .list_notifications(page.max(1), self.inner.page_size, unread_only)
            .await
            .map_err(|e| ChatError::request(&e))?;

        self.inner.replace(&fetched);
        Ok(fetched)
    }

    /// Fetch the server's unread count, overwriting the local one
    pub async fn fetch_unread_count(&self) -> Result<u64> {
        let count = self
            .inner
            .api
            .unread_count()
            .await
            .map_err(|e| ChatError::request(&e))?;

        self.inner.set_unread_count(count);
        Ok(count)
    }

    /// Refetch the first page and the counter
    pub async fn refresh(&self) -> Result<()> {
        let (page, count) = tokio::join!(
            self.fetch_notifications(1, false),
            self.fetch_unread_count()
        );
        page.map(|_| ())?;
        count.map(|_| ())
    }

    /// Mark one notification read.
    ///
    /// The local change applies immediately. When the server refuses, the
    /// error is returned and a refetch from the server corrects local state.
    pub async fn mark_as_read(&self, id: u64) -> Result<()> {
        let changed = self.inner.store.write().mark_read(id);
        if changed {
            self.inner
                .emit(NotificationEvent::UnreadCountChanged(self.inner.unread_count()));
        }

        if let Err(e) = self.inner.api.mark_read(id).await {
            tracing::warn!(id, error = %e, "Failed to mark notification read, reconciling");
            let _ = self.commands.send(Command::Reconcile);
            return Err(ChatError::request(&e));
        }
        Ok(())
    }

    /// Mark everything read; same failure handling as [`mark_as_read`](Self::mark_as_read)
    pub async fn mark_all_as_read(&self) -> Result<()> {
        self.inner.store.write().mark_all_read();
        self.inner
            .emit(NotificationEvent::UnreadCountChanged(0));

        if let Err(e) = self.inner.api.mark_all_read().await {
            tracing::warn!(error = %e, "Failed to mark all notifications read, reconciling");
            let _ = self.commands.send(Command::Reconcile);
            return Err(ChatError::request(&e));
        }
        Ok(())
    }

    /// Delete on the server, then locally
    pub async fn delete_notification(&self, id: u64) -> Result<()> {
        self.inner
            .api
            .delete_notification(id)
            .await
            .map_err(|e| ChatError::request(&e))?;

        let removed = self.inner.store.write().remove(id);
        if removed.is_some_and(|n| !n.read) {
            self.inner
                .emit(NotificationEvent::UnreadCountChanged(self.inner.unread_count()));
        }
        Ok(())
    }

    /// Subscribe to a club's announcements; kept across reconnects
    pub fn join_club_room(&self, club_id: u64) -> Result<()> {
        self.commands
            .send(Command::JoinClub(club_id))
            .map_err(|_| ChatError::Closed)
    }

    pub fn leave_club_room(&self, club_id: u64) -> Result<()> {
        self.commands
            .send(Command::LeaveClub(club_id))
            .map_err(|_| ChatError::Closed)
    }

    pub fn retry(&self) -> Result<()> {
        self.commands
            .send(Command::Retry)
            .map_err(|_| ChatError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the socket, stop polling and wait for the worker to stop.
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
        self.inner.events.write().take();
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Close { done: None });
        }
    }
}
