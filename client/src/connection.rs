use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use rally_protocol::{ClientCommand, ClientMessage, ServerMessage, UserId, parse_server_message};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

use crate::config::ReconnectPolicy;
use crate::error::ChatError;
use crate::transport::{Connector, Transport};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport up, authentication not yet acknowledged
    Connected,
    Authenticated,
    /// Authentication rejected; no automatic retry
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Most recent lifecycle failure, kept after giving up on reconnecting
    pub last_error: Option<ChatError>,
    /// Reconnect attempts since the last successful authentication
    pub reconnect_attempts: u32,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_error: None,
            reconnect_attempts: 0,
        }
    }
}

impl ConnectionStatus {
    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }
}

/// What a [`Link`] reports to the worker driving it
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// Transport is up; the worker should call [`Link::authenticate`]
    Connected,
    Authenticated { user_id: Option<UserId> },
    AuthFailed(String),
    Message(ServerMessage),
    Disconnected { reason: String, retrying: bool },
}

enum Attempt {
    Connected {
        generation: u64,
        transport: Box<dyn Transport>,
    },
    Failed {
        generation: u64,
        error: String,
    },
}

/// One authenticated socket and its reconnect loop.
///
/// Owned by a single worker task. Connect attempts run on their own tasks and
/// report back tagged with a generation, so a result that arrives after
/// `close` or `retry` is dropped instead of resurrecting the link. Both the
/// connect attempt and the authentication handshake are bounded by the
/// connect timeout; running out counts as a lost connection.
pub(crate) struct Link {
    label: &'static str,
    url: String,
    token: String,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    connector: Arc<dyn Connector>,
    status: watch::Sender<ConnectionStatus>,
    transport: Option<Box<dyn Transport>>,
    attempt_tx: mpsc::UnboundedSender<Attempt>,
    attempt_rx: mpsc::UnboundedReceiver<Attempt>,
    generation: u64,
    reconnect_at: Option<Instant>,
    auth_deadline: Option<Instant>,
    next_ack: u64,
    closed: bool,
}

impl Link {
    pub fn new(
        label: &'static str,
        url: String,
        token: String,
        policy: ReconnectPolicy,
        connect_timeout: Duration,
        connector: Arc<dyn Connector>,
        status: watch::Sender<ConnectionStatus>,
    ) -> Self {
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();

        Self {
            label,
            url,
            token,
            policy,
            connect_timeout,
            connector,
            status,
            transport: None,
            attempt_tx,
            attempt_rx,
            generation: 0,
            reconnect_at: None,
            auth_deadline: None,
            next_ack: 0,
            closed: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    pub fn start(&mut self) {
        self.connect();
    }

    fn connect(&mut self) {
        self.generation += 1;
        self.reconnect_at = None;
        self.auth_deadline = None;
        self.status.send_modify(|s| s.state = ConnectionState::Connecting);

        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let attempts = self.attempt_tx.clone();
        let timeout = self.connect_timeout;

        tracing::debug!(link = self.label, url = %self.url, generation, "Connecting");

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("Connection attempt timed out after {:?}", timeout)),
            };
            let attempt = match result {
                Ok(transport) => Attempt::Connected {
                    generation,
                    transport,
                },
                Err(e) => Attempt::Failed {
                    generation,
                    error: format!("{:#}", e),
                },
            };
            let _ = attempts.send(attempt);
        });
    }

    /// Wait for the next lifecycle event or inbound message.
    ///
    /// Cancel safe: nothing is awaited here except channel receives, the
    /// transport's `recv` and the timers.
    pub async fn next_event(&mut self) -> LinkEvent {
        loop {
            tokio::select! {
                Some(attempt) = self.attempt_rx.recv() => {
                    if let Some(event) = self.on_attempt(attempt) {
                        return event;
                    }
                }
                frame = recv_frame(&mut self.transport) => {
                    if let Some(event) = self.on_frame(frame) {
                        return event;
                    }
                }
                _ = sleep_until_opt(self.reconnect_at) => {
                    tracing::info!(
                        link = self.label,
                        attempt = self.status.borrow().reconnect_attempts,
                        max_attempts = self.policy.max_attempts,
                        "Reconnecting"
                    );
                    self.connect();
                }
                _ = sleep_until_opt(self.auth_deadline) => {
                    self.auth_deadline = None;
                    tracing::warn!(link = self.label, timeout = ?self.connect_timeout, "No answer to authenticate");
                    return self.lost("Authentication timed out".to_string());
                }
            }
        }
    }

    fn on_attempt(&mut self, attempt: Attempt) -> Option<LinkEvent> {
        match attempt {
            Attempt::Connected {
                generation,
                transport,
            } if generation == self.generation && !self.closed => {
                self.transport = Some(transport);
                self.auth_deadline = Some(Instant::now() + self.connect_timeout);
                self.status.send_modify(|s| s.state = ConnectionState::Connected);
                tracing::info!(link = self.label, "Connected, authenticating");
                Some(LinkEvent::Connected)
            }
            Attempt::Connected { transport, .. } => {
                tracing::debug!(link = self.label, "Discarding superseded connection");
                discard(transport);
                None
            }
            Attempt::Failed { generation, error } if generation == self.generation && !self.closed => {
                tracing::warn!(
                    link = self.label,
                    attempt = self.status.borrow().reconnect_attempts,
                    error = %error,
                    "Connection attempt failed"
                );
                Some(self.lost(error))
            }
            Attempt::Failed { .. } => None,
        }
    }

    fn on_frame(&mut self, frame: Option<Result<String>>) -> Option<LinkEvent> {
        let text = match frame {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Some(self.lost(format!("{:#}", e))),
            None => return Some(self.lost("Connection closed by server".to_string())),
        };

        let message = match parse_server_message(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(link = self.label, error = %e, "Ignoring malformed frame");
                return None;
            }
        };

        match message {
            ServerMessage::Connected => {
                tracing::debug!(link = self.label, "Server greeting");
                None
            }
            ServerMessage::Authenticated { user_id } => {
                self.auth_deadline = None;
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Authenticated;
                    s.last_error = None;
                    s.reconnect_attempts = 0;
                });
                tracing::info!(link = self.label, user_id = ?user_id, "Authenticated");
                Some(LinkEvent::Authenticated { user_id })
            }
            ServerMessage::AuthError { message } => Some(self.auth_failed(message)),
            // Servers without a dedicated auth failure event report it as a plain error
            ServerMessage::Error { message } if self.state() == ConnectionState::Connected => {
                Some(self.auth_failed(message))
            }
            other => Some(LinkEvent::Message(other)),
        }
    }

    fn auth_failed(&mut self, message: String) -> LinkEvent {
        tracing::error!(link = self.label, error = %message, "Authentication rejected");
        self.auth_deadline = None;
        self.status.send_modify(|s| {
            s.state = ConnectionState::Error;
            s.last_error = Some(ChatError::Auth(message.clone()));
        });
        LinkEvent::AuthFailed(message)
    }

    /// Transport gone or attempt failed
    fn lost(&mut self, reason: String) -> LinkEvent {
        if let Some(transport) = self.transport.take() {
            discard(transport);
        }
        self.auth_deadline = None;

        // The auth error stays the reason; a rejected token is not retried
        if self.state() == ConnectionState::Error {
            tracing::debug!(link = self.label, reason = %reason, "Rejected connection closed");
            self.status.send_modify(|s| s.state = ConnectionState::Disconnected);
            return LinkEvent::Disconnected {
                reason,
                retrying: false,
            };
        }

        let retrying = self.schedule_reconnect();
        self.status.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.last_error = Some(ChatError::Connection(reason.clone()));
        });

        if !retrying && !self.closed {
            tracing::error!(
                link = self.label,
                attempts = self.status.borrow().reconnect_attempts,
                error = %reason,
                "Giving up on reconnecting"
            );
        }

        LinkEvent::Disconnected { reason, retrying }
    }

    fn schedule_reconnect(&mut self) -> bool {
        let attempts = self.status.borrow().reconnect_attempts;
        if self.closed || attempts >= self.policy.max_attempts {
            return false;
        }

        let attempt = attempts + 1;
        self.reconnect_at = Some(Instant::now() + self.policy.delay_for(attempt));
        self.status.send_modify(|s| s.reconnect_attempts = attempt);
        true
    }

    pub async fn authenticate(&mut self) -> Result<()> {
        let token = self.token.clone();
        self.send(ClientCommand::Authenticate { token }).await
    }

    pub async fn send(&mut self, command: ClientCommand) -> Result<()> {
        self.write(ClientMessage::new(command)).await
    }

    /// Send a command the server answers with an ack carrying the returned id
    pub async fn send_with_ack(&mut self, command: ClientCommand) -> Result<u64> {
        self.next_ack += 1;
        let id = self.next_ack;
        self.write(ClientMessage::with_ack(command, id)).await?;
        Ok(id)
    }

    async fn write(&mut self, message: ClientMessage) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            bail!("Not connected");
        };

        tracing::trace!(link = self.label, event = message.command.event_name(), "Sending");
        transport.send(message.to_wire_format()).await
    }

    /// Start over with a fresh attempt budget
    pub fn retry(&mut self) {
        if self.closed
            || matches!(
                self.state(),
                ConnectionState::Authenticated | ConnectionState::Connecting
            )
        {
            return;
        }

        if let Some(transport) = self.transport.take() {
            discard(transport);
        }
        self.status.send_modify(|s| s.reconnect_attempts = 0);
        tracing::info!(link = self.label, "Retrying connection");
        self.connect();
    }

    pub async fn close(&mut self) {
        if self.closed {
            return;
        }

        self.closed = true;
        self.generation += 1;
        self.reconnect_at = None;
        self.auth_deadline = None;

        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.close().await
        {
            tracing::debug!(link = self.label, error = %e, "Error closing transport");
        }

        self.status.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.reconnect_attempts = 0;
        });
        tracing::info!(link = self.label, "Closed");
    }
}

fn discard(mut transport: Box<dyn Transport>) {
    tokio::spawn(async move {
        let _ = transport.close().await;
    });
}

async fn recv_frame(transport: &mut Option<Box<dyn Transport>>) -> Option<Result<String>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => pending().await,
    }
}

/// Sleep until the deadline, or forever without one
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
