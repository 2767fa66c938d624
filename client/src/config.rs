use std::time::Duration;

use rally_protocol::UserId;

/// Used when neither [`ClientConfig::new`] nor `RALLY_API_URL` says otherwise
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:7000";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(7);
const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_UNREAD_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_HISTORY_PAGE_SIZE: u32 = 50;
const DEFAULT_NOTIFICATION_PAGE_SIZE: u32 = 20;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// How a dropped socket is re-established.
///
/// Delays grow linearly: attempt `n` waits `delay + increment * (n - 1)`.
/// With the default zero increment every attempt waits the same second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub increment: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
            increment: Duration::ZERO,
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect automatically
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before the given 1-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay + self.increment * attempt.saturating_sub(1)
    }
}

/// Client configuration.
///
/// ```
/// use rally_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("https://events.example.edu/api")
///     .with_send_timeout(Duration::from_secs(10));
/// assert_eq!(config.socket_url, "wss://events.example.edu/api/ws");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API
    pub api_url: String,
    /// Websocket endpoint. Defaults to the API URL with a `ws(s)` scheme and `/ws` path.
    pub socket_url: String,
    pub reconnect: ReconnectPolicy,
    /// Bound on one connect attempt, and separately on the authentication answer
    pub connect_timeout: Duration,
    /// Bound on waiting for a send acknowledgment
    pub send_timeout: Duration,
    /// Inactivity after which a typing-stop signal is sent
    pub typing_timeout: Duration,
    pub history_page_size: u32,
    pub notification_page_size: u32,
    /// Fallback REST polling of the unread counter
    pub unread_poll_interval: Duration,
    /// Capacity of event broadcast channels; slow receivers skip events past it
    pub event_channel_capacity: usize,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let socket_url = socket_url_for(&api_url);

        Self {
            api_url,
            socket_url,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            notification_page_size: DEFAULT_NOTIFICATION_PAGE_SIZE,
            unread_poll_interval: DEFAULT_UNREAD_POLL_INTERVAL,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }

    /// Read `RALLY_API_URL` and `RALLY_SOCKET_URL`, falling back to defaults
    pub fn from_env() -> Self {
        let api_url = std::env::var("RALLY_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let config = Self::new(api_url);

        match std::env::var("RALLY_SOCKET_URL") {
            Ok(url) if !url.trim().is_empty() => config.with_socket_url(url),
            _ => config,
        }
    }

    pub fn with_socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = url.into();
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_typing_timeout(mut self, timeout: Duration) -> Self {
        self.typing_timeout = timeout;
        self
    }

    pub fn with_history_page_size(mut self, size: u32) -> Self {
        self.history_page_size = size.max(1);
        self
    }

    pub fn with_notification_page_size(mut self, size: u32) -> Self {
        self.notification_page_size = size.max(1);
        self
    }

    pub fn with_unread_poll_interval(mut self, interval: Duration) -> Self {
        self.unread_poll_interval = interval;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

fn socket_url_for(api_url: &str) -> String {
    let base = if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        api_url.to_string()
    };

    format!("{}/ws", base)
}

/// Read-only view of the signed-in user.
///
/// Token persistence and login flows live elsewhere; the client only reads
/// what it is handed here.
#[derive(Clone)]
pub struct Session {
    token: String,
    user_id: Option<UserId>,
    role: Option<String>,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: None,
            role: None,
        }
    }

    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .finish()
    }
}
