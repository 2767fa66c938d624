//! REST endpoints used alongside the realtime socket

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rally_protocol::rest::{
    ApiResponse, MessagesPayload, NotificationPage, SendMessageRequest, UnreadCount,
};
use rally_protocol::{ChatMessage, MessageId, RoomKey};
use serde::de::DeserializeOwned;

use crate::config::{ClientConfig, Session};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// History pages and the non-realtime send path
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// One page of history, in whatever order the server returns it
    async fn list_messages(&self, room: &RoomKey, page: u32, per_page: u32)
    -> Result<Vec<ChatMessage>>;

    async fn post_message(
        &self,
        room: &RoomKey,
        message: &str,
        reply_to: Option<MessageId>,
    ) -> Result<()>;
}

#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn list_notifications(
        &self,
        page: u32,
        per_page: u32,
        unread_only: bool,
    ) -> Result<NotificationPage>;

    async fn unread_count(&self) -> Result<u64>;

    async fn mark_read(&self, id: u64) -> Result<()>;

    async fn mark_all_read(&self) -> Result<()>;

    async fn delete_notification(&self, id: u64) -> Result<()>;
}

/// Bearer-authenticated client for the REST API
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(config: &ClientConfig, session: &Session) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.api_url.clone(),
            token: session.token().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to send GET {}", path))?;

        read_body::<T>(response).await?.into_data()
    }

    async fn put(&self, path: &str) -> Result<()> {
        let response = self
            .http
            .put(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("Failed to send PUT {}", path))?;

        read_body::<serde_json::Value>(response).await?.into_unit()
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("Failed to send DELETE {}", path))?;

        read_body::<serde_json::Value>(response).await?.into_unit()
    }
}

/// Decode the response envelope, turning HTTP failures into errors carrying
/// the server's message when there is one
async fn read_body<T: DeserializeOwned>(response: reqwest::Response) -> Result<ApiResponse<T>> {
    let status = response.status();
    let text = response
        .text()
        .await
        .context("Failed to read response body")?;

    match serde_json::from_str::<ApiResponse<T>>(&text) {
        Ok(body) if status.is_success() => Ok(body),
        Ok(body) => bail!(
            "HTTP {}: {}",
            status,
            body.error.or(body.message).unwrap_or_default()
        ),
        Err(e) if status.is_success() => Err(e).context("Failed to parse response"),
        Err(_) => bail!("HTTP {}", status),
    }
}

fn messages_path(room: &RoomKey) -> String {
    match room {
        RoomKey::Event {
            event_id,
            chat_type,
        } => format!("/events/{}/chats/{}/messages", event_id, chat_type),
        RoomKey::Club { club_id } => format!("/clubs/{}/chats", club_id),
    }
}

#[async_trait]
impl ChatApi for RestClient {
    async fn list_messages(
        &self,
        room: &RoomKey,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ChatMessage>> {
        let path = messages_path(room);

        // Club chats are served unpaginated
        let payload: MessagesPayload = match room {
            RoomKey::Event { .. } => {
                let query = [("page", page.to_string()), ("per_page", per_page.to_string())];
                self.get(&path, &query).await?
            }
            RoomKey::Club { .. } if page <= 1 => self.get(&path, &[]).await?,
            RoomKey::Club { .. } => return Ok(Vec::new()),
        };

        let messages = payload.into_messages();
        tracing::debug!(room = %room, page, count = messages.len(), "Fetched history page");
        Ok(messages)
    }

    async fn post_message(
        &self,
        room: &RoomKey,
        message: &str,
        reply_to: Option<MessageId>,
    ) -> Result<()> {
        let path = messages_path(room);
        let response = self
            .http
            .post(self.url(&path))
            .bearer_auth(&self.token)
            .json(&SendMessageRequest { message, reply_to })
            .send()
            .await
            .with_context(|| format!("Failed to send POST {}", path))?;

        read_body::<serde_json::Value>(response).await?.into_unit()
    }
}

#[async_trait]
impl NotificationApi for RestClient {
    async fn list_notifications(
        &self,
        page: u32,
        per_page: u32,
        unread_only: bool,
    ) -> Result<NotificationPage> {
        let query = [
            ("page", page.to_string()),
            ("per_page", per_page.to_string()),
            ("unread_only", unread_only.to_string()),
        ];
        self.get("/notifications", &query).await
    }

    async fn unread_count(&self) -> Result<u64> {
        let count: UnreadCount = self.get("/notifications/unread-count", &[]).await?;
        Ok(count.unread_count)
    }

    async fn mark_read(&self, id: u64) -> Result<()> {
        self.put(&format!("/notifications/{}/mark-read", id)).await
    }

    async fn mark_all_read(&self) -> Result<()> {
        self.put("/notifications/mark-all-read").await
    }

    async fn delete_notification(&self, id: u64) -> Result<()> {
        self.delete(&format!("/notifications/{}", id)).await
    }
}
