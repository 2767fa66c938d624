//! Request and response bodies of the REST API

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, MessageId, Notification};

/// Standard response envelope: `{success, data, message, error}`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub success: Option<bool>,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the payload, failing on `success: false`, an `error` field, or missing data
    pub fn into_data(self) -> Result<T> {
        if let Some(error) = self.error {
            bail!("Request failed: {}", error);
        }

        if self.success == Some(false) {
            bail!(
                "Request failed: {}",
                self.message.as_deref().unwrap_or("server reported failure")
            );
        }

        match self.data {
            Some(data) => Ok(data),
            None => bail!("Response missing data"),
        }
    }

    /// Like [`into_data`](Self::into_data) for endpoints whose data is irrelevant
    pub fn into_unit(self) -> Result<()> {
        if let Some(error) = self.error {
            bail!("Request failed: {}", error);
        }

        if self.success == Some(false) {
            bail!(
                "Request failed: {}",
                self.message.as_deref().unwrap_or("server reported failure")
            );
        }

        Ok(())
    }
}

/// Chat message listings come either wrapped or as a bare list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessagesPayload {
    Page { messages: Vec<ChatMessage> },
    List(Vec<ChatMessage>),
}

impl MessagesPayload {
    pub fn into_messages(self) -> Vec<ChatMessage> {
        match self {
            MessagesPayload::Page { messages } | MessagesPayload::List(messages) => messages,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationPage {
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub current_page: u32,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub has_prev: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct UnreadCount {
    pub unread_count: u64,
}

/// Body of the REST send fallback
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest<'a> {
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}
