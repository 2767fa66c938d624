use super::ServerMessage;
use crate::ParseError;
use crate::types::Notification;
use anyhow::Result;
use serde_json::Value;

pub fn parse_new_notification(data: Value) -> Result<ServerMessage> {
    let notification: Notification = serde_json::from_value(data)
        .map_err(|e| ParseError::InvalidFormat(format!("invalid notification: {}", e)))?;

    Ok(ServerMessage::NewNotification(notification))
}

pub fn parse_unread_count(data: &Value) -> Result<ServerMessage> {
    let count = data
        .get("count")
        .or_else(|| data.get("unread_count"))
        .ok_or_else(|| ParseError::MissingField("count".to_string()))?
        .as_u64()
        .ok_or_else(|| ParseError::InvalidFormat("count must be a non-negative integer".to_string()))?;

    Ok(ServerMessage::UnreadCountUpdate { count })
}
