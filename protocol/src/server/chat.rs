use super::{ServerMessage, TypingUpdate, parse_user_id};
use crate::ParseError;
use crate::types::ChatMessage;
use anyhow::Result;
use serde_json::Value;

pub fn parse_new_message(data: Value) -> Result<ServerMessage> {
    let message: ChatMessage = serde_json::from_value(data)
        .map_err(|e| ParseError::InvalidFormat(format!("invalid chat message: {}", e)))?;

    Ok(ServerMessage::NewMessage(message))
}

pub fn parse_history(data: Value) -> Result<ServerMessage> {
    // {"messages": [...]} or a bare list
    let list = match data {
        Value::Array(list) => Value::Array(list),
        Value::Object(mut map) => map
            .remove("messages")
            .ok_or_else(|| ParseError::MissingField("messages".to_string()))?,
        _ => {
            return Err(ParseError::InvalidFormat("chat history must be a list".to_string()).into());
        }
    };

    let messages: Vec<ChatMessage> = serde_json::from_value(list)
        .map_err(|e| ParseError::InvalidFormat(format!("invalid chat history: {}", e)))?;

    Ok(ServerMessage::ChatHistory(messages))
}

pub fn parse_typing(data: &Value) -> Result<ServerMessage> {
    if let Some(users) = data.get("users") {
        let users = users
            .as_array()
            .ok_or_else(|| ParseError::InvalidFormat("typing users must be a list".to_string()))?
            .iter()
            .filter_map(parse_user_id)
            .collect();
        return Ok(ServerMessage::TypingUpdate(TypingUpdate::Users(users)));
    }

    let is_typing = data
        .get("is_typing")
        .or_else(|| data.get("isTyping"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if let Some(user_id) = data.get("user_id").and_then(parse_user_id) {
        return Ok(ServerMessage::TypingUpdate(TypingUpdate::User {
            user_id,
            is_typing,
        }));
    }

    if !is_typing {
        return Ok(ServerMessage::TypingUpdate(TypingUpdate::Cleared));
    }

    Err(ParseError::MissingField("typing users".to_string()).into())
}
