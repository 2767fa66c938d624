use anyhow::Result;
use async_trait::async_trait;
use rally_client::{
    ChatConnection, ChatError, ChatMessage, ClientConfig, ConnectionStatus, Handler,
    NotificationStream, RoomKey, Session, UserId,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

struct Printer;

#[async_trait]
impl Handler for Printer {
    async fn on_status(&mut self, status: &ConnectionStatus) {
        println!("* {:?}", status.state);
    }

    async fn on_error(&mut self, error: &ChatError) {
        println!("! {}", error);
    }

    async fn on_room_joined(&mut self, room: &RoomKey) {
        println!("* Joined {}", room);
    }

    async fn on_message(&mut self, _room: &RoomKey, message: &ChatMessage) {
        println!("[{}] {}: {}", message.timestamp.format("%H:%M"), message.sender_name, message.message);
    }

    async fn on_history_loaded(&mut self, _room: &RoomKey, page: u32, added: usize) {
        println!("* Page {} loaded, {} new messages", page, added);
    }

    async fn on_typing(&mut self, _room: &RoomKey, users: &[UserId]) {
        if !users.is_empty() {
            println!("* Typing: {:?}", users);
        }
    }

    async fn on_unread_count(&mut self, count: u64) {
        println!("* {} unread notifications", count);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let token = std::env::var("RALLY_TOKEN")?;
    let event_id: u64 = std::env::var("RALLY_EVENT_ID")
        .unwrap_or_else(|_| "1".to_string())
        .parse()?;
    let chat_type = std::env::var("RALLY_CHAT_TYPE").unwrap_or_else(|_| "attendee_only".to_string());

    let config = ClientConfig::from_env();
    let session = Session::new(token);

    println!("Connecting to {}...", config.socket_url);
    let chat = ChatConnection::connect(&config, &session, Some(RoomKey::event(event_id, chat_type.as_str())))?;
    let notifications = NotificationStream::connect(&config, &session)?;

    let mut chat_events = chat.events();
    tokio::spawn(async move { chat_events.run(&mut Printer).await });
    let mut notification_events = notifications.events();
    tokio::spawn(async move { notification_events.run(&mut Printer).await });

    println!("Type a message and press enter; /more loads older history, /quit exits");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/more" => match chat.load_more().await {
                Ok(outcome) => println!("* {:?}", outcome),
                Err(e) => println!("! {}", e),
            },
            "" => {}
            body => {
                chat.set_typing(true)?;
                if let Err(e) = chat.send_message(body, None).await {
                    println!("! Not sent: {}", e);
                }
                chat.set_typing(false)?;
            }
        }
    }

    chat.close().await;
    notifications.close().await;
    println!("Connection closed");
    Ok(())
}
