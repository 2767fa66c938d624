use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use rally_protocol::rest::NotificationPage;
use rally_protocol::{ChatMessage, MessageId, Notification, RoomKey};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::api::{ChatApi, NotificationApi};
use crate::config::ClientConfig;
use crate::transport::{Connector, Transport};

pub fn config() -> ClientConfig {
    ClientConfig::new("http://rally.test")
}

pub fn message(id: u64, sender_id: u64, text: &str, minute: u32) -> ChatMessage {
    serde_json::from_value(json!({
        "id": id,
        "sender_id": sender_id,
        "sender_name": format!("user{}", sender_id),
        "message": text,
        "timestamp": format!("2024-05-01T{:02}:{:02}:00", 8 + minute / 60, minute % 60),
    }))
    .unwrap()
}

/// Messages with ids `first..first + count`, one minute apart
pub fn page(first: u64, count: u64) -> Vec<ChatMessage> {
    (first..first + count)
        .map(|id| message(id, 2, &format!("message {}", id), id as u32))
        .collect()
}

pub fn notification(id: u64, read: bool) -> Notification {
    serde_json::from_value(json!({
        "id": id,
        "message": format!("notification {}", id),
        "type": "event_update",
        "read": read,
    }))
    .unwrap()
}

/// Poll until the condition holds, letting paused time advance a little
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

pub struct MockTransport {
    to_server: Option<mpsc::UnboundedSender<String>>,
    from_server: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        match &self.to_server {
            Some(to_server) => to_server.send(text).map_err(|_| anyhow!("server went away")),
            None => bail!("transport closed"),
        }
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<()> {
        self.to_server = None;
        self.from_server.close();
        Ok(())
    }
}

/// The server side of one accepted connection
pub struct ServerEnd {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
}

impl ServerEnd {
    /// Next frame from the client; `None` once it hung up or went quiet for a minute
    pub async fn next(&mut self) -> Option<Value> {
        let frame = tokio::time::timeout(Duration::from_secs(60), self.incoming.recv())
            .await
            .ok()??;
        Some(serde_json::from_str(&frame).unwrap())
    }

    pub async fn expect(&mut self, event: &str) -> Value {
        let frame = self
            .next()
            .await
            .unwrap_or_else(|| panic!("expected {}, got nothing", event));
        assert_eq!(frame["event"], event, "unexpected frame {}", frame);
        frame
    }

    /// A frame already sent, without waiting
    pub fn try_next(&mut self) -> Option<Value> {
        self.incoming
            .try_recv()
            .ok()
            .map(|frame| serde_json::from_str(&frame).unwrap())
    }

    pub fn emit(&self, event: &str, data: Value) {
        self.raw(json!({ "event": event, "data": data }).to_string());
    }

    pub fn ack(&self, id: &Value, data: Value) {
        self.raw(json!({ "ack": id, "data": data }).to_string());
    }

    pub fn raw(&self, frame: String) {
        if let Some(outgoing) = &self.outgoing {
            let _ = outgoing.send(frame);
        }
    }

    /// Drop the connection from the server side
    pub fn hang_up(&mut self) {
        self.outgoing = None;
    }

    /// Accept the client's authentication; returns its frame
    pub async fn handshake(&mut self, user_id: u64) -> Value {
        let frame = self.expect("authenticate").await;
        self.emit("authenticated", json!({ "user_id": user_id }));
        frame
    }
}

enum Scripted {
    Accept(MockTransport),
    Refuse,
    /// Never completes
    Stall,
}

/// Hands out scripted connections in order; refuses once the script runs out
#[derive(Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<Scripted>>,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accept(&self) -> ServerEnd {
        let (to_server, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_server) = mpsc::unbounded_channel();

        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Accept(MockTransport {
                to_server: Some(to_server),
                from_server,
            }));

        ServerEnd {
            incoming,
            outgoing: Some(outgoing),
        }
    }

    pub fn refuse(&self) {
        self.script.lock().unwrap().push_back(Scripted::Refuse);
    }

    pub fn stall(&self) {
        self.script.lock().unwrap().push_back(Scripted::Stall);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Accept(transport)) => Ok(Box::new(transport)),
            Some(Scripted::Stall) => std::future::pending().await,
            Some(Scripted::Refuse) | None => bail!("connection refused"),
        }
    }
}

#[derive(Default)]
pub struct FakeChatApi {
    pages: Mutex<HashMap<(RoomKey, u32), Vec<ChatMessage>>>,
    calls: Mutex<Vec<(RoomKey, u32, u32)>>,
    posted: Mutex<Vec<(RoomKey, String)>>,
    delay: Mutex<Duration>,
    fail: AtomicBool,
}

impl FakeChatApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_page(&self, room: &RoomKey, page: u32, messages: Vec<ChatMessage>) {
        self.pages
            .lock()
            .unwrap()
            .insert((room.clone(), page), messages);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(RoomKey, u32, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn posted(&self) -> Vec<(RoomKey, String)> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn list_messages(
        &self,
        room: &RoomKey,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ChatMessage>> {
        self.calls.lock().unwrap().push((room.clone(), page, per_page));

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            bail!("HTTP 500 Internal Server Error");
        }

        let pages = self.pages.lock().unwrap();
        Ok(pages.get(&(room.clone(), page)).cloned().unwrap_or_default())
    }

    async fn post_message(
        &self,
        room: &RoomKey,
        message: &str,
        _reply_to: Option<MessageId>,
    ) -> Result<()> {
        self.posted
            .lock()
            .unwrap()
            .push((room.clone(), message.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotificationApi {
    notifications: Mutex<Vec<Notification>>,
    unread: AtomicU64,
    fail_marking: AtomicBool,
    list_calls: AtomicUsize,
    unread_calls: AtomicUsize,
    marked: Mutex<Vec<u64>>,
    deleted: Mutex<Vec<u64>>,
}

impl FakeNotificationApi {
    pub fn with(notifications: Vec<Notification>) -> Arc<Self> {
        let unread = notifications.iter().filter(|n| !n.read).count() as u64;
        let api = Self::default();
        *api.notifications.lock().unwrap() = notifications;
        api.unread.store(unread, Ordering::SeqCst);
        Arc::new(api)
    }

    pub fn set_unread(&self, count: u64) {
        self.unread.store(count, Ordering::SeqCst);
    }

    pub fn set_failing_marks(&self, fail: bool) {
        self.fail_marking.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn unread_calls(&self) -> usize {
        self.unread_calls.load(Ordering::SeqCst)
    }

    pub fn marked(&self) -> Vec<u64> {
        self.marked.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<u64> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationApi for FakeNotificationApi {
    async fn list_notifications(
        &self,
        page: u32,
        _per_page: u32,
        unread_only: bool,
    ) -> Result<NotificationPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let notifications: Vec<Notification> = self
            .notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|n| !unread_only || !n.read)
            .cloned()
            .collect();

        Ok(NotificationPage {
            total: notifications.len() as u64,
            notifications,
            pages: 1,
            current_page: page,
            has_next: false,
            has_prev: false,
        })
    }

    async fn unread_count(&self) -> Result<u64> {
        self.unread_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.unread.load(Ordering::SeqCst))
    }

    async fn mark_read(&self, id: u64) -> Result<()> {
        if self.fail_marking.load(Ordering::SeqCst) {
            bail!("HTTP 500 Internal Server Error");
        }
        self.marked.lock().unwrap().push(id);

        let mut notifications = self.notifications.lock().unwrap();
        if let Some(n) = notifications.iter_mut().find(|n| n.id == id && !n.read) {
            n.read = true;
            let _ = self
                .unread
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
        }
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<()> {
        if self.fail_marking.load(Ordering::SeqCst) {
            bail!("HTTP 500 Internal Server Error");
        }
        for n in self.notifications.lock().unwrap().iter_mut() {
            n.read = true;
        }
        self.unread.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_notification(&self, id: u64) -> Result<()> {
        self.deleted.lock().unwrap().push(id);

        let mut notifications = self.notifications.lock().unwrap();
        if notifications.iter().any(|n| n.id == id && !n.read) {
            let _ = self
                .unread
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1));
        }
        notifications.retain(|n| n.id != id);
        Ok(())
    }
}
