use async_trait::async_trait;
use rally_protocol::{ChatMessage, Notification, RoomKey, UserId};
use serde_json::Value;

use crate::connection::ConnectionStatus;
use crate::error::ChatError;

/// Trait for reacting to chat and notification events.
///
/// Implement this trait and hand it to [`EventReceiver::run`](crate::EventReceiver::run).
/// All methods have default no-op implementations, so you only need to
/// implement the events you care about.
///
/// # Example
///
/// ```ignore
/// struct Badge {
///     unread: u64,
/// }
///
/// #[async_trait]
/// impl Handler for Badge {
///     async fn on_unread_count(&mut self, count: u64) {
///         self.unread = count;
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send {
    /// Called whenever the connection status changes.
    async fn on_status(&mut self, status: &ConnectionStatus) {
        let _ = status;
    }

    /// Called when the server accepts the session token.
    async fn on_authenticated(&mut self, user_id: Option<UserId>) {
        let _ = user_id;
    }

    /// Called for asynchronous failures: auth rejection, transport drops,
    /// history loads and server `error` events.
    async fn on_error(&mut self, error: &ChatError) {
        let _ = error;
    }

    /// Called when a join for the active room has been sent.
    async fn on_room_joined(&mut self, room: &RoomKey) {
        let _ = room;
    }

    /// Called when the active room is left or switched away from.
    async fn on_room_left(&mut self, room: &RoomKey) {
        let _ = room;
    }

    /// Called for each message newly added to the active room.
    async fn on_message(&mut self, room: &RoomKey, message: &ChatMessage) {
        let _ = (room, message);
    }

    /// Called when a history page has been merged into the store.
    async fn on_history_loaded(&mut self, room: &RoomKey, page: u32, added: usize) {
        let _ = (room, page, added);
    }

    /// Called when the set of other users typing changes.
    async fn on_typing(&mut self, room: &RoomKey, users: &[UserId]) {
        let _ = (room, users);
    }

    /// Called for each pushed notification not seen before.
    async fn on_notification(&mut self, notification: &Notification) {
        let _ = notification;
    }

    /// Called whenever the unread counter changes.
    async fn on_unread_count(&mut self, count: u64) {
        let _ = count;
    }

    /// Called for club announcements.
    async fn on_club_notification(&mut self, payload: &Value) {
        let _ = payload;
    }

    /// Called after the notification list has been refetched.
    async fn on_notifications_refreshed(&mut self) {}
}
