//! MessageStore - ordered, deduplicated chat history

use rally_protocol::{ChatMessage, MessageId};

/// Messages requested per history page
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Chat history of a single room.
///
/// History pages and live pushes can race each other and can deliver the same
/// message twice. Every insertion goes through [`merge`](Self::merge), which
/// drops duplicates (see [`ChatMessage::is_same_as`]) and keeps the list sorted
/// ascending by timestamp. Messages with equal timestamps keep arrival order.
#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
    page_size: u32,
    /// Next history page to request (1-based)
    next_page: u32,
    has_more: bool,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            messages: Vec::new(),
            page_size: page_size.max(1),
            next_page: 1,
            has_more: true,
        }
    }

    /// Messages in ascending timestamp order
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, message: &ChatMessage) -> bool {
        self.messages.iter().any(|m| m.is_same_as(message))
    }

    pub fn find(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == Some(id))
    }

    /// Insert a message at its sorted position.
    ///
    /// Returns `false` if the store already holds the same message.
    pub fn merge(&mut self, message: ChatMessage) -> bool {
        if self.contains(&message) {
            return false;
        }

        let pos = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(pos, message);
        true
    }

    /// Merge many messages, returning how many were new
    pub fn merge_all(&mut self, messages: impl IntoIterator<Item = ChatMessage>) -> usize {
        let mut added = 0;
        for message in messages {
            if self.merge(message) {
                added += 1;
            }
        }
        added
    }

    /// Record the size of a loaded history page.
    ///
    /// A page shorter than the page size means there is no older history.
    pub fn record_page(&mut self, page: u32, loaded: usize) {
        if page >= self.next_page {
            self.next_page = page + 1;
            self.has_more = loaded >= self.page_size as usize;
        }
    }

    pub fn next_page(&self) -> u32 {
        self.next_page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Whether older history may still be available
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Drop all messages and reset pagination
    pub fn clear(&mut self) {
        self.messages.clear();
        self.next_page = 1;
        self.has_more = true;
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
