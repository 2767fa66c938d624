//! NotificationStore - notifications and the unread counter

use rally_protocol::Notification;

/// Local notification list plus the unread counter.
///
/// The counter is a scalar of its own rather than a count over the list: the
/// list holds one page at most, and the server may announce an authoritative
/// value at any time through [`set_unread_count`](Self::set_unread_count).
#[derive(Debug, Clone, Default)]
pub struct NotificationStore {
    items: Vec<Notification>,
    unread_count: u64,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest first
    pub fn notifications(&self) -> &[Notification] {
        &self.items
    }

    pub fn get(&self, id: u64) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    /// Unread notifications among the locally held ones
    pub fn local_unread(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    /// A pushed notification. Returns `false` for an id already held.
    pub fn push(&mut self, notification: Notification) -> bool {
        if self.get(notification.id).is_some() {
            return false;
        }

        if !notification.read {
            self.unread_count += 1;
        }
        self.items.insert(0, notification);
        true
    }

    /// Server authoritative count; always wins over the local value
    pub fn set_unread_count(&mut self, count: u64) {
        self.unread_count = count;
    }

    /// Replace the list with a freshly fetched page
    pub fn replace(&mut self, notifications: Vec<Notification>) {
        self.items = notifications;
    }

    /// Flip one notification to read. Returns whether it was unread.
    pub fn mark_read(&mut self, id: u64) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                self.unread_count = self.unread_count.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for n in &mut self.items {
            n.read = true;
        }
        self.unread_count = 0;
    }

    pub fn remove(&mut self, id: u64) -> Option<Notification> {
        let pos = self.items.iter().position(|n| n.id == id)?;
        let removed = self.items.remove(pos);
        if !removed.read {
            self.unread_count = self.unread_count.saturating_sub(1);
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.unread_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notification(id: u64, read: bool) -> Notification {
        serde_json::from_value(json!({ "id": id, "message": "m", "read": read })).unwrap()
    }

    #[test]
    fn test_push_prepends_and_counts_unread() {
        let mut store = NotificationStore::new();

        store.push(notification(1, false));
        store.push(notification(2, true));
        store.push(notification(3, false));

        let ids: Vec<_> = store.notifications().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn test_push_duplicate_id() {
        let mut store = NotificationStore::new();

        assert!(store.push(notification(1, false)));
        assert!(!store.push(notification(1, false)));
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn test_server_count_overwrites() {
        let mut store = NotificationStore::new();
        store.push(notification(1, false));
        store.push(notification(2, false));

        store.set_unread_count(9);
        assert_eq!(store.unread_count(), 9);

        store.set_unread_count(0);
        assert_eq!(store.unread_count(), 0);
        assert_eq!(store.local_unread(), 2);
    }

    #[test]
    fn test_mark_read() {
        let mut store = NotificationStore::new();
        store.push(notification(1, false));

        assert!(store.mark_read(1));
        assert!(!store.mark_read(1));
        assert!(!store.mark_read(99));
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_mark_read_never_underflows() {
        let mut store = NotificationStore::new();
        store.replace(vec![notification(1, false)]);

        assert!(store.mark_read(1));
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn test_mark_all_read() {
        let mut store = NotificationStore::new();
        store.push(notification(1, false));
        store.push(notification(2, false));

        store.mark_all_read();

        assert_eq!(store.unread_count(), 0);
        assert!(store.notifications().iter().all(|n| n.read));
    }

    #[test]
    fn test_remove() {
        let mut store = NotificationStore::new();
        store.push(notification(1, false));
        store.push(notification(2, true));

        assert!(store.remove(2).is_some());
        assert_eq!(store.unread_count(), 1);
        assert!(store.remove(1).is_some());
        assert_eq!(store.unread_count(), 0);
        assert!(store.remove(1).is_none());
    }
}
