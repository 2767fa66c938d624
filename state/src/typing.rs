//! TypingUsers - who else is typing in a room

use std::collections::BTreeSet;

use rally_protocol::{TypingUpdate, UserId};

/// Set of users currently typing in the active room.
///
/// The server is the source of truth: list updates replace the set wholesale.
/// Our own id is never reported, even if the server echoes it back.
#[derive(Debug, Clone, Default)]
pub struct TypingUsers {
    own_id: Option<UserId>,
    users: BTreeSet<UserId>,
}

impl TypingUsers {
    pub fn new(own_id: Option<UserId>) -> Self {
        Self {
            own_id,
            users: BTreeSet::new(),
        }
    }

    /// Set our own id (known once the server confirms authentication)
    pub fn set_own_id(&mut self, own_id: UserId) {
        self.own_id = Some(own_id);
        self.users.remove(&own_id);
    }

    pub fn own_id(&self) -> Option<UserId> {
        self.own_id
    }

    /// Apply a server update, returning whether the visible set changed
    pub fn apply(&mut self, update: &TypingUpdate) -> bool {
        let before = self.users.clone();

        match update {
            TypingUpdate::Users(users) => {
                self.users = users
                    .iter()
                    .copied()
                    .filter(|id| Some(*id) != self.own_id)
                    .collect();
            }
            TypingUpdate::User { user_id, is_typing } => {
                if Some(*user_id) != self.own_id {
                    if *is_typing {
                        self.users.insert(*user_id);
                    } else {
                        self.users.remove(user_id);
                    }
                }
            }
            TypingUpdate::Cleared => self.users.clear(),
        }

        before != self.users
    }

    /// Users typing, in ascending id order
    pub fn users(&self) -> Vec<UserId> {
        self.users.iter().copied().collect()
    }

    pub fn is_typing(&self, user_id: UserId) -> bool {
        self.users.contains(&user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}
