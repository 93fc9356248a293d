use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unordered pair of users, normalised so that `user1 < user2`.
///
/// Ordering compares the canonical string form of each id. Every place that
/// derives a match key or a conversation id goes through this type so the
/// rule cannot drift between the match store and the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub user1: Uuid,
    pub user2: Uuid,
}

impl PairKey {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a.to_string() <= b.to_string() {
            Self { user1: a, user2: b }
        } else {
            Self { user1: b, user2: a }
        }
    }

    /// `"<user1>_<user2>"`, identical regardless of which side is sending.
    pub fn conversation_id(&self) -> String {
        format!("{}_{}", self.user1, self.user2)
    }

    /// Parse a conversation id back into its pair. Rejects unsorted input so
    /// that only ids produced by [`PairKey::conversation_id`] round-trip.
    pub fn from_conversation_id(conversation_id: &str) -> Option<Self> {
        let (a, b) = conversation_id.split_once('_')?;
        let a: Uuid = a.parse().ok()?;
        let b: Uuid = b.parse().ok()?;
        let key = Self::new(a, b);
        (key.user1 == a && key.user2 == b && a != b).then_some(key)
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.user1 == user_id || self.user2 == user_id
    }

    /// The other member of the pair, or `None` if `user_id` is not a member.
    pub fn other(&self, user_id: Uuid) -> Option<Uuid> {
        if self.user1 == user_id {
            Some(self.user2)
        } else if self.user2 == user_id {
            Some(self.user1)
        } else {
            None
        }
    }

    pub fn is_user1(&self, user_id: Uuid) -> bool {
        self.user1 == user_id
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.conversation_id())
    }
}

pub fn conversation_id(a: Uuid, b: Uuid) -> String {
    PairKey::new(a, b).conversation_id()
}
