use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A conversation with its participant set hydrated.
/// Listings are ordered by `last_message_at` descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub name: Option<String>,
    pub is_group: bool,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<User>,
}

/// A message with sender and seen-set hydrated.
/// The seen-set only ever grows; the sender is in it from creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: User,
    pub body: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub seen: Vec<User>,
}

impl Message {
    pub fn seen_by(&self, user_id: Uuid) -> bool {
        self.seen.iter().any(|u| u.id == user_id)
    }
}
