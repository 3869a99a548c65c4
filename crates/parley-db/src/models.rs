//! Database row types — these map directly to SQLite rows.
//! Distinct from the parley-types domain models to keep the store layer
//! independent; conversion to domain models happens here so the parsing
//! fallbacks live in one place.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_types::models::User;

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub image: Option<String>,
    pub password: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    pub pair_key: Option<String>,
    pub last_message_at: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: Option<String>,
    pub image: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn into_user(self) -> User {
        User {
            id: parse_uuid(&self.id, "user id"),
            email: self.email,
            name: self.name,
            image: self.image,
            created_at: parse_timestamp(&self.created_at, &self.id),
        }
    }
}

pub fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

/// Timestamps are written as RFC 3339, but tolerate SQLite's bare
/// "YYYY-MM-DD HH:MM:SS" form by parsing it as naive UTC.
pub fn parse_timestamp(raw: &str, row_id: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on row '{}': {}", raw, row_id, e);
            DateTime::default()
        })
}
