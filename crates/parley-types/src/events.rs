use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// The single shared presence topic. Every connected client subscribes to it;
/// membership of the topic is what "online" means.
pub const PRESENCE_TOPIC: &str = "presence";

/// A conversation's broadcast topic is its id rendered as a string.
pub fn conversation_topic(conversation_id: Uuid) -> String {
    conversation_id.to_string()
}

/// A user's personal topic is their email — the stable identity token
/// clients already know for every participant they can see.
pub fn personal_topic(email: &str) -> String {
    email.to_string()
}

// Event names carried on topics.
pub const CONVERSATION_NEW: &str = "conversation:new";
pub const CONVERSATION_UPDATE: &str = "conversation:update";
pub const MESSAGES_NEW: &str = "messages:new";
pub const MESSAGE_UPDATE: &str = "message:update";
pub const MEMBER_ADDED: &str = "member_added";
pub const MEMBER_REMOVED: &str = "member_removed";
pub const PRESENCE_SNAPSHOT: &str = "presence:snapshot";

/// Payload of `conversation:update`: the single most-recent message, wrapped
/// in a one-element list so clients can append it to their local sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationUpdate {
    pub id: Uuid,
    pub last_message: Vec<Message>,
}

/// Payload of the personal `conversation:update` sent after a mark-seen:
/// the updated message(s), keyed to the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenUpdate {
    pub id: Uuid,
    pub messages: Vec<Message>,
}

/// Payload of `presence:snapshot`: the full roster at subscription time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub online: Vec<Uuid>,
}

/// Payload of `member_added` / `member_removed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceMember {
    pub user_id: Uuid,
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection.
    Identify { token: String },

    /// Replace the set of conversation topics this connection receives.
    /// The personal and presence topics are always attached.
    Subscribe { conversation_ids: Vec<Uuid> },
}

/// Frames sent FROM server TO client over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayFrame {
    /// Server confirms successful authentication.
    Ready { user_id: Uuid, email: String },

    /// An event relayed from a subscribed topic.
    Event {
        topic: String,
        event: String,
        payload: serde_json::Value,
    },
}

impl ConversationUpdate {
    pub fn new(conversation_id: Uuid, last_message: Message) -> Self {
        Self {
            id: conversation_id,
            last_message: vec![last_message],
        }
    }
}
