use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use parley_db::models::{ConversationRow, MessageRow, UserRow, parse_timestamp, parse_uuid};
use parley_db::{Database, pair_key};
use parley_types::models::{Conversation, Message, User};

use crate::broker::Broker;
use crate::error::SyncError;
use crate::fanout::FanoutRouter;

/// Orchestrates the domain operations against the repository and drives the
/// fanout router. Safe to call concurrently; writes to the same conversation
/// serialize on the store. All methods block on the store and are expected
/// to run off the async runtime (`spawn_blocking` in the REST layer).
pub struct SyncService<B: Broker> {
    db: Arc<Database>,
    fanout: FanoutRouter<B>,
}

impl<B: Broker> SyncService<B> {
    pub fn new(db: Arc<Database>, broker: Arc<B>) -> Self {
        Self {
            db,
            fanout: FanoutRouter::new(broker),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Find or create the one-to-one conversation between two users.
    /// Matching is order-independent (normalized pair key), reuse is
    /// idempotent and emits no fanout. A concurrent create for the same pair
    /// converges on the winning row via the store's uniqueness constraint,
    /// in which case no fanout fires either.
    pub fn create_or_reuse_conversation(
        &self,
        initiator_id: Uuid,
        target_id: Uuid,
    ) -> Result<Conversation, SyncError> {
        if initiator_id == target_id {
            return Err(SyncError::Validation(
                "cannot start a conversation with yourself".into(),
            ));
        }
        if self.db.get_user_by_id(&target_id.to_string())?.is_none() {
            return Err(SyncError::NotFound("user"));
        }

        let key = pair_key(initiator_id, target_id);
        if let Some(existing) = self.db.find_direct_conversation(&key)? {
            debug!("Reusing conversation {} for pair {}", existing.id, key);
            return self.hydrate_conversation(existing);
        }

        let now = Utc::now().to_rfc3339();
        let (row, created) = self.db.create_direct_conversation(
            &Uuid::new_v4().to_string(),
            &initiator_id.to_string(),
            &target_id.to_string(),
            &key,
            &now,
        )?;

        let conversation = self.hydrate_conversation(row)?;
        if created {
            self.fanout.conversation_created(&conversation);
        }
        Ok(conversation)
    }

    /// Create a group conversation. Participants are the given members plus
    /// the initiator, deduplicated. Validation failures reject before any
    /// write.
    pub fn create_group_conversation(
        &self,
        initiator_id: Uuid,
        member_ids: &[Uuid],
        name: &str,
    ) -> Result<Conversation, SyncError> {
        if member_ids.len() < 2 {
            return Err(SyncError::Validation(
                "a group needs at least two other members".into(),
            ));
        }
        if name.trim().is_empty() {
            return Err(SyncError::Validation("a group needs a name".into()));
        }

        let mut participants: BTreeSet<Uuid> = member_ids.iter().copied().collect();
        participants.insert(initiator_id);
        for id in &participants {
            if self.db.get_user_by_id(&id.to_string())?.is_none() {
                return Err(SyncError::NotFound("user"));
            }
        }

        let ids: Vec<String> = participants.iter().map(Uuid::to_string).collect();
        let now = Utc::now().to_rfc3339();
        let row = self.db.create_group_conversation(
            &Uuid::new_v4().to_string(),
            name.trim(),
            &ids,
            &now,
        )?;

        let conversation = self.hydrate_conversation(row)?;
        self.fanout.conversation_created(&conversation);
        Ok(conversation)
    }

    /// Append a message to a conversation. The repository writes are
    /// sequenced create-message then bump-conversation; fanout only runs
    /// once both committed, `messages:new` strictly before the
    /// per-participant `conversation:update`s.
    pub fn send_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        body: Option<String>,
        image: Option<String>,
    ) -> Result<Message, SyncError> {
        if body.as_deref().is_none_or(str::is_empty) && image.is_none() {
            return Err(SyncError::Validation(
                "a message needs a body or an image".into(),
            ));
        }

        let cid = conversation_id.to_string();
        if self.db.get_conversation(&cid)?.is_none() {
            return Err(SyncError::NotFound("conversation"));
        }
        if !self.db.is_participant(&cid, &sender_id.to_string())? {
            return Err(SyncError::Forbidden);
        }

        let message_id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        self.db.insert_message(
            &message_id.to_string(),
            &cid,
            &sender_id.to_string(),
            body.as_deref(),
            image.as_deref(),
            &now,
        )?;
        self.db.update_conversation_last_message(&cid, &now)?;

        let message = self.hydrate_message_by_id(&message_id.to_string())?;
        let participants = self.participants(&cid)?;

        self.fanout.message_created(&message);
        self.fanout
            .conversation_updated(conversation_id, &participants, &message);

        Ok(message)
    }

    /// Mark the conversation's most recent message as seen by `user_id`.
    /// Monotone and idempotent; fanout fires only when the seen-set actually
    /// grew. Returns the (possibly updated) last message, or `None` for an
    /// empty conversation.
    pub fn mark_seen(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Message>, SyncError> {
        let cid = conversation_id.to_string();
        if self.db.get_conversation(&cid)?.is_none() {
            return Err(SyncError::NotFound("conversation"));
        }
        if !self.db.is_participant(&cid, &user_id.to_string())? {
            return Err(SyncError::Forbidden);
        }

        let Some(last) = self.db.latest_message(&cid)? else {
            return Ok(None);
        };

        let newly_seen = self.db.mark_message_seen(&last.id, &user_id.to_string())?;
        let message = self.hydrate_message(last)?;

        if newly_seen {
            let viewer = self
                .db
                .get_user_by_id(&user_id.to_string())?
                .ok_or(SyncError::NotFound("user"))?;
            self.fanout.message_seen(&viewer.email, &message);
        }

        Ok(Some(message))
    }

    // -- Reads used by the REST surface --

    /// The user's conversations, participants hydrated, most recently
    /// active first.
    pub fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>, SyncError> {
        let rows = self.db.list_conversations_for_user(&user_id.to_string())?;
        rows.into_iter()
            .map(|row| self.hydrate_conversation(row))
            .collect()
    }

    pub fn get_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Conversation, SyncError> {
        let cid = conversation_id.to_string();
        let row = self
            .db
            .get_conversation(&cid)?
            .ok_or(SyncError::NotFound("conversation"))?;
        if !self.db.is_participant(&cid, &user_id.to_string())? {
            return Err(SyncError::Forbidden);
        }
        self.hydrate_conversation(row)
    }

    /// Chronological message history with sender and seen-set hydrated.
    pub fn conversation_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, SyncError> {
        let cid = conversation_id.to_string();
        if self.db.get_conversation(&cid)?.is_none() {
            return Err(SyncError::NotFound("conversation"));
        }
        if !self.db.is_participant(&cid, &user_id.to_string())? {
            return Err(SyncError::Forbidden);
        }
        let rows = self.db.get_messages(&cid)?;
        rows.into_iter().map(|row| self.hydrate_message(row)).collect()
    }

    // -- Hydration --

    fn participants(&self, conversation_id: &str) -> Result<Vec<User>, SyncError> {
        let rows = self.db.conversation_participants(conversation_id)?;
        Ok(rows.into_iter().map(UserRow::into_user).collect())
    }

    fn hydrate_conversation(&self, row: ConversationRow) -> Result<Conversation, SyncError> {
        let participants = self.participants(&row.id)?;
        Ok(Conversation {
            id: parse_uuid(&row.id, "conversation id"),
            name: row.name,
            is_group: row.is_group,
            last_message_at: parse_timestamp(&row.last_message_at, &row.id),
            created_at: parse_timestamp(&row.created_at, &row.id),
            participants,
        })
    }

    fn hydrate_message_by_id(&self, message_id: &str) -> Result<Message, SyncError> {
        let row = self
            .db
            .get_message(message_id)?
            .ok_or(SyncError::NotFound("message"))?;
        self.hydrate_message(row)
    }

    fn hydrate_message(&self, row: MessageRow) -> Result<Message, SyncError> {
        let sender = self
            .db
            .get_user_by_id(&row.sender_id)?
            .ok_or(SyncError::NotFound("sender"))?
            .into_user();
        let seen = self
            .db
            .message_seen_users(&row.id)?
            .into_iter()
            .map(UserRow::into_user)
            .collect();
        Ok(Message {
            id: parse_uuid(&row.id, "message id"),
            conversation_id: parse_uuid(&row.conversation_id, "conversation id"),
            sender,
            body: row.body,
            image: row.image,
            created_at: parse_timestamp(&row.created_at, &row.id),
            seen,
        })
    }
}
