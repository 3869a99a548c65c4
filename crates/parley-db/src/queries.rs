use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{ConversationRow, MessageRow, UserRow};
use crate::{Database, StoreError};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        name: &str,
        password_hash: &str,
        now: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, name, password, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, email, name, password_hash, now],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// All users except the caller, newest first — the directory used to
    /// start conversations.
    pub fn list_users_except(&self, user_id: &str) -> Result<Vec<UserRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, name, image, password, created_at
                 FROM users WHERE id != ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_user_profile(
        &self,
        id: &str,
        name: Option<&str>,
        image: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET name = COALESCE(?2, name), image = COALESCE(?3, image)
                 WHERE id = ?1",
                params![id, name, image],
            )?;
            Ok(())
        })
    }

    // -- Conversations --

    pub fn find_direct_conversation(
        &self,
        pair_key: &str,
    ) -> Result<Option<ConversationRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, is_group, pair_key, last_message_at, created_at
                     FROM conversations WHERE pair_key = ?1",
                    [pair_key],
                    conversation_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Insert a direct conversation and its two participant rows in one
    /// transaction. If another writer already created a conversation for the
    /// same pair, the `pair_key` uniqueness fires and the winning row is
    /// returned instead — the second element says whether a row was created.
    pub fn create_direct_conversation(
        &self,
        id: &str,
        user_a: &str,
        user_b: &str,
        pair_key: &str,
        now: &str,
    ) -> Result<(ConversationRow, bool), StoreError> {
        let inserted = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, is_group, pair_key, last_message_at, created_at)
                 VALUES (?1, 0, ?2, ?3, ?3)",
                params![id, pair_key, now],
            )?;
            for uid in [user_a, user_b] {
                tx.execute(
                    "INSERT INTO conversation_users (conversation_id, user_id) VALUES (?1, ?2)",
                    params![id, uid],
                )?;
            }
            tx.commit()?;
            Ok(())
        });

        match inserted {
            Ok(()) => Ok((
                ConversationRow {
                    id: id.to_string(),
                    name: None,
                    is_group: false,
                    pair_key: Some(pair_key.to_string()),
                    last_message_at: now.to_string(),
                    created_at: now.to_string(),
                },
                true,
            )),
            Err(e) if e.is_constraint_violation() => {
                // Lost the check-then-create race; converge on the winner.
                let existing = self.find_direct_conversation(pair_key)?.ok_or_else(|| {
                    StoreError::Conflict(format!("pair {pair_key} conflicted but is absent"))
                })?;
                Ok((existing, false))
            }
            Err(e) => Err(e),
        }
    }

    pub fn create_group_conversation(
        &self,
        id: &str,
        name: &str,
        member_ids: &[String],
        now: &str,
    ) -> Result<ConversationRow, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, name, is_group, last_message_at, created_at)
                 VALUES (?1, ?2, 1, ?3, ?3)",
                params![id, name, now],
            )?;
            for uid in member_ids {
                tx.execute(
                    "INSERT INTO conversation_users (conversation_id, user_id) VALUES (?1, ?2)",
                    params![id, uid],
                )?;
            }
            tx.commit()?;
            Ok(ConversationRow {
                id: id.to_string(),
                name: Some(name.to_string()),
                is_group: true,
                pair_key: None,
                last_message_at: now.to_string(),
                created_at: now.to_string(),
            })
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, is_group, pair_key, last_message_at, created_at
                     FROM conversations WHERE id = ?1",
                    [id],
                    conversation_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// The caller's conversations, most recently active first.
    pub fn list_conversations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.is_group, c.pair_key, c.last_message_at, c.created_at
                 FROM conversations c
                 JOIN conversation_users cu ON cu.conversation_id = c.id
                 WHERE cu.user_id = ?1
                 ORDER BY c.last_message_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], conversation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn conversation_participants(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<UserRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.email, u.name, u.image, u.password, u.created_at
                 FROM users u
                 JOIN conversation_users cu ON cu.user_id = u.id
                 WHERE cu.conversation_id = ?1",
            )?;
            let rows = stmt
                .query_map([conversation_id], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM conversation_users
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    params![conversation_id, user_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn update_conversation_last_message(
        &self,
        conversation_id: &str,
        timestamp: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET last_message_at = ?2 WHERE id = ?1",
                params![conversation_id, timestamp],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    /// Insert the message and the sender's seen row in one transaction, so
    /// a created message is never observable without its self-seen mark.
    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        body: Option<&str>,
        image: Option<&str>,
        now: &str,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, body, image, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, conversation_id, sender_id, body, image, now],
            )?;
            tx.execute(
                "INSERT INTO message_seen (message_id, user_id) VALUES (?1, ?2)",
                params![id, sender_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, conversation_id, sender_id, body, image, created_at
                     FROM messages WHERE id = ?1",
                    [id],
                    message_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Chronological message history for a conversation.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, body, image, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([conversation_id], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn latest_message(
        &self,
        conversation_id: &str,
    ) -> Result<Option<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, conversation_id, sender_id, body, image, created_at
                     FROM messages WHERE conversation_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    [conversation_id],
                    message_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Add a viewer to a message's seen-set. `INSERT OR IGNORE` makes this
    /// monotone and idempotent; returns whether the viewer was newly added.
    pub fn mark_message_seen(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO message_seen (message_id, user_id) VALUES (?1, ?2)",
                params![message_id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn message_seen_users(&self, message_id: &str) -> Result<Vec<UserRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.email, u.name, u.image, u.password, u.created_at
                 FROM users u
                 JOIN message_seen ms ON ms.user_id = u.id
                 WHERE ms.message_id = ?1",
            )?;
            let rows = stmt
                .query_map([message_id], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>, StoreError> {
    let sql = format!(
        "SELECT id, email, name, image, password, created_at FROM users WHERE {column} = ?1"
    );
    let row = conn
        .query_row(&sql, [value], user_from_row)
        .optional()?;
    Ok(row)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        image: row.get(3)?,
        password: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> Result<ConversationRow, rusqlite::Error> {
    Ok(ConversationRow {
        id: row.get(0)?,
        name: row.get(1)?,
        is_group: row.get(2)?,
        pair_key: row.get(3)?,
        last_message_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        body: row.get(3)?,
        image: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::{Database, pair_key};

    fn seed_user(db: &Database, email: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, email, email, "hash", "2026-01-01T00:00:00+00:00")
            .unwrap();
        id
    }

    #[test]
    fn direct_conversation_conflict_returns_existing() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@example.com");
        let b = seed_user(&db, "b@example.com");
        let key = pair_key(a.parse().unwrap(), b.parse().unwrap());
        let now = "2026-01-02T00:00:00+00:00";

        let (first, created) = db
            .create_direct_conversation(&Uuid::new_v4().to_string(), &a, &b, &key, now)
            .unwrap();
        assert!(created);

        // Second insert for the same pair loses to the constraint and gets
        // the winning row back.
        let (second, created) = db
            .create_direct_conversation(&Uuid::new_v4().to_string(), &b, &a, &key, now)
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn mark_seen_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@example.com");
        let b = seed_user(&db, "b@example.com");
        let key = pair_key(a.parse().unwrap(), b.parse().unwrap());
        let now = "2026-01-02T00:00:00+00:00";
        let (conv, _) = db
            .create_direct_conversation(&Uuid::new_v4().to_string(), &a, &b, &key, now)
            .unwrap();

        let mid = Uuid::new_v4().to_string();
        db.insert_message(&mid, &conv.id, &a, Some("hello"), None, now)
            .unwrap();

        // Sender is seen from creation; re-marking is a no-op.
        assert!(!db.mark_message_seen(&mid, &a).unwrap());
        assert!(db.mark_message_seen(&mid, &b).unwrap());
        assert!(!db.mark_message_seen(&mid, &b).unwrap());
        assert_eq!(db.message_seen_users(&mid).unwrap().len(), 2);
    }
}
