//! Integration tests: the synchronization service against an in-memory
//! store and a recording broker, checking the observable fanout contract.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use uuid::Uuid;

use parley_db::Database;
use parley_sync::{Broker, DeliveryError, SyncError, SyncService};
use parley_types::events::{CONVERSATION_NEW, CONVERSATION_UPDATE, MESSAGE_UPDATE, MESSAGES_NEW};

#[derive(Debug, Clone)]
struct Publish {
    topic: String,
    event: String,
    payload: serde_json::Value,
}

/// Records every publish; optionally fails for a single topic to exercise
/// the best-effort per-recipient contract.
#[derive(Default)]
struct RecordingBroker {
    fail_topic: Option<String>,
    records: Mutex<Vec<Publish>>,
}

impl RecordingBroker {
    fn failing_for(topic: &str) -> Self {
        Self {
            fail_topic: Some(topic.to_string()),
            records: Mutex::new(Vec::new()),
        }
    }

    fn records(&self) -> Vec<Publish> {
        self.records.lock().unwrap().clone()
    }

    fn count(&self, topic: &str, event: &str) -> usize {
        self.records()
            .iter()
            .filter(|p| p.topic == topic && p.event == event)
            .count()
    }
}

impl Broker for RecordingBroker {
    fn publish(&self, topic: &str, event: &str, payload: Bytes) -> Result<(), DeliveryError> {
        if self.fail_topic.as_deref() == Some(topic) {
            return Err(DeliveryError {
                topic: topic.to_string(),
                reason: "broker unavailable".into(),
            });
        }
        self.records.lock().unwrap().push(Publish {
            topic: topic.to_string(),
            event: event.to_string(),
            payload: serde_json::from_slice(&payload).unwrap(),
        });
        Ok(())
    }
}

struct Fixture {
    service: SyncService<RecordingBroker>,
    broker: Arc<RecordingBroker>,
}

fn fixture() -> Fixture {
    fixture_with(RecordingBroker::default())
}

fn fixture_with(broker: RecordingBroker) -> Fixture {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = Arc::new(broker);
    Fixture {
        service: SyncService::new(db, broker.clone()),
        broker,
    }
}

fn seed_user(service: &SyncService<RecordingBroker>, email: &str, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    service
        .db()
        .create_user(
            &id.to_string(),
            email,
            name,
            "argon2-hash",
            "2026-01-01T00:00:00+00:00",
        )
        .unwrap();
    id
}

#[test]
fn create_or_reuse_is_idempotent_and_fans_out_once() {
    let f = fixture();
    let a = seed_user(&f.service, "a@example.com", "A");
    let b = seed_user(&f.service, "b@example.com", "B");

    let first = f.service.create_or_reuse_conversation(a, b).unwrap();
    let second = f.service.create_or_reuse_conversation(a, b).unwrap();

    assert_eq!(first.id, second.id);
    // One conversation:new per participant, from the first call only.
    assert_eq!(f.broker.count("a@example.com", CONVERSATION_NEW), 1);
    assert_eq!(f.broker.count("b@example.com", CONVERSATION_NEW), 1);
}

#[test]
fn pair_matching_is_order_independent() {
    let f = fixture();
    let a = seed_user(&f.service, "a@example.com", "A");
    let b = seed_user(&f.service, "b@example.com", "B");

    let ab = f.service.create_or_reuse_conversation(a, b).unwrap();
    let ba = f.service.create_or_reuse_conversation(b, a).unwrap();

    assert_eq!(ab.id, ba.id);
}

#[test]
fn conversation_with_self_is_rejected() {
    let f = fixture();
    let a = seed_user(&f.service, "a@example.com", "A");

    let err = f.service.create_or_reuse_conversation(a, a).unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[test]
fn sent_message_is_seen_only_by_its_sender() {
    let f = fixture();
    let a = seed_user(&f.service, "a@example.com", "A");
    let b = seed_user(&f.service, "b@example.com", "B");
    let conv = f.service.create_or_reuse_conversation(a, b).unwrap();

    let msg = f
        .service
        .send_message(a, conv.id, Some("hello".into()), None)
        .unwrap();

    assert_eq!(msg.seen.len(), 1);
    assert!(msg.seen_by(a));
    assert!(!msg.seen_by(b));
}

#[test]
fn seen_set_grows_monotonically_and_marking_twice_is_a_noop() {
    let f = fixture();
    let a = seed_user(&f.service, "a@example.com", "A");
    let b = seed_user(&f.service, "b@example.com", "B");
    let conv = f.service.create_or_reuse_conversation(a, b).unwrap();
    f.service
        .send_message(a, conv.id, Some("hello".into()), None)
        .unwrap();

    let once = f.service.mark_seen(b, conv.id).unwrap().unwrap();
    let twice = f.service.mark_seen(b, conv.id).unwrap().unwrap();

    assert_eq!(once.seen.len(), 2);
    assert_eq!(twice.seen.len(), 2);
    // The seen fanout fired for the first mark only.
    assert_eq!(f.broker.count(&conv.id.to_string(), MESSAGE_UPDATE), 1);
    assert_eq!(f.broker.count("b@example.com", CONVERSATION_UPDATE), 1);
}

#[test]
fn mark_seen_on_empty_conversation_is_a_noop() {
    let f = fixture();
    let a = seed_user(&f.service, "a@example.com", "A");
    let b = seed_user(&f.service, "b@example.com", "B");
    let conv = f.service.create_or_reuse_conversation(a, b).unwrap();

    assert!(f.service.mark_seen(a, conv.id).unwrap().is_none());
}

#[test]
fn group_creation_fans_out_to_every_participant() {
    let f = fixture();
    let u1 = seed_user(&f.service, "u1@example.com", "u1");
    let u2 = seed_user(&f.service, "u2@example.com", "u2");
    let u3 = seed_user(&f.service, "u3@example.com", "u3");

    let conv = f
        .service
        .create_group_conversation(u1, &[u2, u3], "Team")
        .unwrap();

    assert!(conv.is_group);
    assert_eq!(conv.name.as_deref(), Some("Team"));
    assert_eq!(conv.participants.len(), 3);

    // Exactly one conversation:new per personal topic, identical payloads.
    let records: Vec<_> = f
        .broker
        .records()
        .into_iter()
        .filter(|p| p.event == CONVERSATION_NEW)
        .collect();
    assert_eq!(records.len(), 3);
    let mut topics: Vec<_> = records.iter().map(|p| p.topic.clone()).collect();
    topics.sort();
    assert_eq!(
        topics,
        vec!["u1@example.com", "u2@example.com", "u3@example.com"]
    );
    assert!(records.iter().all(|p| p.payload == records[0].payload));
}

#[test]
fn group_validation_rejects_before_any_write() {
    let f = fixture();
    let u1 = seed_user(&f.service, "u1@example.com", "u1");
    let u2 = seed_user(&f.service, "u2@example.com", "u2");
    let u3 = seed_user(&f.service, "u3@example.com", "u3");

    let too_few = f.service.create_group_conversation(u1, &[u2], "Team");
    assert!(matches!(too_few, Err(SyncError::Validation(_))));

    let unnamed = f.service.create_group_conversation(u1, &[u2, u3], "  ");
    assert!(matches!(unnamed, Err(SyncError::Validation(_))));

    assert!(f.broker.records().is_empty());
    assert!(f.service.list_conversations(u1).unwrap().is_empty());
}

#[test]
fn send_message_fans_out_in_append_then_summarize_order() {
    let f = fixture();
    let u1 = seed_user(&f.service, "u1@example.com", "u1");
    let u2 = seed_user(&f.service, "u2@example.com", "u2");
    let conv = f.service.create_or_reuse_conversation(u1, u2).unwrap();

    let before = f.service.get_conversation(u1, conv.id).unwrap().last_message_at;
    let msg = f
        .service
        .send_message(u1, conv.id, Some("hello".into()), None)
        .unwrap();

    // Conversation activity moved forward.
    let after = f.service.get_conversation(u1, conv.id).unwrap().last_message_at;
    assert!(after >= before);

    let records = f.broker.records();
    let new_idx = records
        .iter()
        .position(|p| p.event == MESSAGES_NEW)
        .expect("messages:new published");
    assert_eq!(records[new_idx].topic, conv.id.to_string());

    let update_indices: Vec<_> = records
        .iter()
        .enumerate()
        .filter(|(_, p)| p.event == CONVERSATION_UPDATE)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(update_indices.len(), 2, "one update per participant");
    assert!(update_indices.iter().all(|&i| i > new_idx));

    // Update payload is {id, last_message: [message]}.
    for &i in &update_indices {
        let p = &records[i].payload;
        assert_eq!(p["id"], serde_json::json!(conv.id));
        assert_eq!(p["last_message"].as_array().unwrap().len(), 1);
        assert_eq!(p["last_message"][0]["id"], serde_json::json!(msg.id));
    }
}

#[test]
fn delivery_failure_for_one_recipient_does_not_fail_the_send() {
    let f = fixture_with(RecordingBroker::failing_for("u2@example.com"));
    let u1 = seed_user(&f.service, "u1@example.com", "u1");
    let u2 = seed_user(&f.service, "u2@example.com", "u2");
    let conv = f.service.create_or_reuse_conversation(u1, u2).unwrap();

    // The durable write succeeds even though u2's topic is down.
    let msg = f
        .service
        .send_message(u1, conv.id, Some("hello".into()), None)
        .unwrap();
    assert_eq!(msg.body.as_deref(), Some("hello"));

    // The other recipient still got their update.
    assert_eq!(f.broker.count("u1@example.com", CONVERSATION_UPDATE), 1);
    assert_eq!(f.broker.count(&conv.id.to_string(), MESSAGES_NEW), 1);

    // And the message is durable: a later read sees it.
    let history = f.service.conversation_messages(u2, conv.id).unwrap();
    assert_eq!(history.len(), 1);
}

#[test]
fn non_participants_cannot_send_or_mark_seen() {
    let f = fixture();
    let a = seed_user(&f.service, "a@example.com", "A");
    let b = seed_user(&f.service, "b@example.com", "B");
    let outsider = seed_user(&f.service, "c@example.com", "C");
    let conv = f.service.create_or_reuse_conversation(a, b).unwrap();

    let send = f
        .service
        .send_message(outsider, conv.id, Some("hi".into()), None);
    assert!(matches!(send, Err(SyncError::Forbidden)));

    let seen = f.service.mark_seen(outsider, conv.id);
    assert!(matches!(seen, Err(SyncError::Forbidden)));
}

#[test]
fn listings_order_conversations_by_recency() {
    let f = fixture();
    let a = seed_user(&f.service, "a@example.com", "A");
    let b = seed_user(&f.service, "b@example.com", "B");
    let c = seed_user(&f.service, "c@example.com", "C");

    let with_b = f.service.create_or_reuse_conversation(a, b).unwrap();
    let with_c = f.service.create_or_reuse_conversation(a, c).unwrap();

    f.service
        .send_message(a, with_b.id, Some("bump".into()), None)
        .unwrap();

    let listed = f.service.list_conversations(a).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, with_b.id);
    assert_eq!(listed[1].id, with_c.id);
}

#[test]
fn empty_messages_are_rejected() {
    let f = fixture();
    let a = seed_user(&f.service, "a@example.com", "A");
    let b = seed_user(&f.service, "b@example.com", "B");
    let conv = f.service.create_or_reuse_conversation(a, b).unwrap();

    let err = f.service.send_message(a, conv.id, None, None).unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    // Image-only messages are fine.
    let msg = f
        .service
        .send_message(a, conv.id, None, Some("/uploads/cat.png".into()))
        .unwrap();
    assert_eq!(msg.image.as_deref(), Some("/uploads/cat.png"));
}
