//! End-to-end: the synchronization service publishing through the
//! in-process bus, with live topic subscribers on the other side.

use std::sync::Arc;

use uuid::Uuid;

use parley_db::Database;
use parley_gateway::EventBus;
use parley_sync::SyncService;
use parley_types::events::{
    CONVERSATION_NEW, CONVERSATION_UPDATE, MESSAGES_NEW, conversation_topic,
};
use parley_types::models::Conversation;

fn service(bus: Arc<EventBus>) -> SyncService<EventBus> {
    let db = Arc::new(Database::open_in_memory().unwrap());
    SyncService::new(db, bus)
}

fn seed_user(service: &SyncService<EventBus>, email: &str) -> Uuid {
    let id = Uuid::new_v4();
    service
        .db()
        .create_user(
            &id.to_string(),
            email,
            email,
            "argon2-hash",
            "2026-01-01T00:00:00+00:00",
        )
        .unwrap();
    id
}

#[tokio::test]
async fn live_subscribers_receive_the_full_event_sequence() {
    let bus = Arc::new(EventBus::new());
    let service = service(bus.clone());
    let a = seed_user(&service, "a@example.com");
    let b = seed_user(&service, "b@example.com");

    // B is connected: personal topic attached before A starts anything.
    let mut b_personal = bus.subscribe("b@example.com");

    let conv = service.create_or_reuse_conversation(a, b).unwrap();
    let ev = b_personal.recv().await.unwrap();
    assert_eq!(ev.event, CONVERSATION_NEW);
    let payload: Conversation = serde_json::from_slice(&ev.payload).unwrap();
    assert_eq!(payload.id, conv.id);
    assert_eq!(payload.participants.len(), 2);

    // B opens the conversation: its shared topic attached.
    let mut conv_sub = bus.subscribe(&conversation_topic(conv.id));

    let msg = service
        .send_message(a, conv.id, Some("hello".into()), None)
        .unwrap();

    // Append arrives on the shared topic before the summary on the
    // personal topic.
    let ev = conv_sub.recv().await.unwrap();
    assert_eq!(ev.event, MESSAGES_NEW);

    let ev = b_personal.recv().await.unwrap();
    assert_eq!(ev.event, CONVERSATION_UPDATE);
    let update: serde_json::Value = serde_json::from_slice(&ev.payload).unwrap();
    assert_eq!(update["last_message"][0]["id"], serde_json::json!(msg.id));
}

#[tokio::test]
async fn unsubscribed_conversations_stay_silent() {
    let bus = Arc::new(EventBus::new());
    let service = service(bus.clone());
    let a = seed_user(&service, "a@example.com");
    let b = seed_user(&service, "b@example.com");
    let c = seed_user(&service, "c@example.com");

    let ab = service.create_or_reuse_conversation(a, b).unwrap();
    let ac = service.create_or_reuse_conversation(a, c).unwrap();

    let mut ab_sub = bus.subscribe(&conversation_topic(ab.id));
    let _ac_sub = bus.subscribe(&conversation_topic(ac.id));

    service
        .send_message(a, ac.id, Some("elsewhere".into()), None)
        .unwrap();
    service
        .send_message(a, ab.id, Some("here".into()), None)
        .unwrap();

    // The ab topic only ever carries ab's message.
    let ev = ab_sub.recv().await.unwrap();
    assert_eq!(ev.event, MESSAGES_NEW);
    let msg: serde_json::Value = serde_json::from_slice(&ev.payload).unwrap();
    assert_eq!(msg["body"], serde_json::json!("here"));
}
