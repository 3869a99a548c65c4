use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use parley_types::events::{
    CONVERSATION_NEW, CONVERSATION_UPDATE, ConversationUpdate, MESSAGE_UPDATE, MESSAGES_NEW,
    SeenUpdate, conversation_topic, personal_topic,
};
use parley_types::models::{Conversation, Message, User};

use crate::broker::{Broker, DeliveryError};

/// Outcome of a fanout: which per-topic publishes failed. Failures are
/// already warn-logged when recorded; callers only consult this in tests
/// and diagnostics.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub failures: Vec<DeliveryError>,
}

impl DeliveryReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, result: Result<(), DeliveryError>) {
        if let Err(e) = result {
            warn!("{}", e);
            self.failures.push(e);
        }
    }
}

/// Translates domain events into publishes against the broker. Each
/// recipient's publish is independent best-effort: one failed topic never
/// blocks or rolls back the others.
pub struct FanoutRouter<B: Broker> {
    broker: Arc<B>,
}

impl<B: Broker> FanoutRouter<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker }
    }

    /// `conversation:new` to every participant's personal topic, the
    /// initiator included.
    pub fn conversation_created(&self, conversation: &Conversation) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let Some(payload) = encode(conversation, &mut report) else {
            return report;
        };
        for user in &conversation.participants {
            report.record(self.broker.publish(
                &personal_topic(&user.email),
                CONVERSATION_NEW,
                payload.clone(),
            ));
        }
        report
    }

    /// `messages:new` once, on the conversation's shared topic.
    pub fn message_created(&self, message: &Message) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let Some(payload) = encode(message, &mut report) else {
            return report;
        };
        report.record(self.broker.publish(
            &conversation_topic(message.conversation_id),
            MESSAGES_NEW,
            payload,
        ));
        report
    }

    /// `conversation:update` to every participant's personal topic, carrying
    /// the just-created message as a one-element `last_message` list.
    pub fn conversation_updated(
        &self,
        conversation_id: Uuid,
        participants: &[User],
        last_message: &Message,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let update = ConversationUpdate::new(conversation_id, last_message.clone());
        let Some(payload) = encode(&update, &mut report) else {
            return report;
        };
        for user in participants {
            report.record(self.broker.publish(
                &personal_topic(&user.email),
                CONVERSATION_UPDATE,
                payload.clone(),
            ));
        }
        report
    }

    /// After a mark-seen: `message:update` on the conversation topic so open
    /// clients refresh read receipts, and a personal `conversation:update`
    /// so the viewer's own conversation list clears its unread state.
    pub fn message_seen(&self, viewer_email: &str, message: &Message) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if let Some(payload) = encode(message, &mut report) {
            report.record(self.broker.publish(
                &conversation_topic(message.conversation_id),
                MESSAGE_UPDATE,
                payload,
            ));
        }
        let update = SeenUpdate {
            id: message.conversation_id,
            messages: vec![message.clone()],
        };
        if let Some(payload) = encode(&update, &mut report) {
            report.record(self.broker.publish(
                &personal_topic(viewer_email),
                CONVERSATION_UPDATE,
                payload,
            ));
        }
        report
    }
}

fn encode<T: Serialize>(value: &T, report: &mut DeliveryReport) -> Option<Bytes> {
    match serde_json::to_vec(value) {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(e) => {
            report.record(Err(DeliveryError {
                topic: "*".into(),
                reason: format!("payload serialization failed: {e}"),
            }));
            None
        }
    }
}
