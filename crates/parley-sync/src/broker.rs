use bytes::Bytes;
use thiserror::Error;

/// A publish against a topic failed. Scoped to that one topic: the durable
/// write already committed, so the caller records the failure and moves on.
#[derive(Debug, Clone, Error)]
#[error("delivery to topic '{topic}' failed: {reason}")]
pub struct DeliveryError {
    pub topic: String,
    pub reason: String,
}

/// The publish side of the message broker the core drives. Fire-and-forget:
/// the broker owns per-topic ordering and delivery to current subscribers.
pub trait Broker: Send + Sync {
    fn publish(&self, topic: &str, event: &str, payload: Bytes) -> Result<(), DeliveryError>;
}
