use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::warn;

use parley_sync::{Broker, DeliveryError};

const TOPIC_CAPACITY: usize = 1024;

/// One named, payload-bearing event on a topic.
#[derive(Debug, Clone)]
pub struct TopicEvent {
    pub topic: String,
    pub event: String,
    pub payload: Bytes,
}

/// In-process topic broker: named channels over `tokio::sync::broadcast`,
/// so per-topic send order is preserved and every current subscriber sees
/// every publish. Cheap to clone; all clones share the topic table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    topics: RwLock<HashMap<String, broadcast::Sender<TopicEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to a topic, creating it on first use. The returned handle
    /// is the subscription's owner: dropping (or `release`-ing) it ends the
    /// relationship and prunes the topic once nobody is left.
    pub fn subscribe(&self, topic: &str) -> TopicSubscription {
        let mut topics = self.inner.topics.write().expect("topic table poisoned");
        let tx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        TopicSubscription {
            topic: topic.to_string(),
            rx: tx.subscribe(),
            bus: self.clone(),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.inner.topics.read().expect("topic table poisoned");
        topics.get(topic).map_or(0, |tx| tx.receiver_count())
    }

    fn prune_if_idle(&self, topic: &str, departing: bool) {
        let mut topics = self.inner.topics.write().expect("topic table poisoned");
        let idle = topics
            .get(topic)
            .is_some_and(|tx| tx.receiver_count() <= usize::from(departing));
        if idle {
            topics.remove(topic);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for EventBus {
    fn publish(&self, topic: &str, event: &str, payload: Bytes) -> Result<(), DeliveryError> {
        let delivered = {
            let topics = self.inner.topics.read().expect("topic table poisoned");
            match topics.get(topic) {
                // Publishing to a topic nobody subscribes to is a successful
                // delivery to zero recipients, not a failure.
                None => return Ok(()),
                Some(tx) => tx.send(TopicEvent {
                    topic: topic.to_string(),
                    event: event.to_string(),
                    payload,
                }),
            }
        };
        if delivered.is_err() {
            // Last subscriber left without the topic being pruned yet.
            self.prune_if_idle(topic, false);
        }
        Ok(())
    }
}

/// A live subscription to one topic. Holding it keeps the subscription;
/// dropping it releases the topic binding.
pub struct TopicSubscription {
    topic: String,
    rx: broadcast::Receiver<TopicEvent>,
    bus: EventBus,
}

impl TopicSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event on the topic, in publish order. `None` once the topic is
    /// gone. A lagged receiver skips ahead rather than failing.
    pub async fn recv(&mut self) -> Option<TopicEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Subscriber on '{}' lagged by {} events", self.topic, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Explicitly end the subscription.
    pub fn release(self) {}
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        self.bus.prune_if_idle(&self.topic, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_names(events: &[TopicEvent]) -> Vec<String> {
        events.iter().map(|e| e.event.clone()).collect()
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish("nowhere", "ping", Bytes::new()).unwrap();
        assert_eq!(bus.subscriber_count("nowhere"), 0);
    }

    #[tokio::test]
    async fn all_subscribers_receive_in_publish_order() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("c1");
        let mut b = bus.subscribe("c1");

        bus.publish("c1", "first", Bytes::new()).unwrap();
        bus.publish("c1", "second", Bytes::new()).unwrap();

        for sub in [&mut a, &mut b] {
            let got = vec![sub.recv().await.unwrap(), sub.recv().await.unwrap()];
            assert_eq!(event_names(&got), ["first", "second"]);
        }
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("c1");
        let _b = bus.subscribe("c2");

        bus.publish("c2", "other", Bytes::new()).unwrap();
        bus.publish("c1", "mine", Bytes::new()).unwrap();

        assert_eq!(a.recv().await.unwrap().event, "mine");
    }

    #[tokio::test]
    async fn dropping_the_last_subscription_prunes_the_topic() {
        let bus = EventBus::new();
        let a = bus.subscribe("c1");
        let b = bus.subscribe("c1");
        assert_eq!(bus.subscriber_count("c1"), 2);

        drop(a);
        assert_eq!(bus.subscriber_count("c1"), 1);
        b.release();
        assert_eq!(bus.subscriber_count("c1"), 0);
    }
}
