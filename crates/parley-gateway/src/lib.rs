pub mod bus;
pub mod connection;
pub mod presence;

use std::sync::Arc;

pub use bus::{EventBus, TopicEvent, TopicSubscription};
pub use presence::{PresenceSet, Roster};

/// Everything a WebSocket connection needs, cloned per upgrade.
#[derive(Clone)]
pub struct GatewayState {
    pub bus: EventBus,
    pub roster: Arc<Roster>,
    pub jwt_secret: String,
}
