use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_sync::Broker;
use parley_types::events::{
    MEMBER_ADDED, MEMBER_REMOVED, PRESENCE_SNAPSHOT, PRESENCE_TOPIC, PresenceMember,
    PresenceSnapshot,
};

use crate::bus::{EventBus, TopicSubscription};

/// Server-side presence roster: who currently holds at least one gateway
/// connection. Membership is refcounted per user, so `member_added` fires on
/// a user's first connection and `member_removed` only when the last one
/// goes away.
pub struct Roster {
    online: Mutex<HashMap<Uuid, usize>>,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            online: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection for `user_id` and subscribe it to the presence
    /// topic. Snapshot and subscription are taken under the roster lock, and
    /// membership events are published under the same lock, so a subscriber
    /// can never observe an add for a member already in its snapshot or a
    /// remove for one absent from it.
    pub fn join(&self, bus: &EventBus, user_id: Uuid) -> (Vec<Uuid>, TopicSubscription) {
        let mut online = self.online.lock().expect("roster lock poisoned");
        let subscription = bus.subscribe(PRESENCE_TOPIC);
        let snapshot: Vec<Uuid> = online.keys().copied().collect();

        let connections = online.entry(user_id).or_insert(0);
        *connections += 1;
        if *connections == 1 {
            debug!("{} is now online", user_id);
            publish_member(bus, MEMBER_ADDED, user_id);
        }

        (snapshot, subscription)
    }

    /// Release one connection for `user_id`.
    pub fn leave(&self, bus: &EventBus, user_id: Uuid) {
        let mut online = self.online.lock().expect("roster lock poisoned");
        let Some(connections) = online.get_mut(&user_id) else {
            return;
        };
        *connections -= 1;
        if *connections == 0 {
            online.remove(&user_id);
            debug!("{} is now offline", user_id);
            publish_member(bus, MEMBER_REMOVED, user_id);
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online
            .lock()
            .expect("roster lock poisoned")
            .contains_key(&user_id)
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

fn publish_member(bus: &EventBus, event: &str, user_id: Uuid) {
    let payload = serde_json::to_vec(&PresenceMember { user_id }).unwrap();
    if let Err(e) = bus.publish(PRESENCE_TOPIC, event, Bytes::from(payload)) {
        warn!("{}", e);
    }
}

/// Client-side view of the presence topic: rebuilt from a full snapshot on
/// (re)subscription, mutated incrementally afterwards. The set knows nothing
/// about its consumers; they observe changes through `watch` receivers.
pub struct PresenceSet {
    members: HashSet<Uuid>,
    tx: watch::Sender<HashSet<Uuid>>,
}

impl PresenceSet {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(HashSet::new());
        Self {
            members: HashSet::new(),
            tx,
        }
    }

    /// A receiver that wakes whenever the tracked set changes.
    pub fn watch(&self) -> watch::Receiver<HashSet<Uuid>> {
        self.tx.subscribe()
    }

    /// Replace the entire tracked set with the broker's membership roster.
    /// Called once, when the presence subscription first succeeds.
    pub fn apply_snapshot(&mut self, ids: impl IntoIterator<Item = Uuid>) {
        self.members = ids.into_iter().collect();
        self.notify();
    }

    /// Idempotent: adding a member already present is a no-op.
    pub fn add_member(&mut self, id: Uuid) {
        if self.members.insert(id) {
            self.notify();
        }
    }

    /// Idempotent: removing an absent member is a no-op.
    pub fn remove_member(&mut self, id: Uuid) {
        if self.members.remove(&id) {
            self.notify();
        }
    }

    pub fn members(&self) -> &HashSet<Uuid> {
        &self.members
    }

    pub fn is_online(&self, id: Uuid) -> bool {
        self.members.contains(&id)
    }

    /// Feed an event received on the presence topic into the set. Unknown
    /// event names and malformed payloads are ignored with a warning.
    pub fn apply_event(&mut self, event: &str, payload: &[u8]) {
        match event {
            PRESENCE_SNAPSHOT => match serde_json::from_slice::<PresenceSnapshot>(payload) {
                Ok(snapshot) => self.apply_snapshot(snapshot.online),
                Err(e) => warn!("Bad presence snapshot payload: {}", e),
            },
            MEMBER_ADDED => match serde_json::from_slice::<PresenceMember>(payload) {
                Ok(member) => self.add_member(member.user_id),
                Err(e) => warn!("Bad member_added payload: {}", e),
            },
            MEMBER_REMOVED => match serde_json::from_slice::<PresenceMember>(payload) {
                Ok(member) => self.remove_member(member.user_id),
                Err(e) => warn!("Bad member_removed payload: {}", e),
            },
            other => debug!("Ignoring presence event '{}'", other),
        }
    }

    fn notify(&self) {
        self.tx.send_replace(self.members.clone());
    }
}

impl Default for PresenceSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_then_incremental_events() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let mut set = PresenceSet::new();
        set.apply_snapshot([a, b]);
        set.add_member(c);
        set.remove_member(b);

        assert_eq!(set.members(), &HashSet::from([a, c]));
    }

    #[test]
    fn mutations_are_idempotent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut set = PresenceSet::new();
        set.apply_snapshot([a]);
        set.add_member(a);
        set.remove_member(b);

        assert_eq!(set.members(), &HashSet::from([a]));
    }

    #[test]
    fn observers_see_every_change() {
        let a = Uuid::new_v4();
        let mut set = PresenceSet::new();
        let mut rx = set.watch();

        set.apply_snapshot([a]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), HashSet::from([a]));

        // A no-op mutation does not wake observers.
        set.add_member(a);
        assert!(!rx.has_changed().unwrap());

        set.remove_member(a);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_empty());
    }

    #[test]
    fn roster_refcounts_connections() {
        let bus = EventBus::new();
        let roster = Roster::new();
        let user = Uuid::new_v4();

        let (_, sub_a) = roster.join(&bus, user);
        let (_, sub_b) = roster.join(&bus, user);
        assert!(roster.is_online(user));

        roster.leave(&bus, user);
        assert!(roster.is_online(user), "still one connection left");
        roster.leave(&bus, user);
        assert!(!roster.is_online(user));

        sub_a.release();
        sub_b.release();
    }

    #[tokio::test]
    async fn second_joiner_sees_the_first_in_its_snapshot() {
        let bus = EventBus::new();
        let roster = Roster::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let (snap_a, mut sub_a) = roster.join(&bus, a);
        assert!(snap_a.is_empty());

        let (snap_b, _sub_b) = roster.join(&bus, b);
        assert_eq!(snap_b, vec![a]);

        // A's subscription observes its own add, then B's.
        let mut set = PresenceSet::new();
        set.apply_snapshot(snap_a);
        for _ in 0..2 {
            let ev = sub_a.recv().await.unwrap();
            set.apply_event(&ev.event, &ev.payload);
        }
        assert_eq!(set.members(), &HashSet::from([a, b]));
    }
}
