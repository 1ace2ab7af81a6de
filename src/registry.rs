//! Subscription bookkeeping: per-connection subscription sets and per-route
//! topic reference counts.
//!
//! A [`TopicTracker`] answers "is anyone listening to this topic" for one
//! route. It is the single place a first-subscriber / last-subscriber
//! transition is observed, which is what lets a route call an engine's
//! `create_topic`/`remove_topic` exactly once per topic lifecycle.

use crate::ids::{ConnectionId, ListenerId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One entry in a connection's subscription set.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub topic: String,
    pub listener_id: ListenerId,
    pub confirmed: bool,
}

/// Per-connection subscription set, keyed by listener id so an unsubscribe
/// request can resolve its topic without the client resending params.
#[derive(Debug, Default)]
pub struct ConnectionSubscriptions {
    by_listener: HashMap<ListenerId, Subscription>,
}

impl ConnectionSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, listener_id: ListenerId, topic: String) {
        self.by_listener.insert(
            listener_id.clone(),
            Subscription {
                topic,
                listener_id,
                confirmed: false,
            },
        );
    }

    pub fn confirm(&mut self, listener_id: &ListenerId) {
        if let Some(sub) = self.by_listener.get_mut(listener_id) {
            sub.confirmed = true;
        }
    }

    /// Removes and returns the subscription for `listener_id`, if any.
    pub fn remove(&mut self, listener_id: &ListenerId) -> Option<Subscription> {
        self.by_listener.remove(listener_id)
    }

    /// All topics currently held, for connection teardown.
    pub fn all_topics(&self) -> Vec<(ListenerId, String)> {
        self.by_listener
            .values()
            .map(|s| (s.listener_id.clone(), s.topic.clone()))
            .collect()
    }

    pub fn is_confirmed(&self, topic: &str) -> bool {
        self.by_listener.values().any(|s| s.topic == topic && s.confirmed)
    }
}

/// Outcome of incrementing a topic's subscriber count.
#[derive(Debug, PartialEq, Eq)]
pub enum RefTransition {
    /// The topic went from 0 to 1 subscribers; the caller must call the
    /// engine's `create_topic`.
    FirstSubscriber,
    /// The topic already had at least one subscriber.
    AlreadyActive,
}

/// Process-wide, per-route reference-count map from topic to subscriber
/// count. Mutations are serialized per topic via an internal lock so a
/// first/last transition is observed exactly once even under concurrent
/// subscribe/unsubscribe calls.
#[derive(Debug, Default)]
pub struct TopicTracker {
    counts: DashMap<String, Arc<Mutex<u64>>>,
}

impl TopicTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, topic: &str) -> Arc<Mutex<u64>> {
        self.counts
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(0)))
            .clone()
    }

    /// Increments the topic's subscriber count, returning whether this was
    /// the first subscriber.
    pub fn increment(&self, topic: &str) -> RefTransition {
        let cell = self.lock_for(topic);
        let mut count = cell.lock();
        let was_zero = *count == 0;
        *count += 1;
        if was_zero {
            RefTransition::FirstSubscriber
        } else {
            RefTransition::AlreadyActive
        }
    }

    /// Decrements the topic's subscriber count, returning `true` if it
    /// reached zero (the caller must call the engine's `remove_topic`).
    /// Decrementing a topic already at zero is a no-op (idempotent teardown).
    pub fn decrement(&self, topic: &str) -> bool {
        let cell = self.lock_for(topic);
        let mut count = cell.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        let reached_zero = *count == 0;
        if reached_zero {
            drop(count);
            self.counts.remove(topic);
        }
        reached_zero
    }

    pub fn count(&self, topic: &str) -> u64 {
        self.counts
            .get(topic)
            .map(|c| *c.lock())
            .unwrap_or(0)
    }

    pub fn active_topic_count(&self) -> usize {
        self.counts.len()
    }
}

/// Maps each live connection to its subscription set. Owned by the server,
/// not by any single route, since a connection can be subscribed across
/// multiple routes at once.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Mutex<ConnectionSubscriptions>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnectionId) {
        self.connections
            .insert(id, Arc::new(Mutex::new(ConnectionSubscriptions::new())));
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Mutex<ConnectionSubscriptions>>> {
        self.connections.get(&id).map(|e| e.clone())
    }

    pub fn deregister(&self, id: ConnectionId) -> Option<Arc<Mutex<ConnectionSubscriptions>>> {
        self.connections.remove(&id).map(|(_, v)| v)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_subscriber_transition_fires_once() {
        let tracker = TopicTracker::new();
        assert_eq!(tracker.increment("bars:x"), RefTransition::FirstSubscriber);
        assert_eq!(tracker.increment("bars:x"), RefTransition::AlreadyActive);
        assert_eq!(tracker.count("bars:x"), 2);
    }

    #[test]
    fn last_unsubscriber_transition_fires_once() {
        let tracker = TopicTracker::new();
        tracker.increment("bars:x");
        tracker.increment("bars:x");
        assert!(!tracker.decrement("bars:x"));
        assert!(tracker.decrement("bars:x"));
        assert_eq!(tracker.count("bars:x"), 0);
    }

    #[test]
    fn decrement_below_zero_is_noop() {
        let tracker = TopicTracker::new();
        assert!(!tracker.decrement("bars:never-subscribed"));
    }

    #[test]
    fn connection_subscriptions_confirm_and_remove() {
        let mut subs = ConnectionSubscriptions::new();
        let listener = ListenerId("l1".to_string());
        subs.insert(listener.clone(), "bars:x".to_string());
        assert!(!subs.is_confirmed("bars:x"));
        subs.confirm(&listener);
        assert!(subs.is_confirmed("bars:x"));
        let removed = subs.remove(&listener).unwrap();
        assert_eq!(removed.topic, "bars:x");
        assert!(subs.all_topics().is_empty());
    }

    #[test]
    fn unsubscribe_unknown_listener_is_noop() {
        let mut subs = ConnectionSubscriptions::new();
        assert!(subs.remove(&ListenerId("ghost".to_string())).is_none());
    }

    #[test]
    fn registry_tracks_connections() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId(1);
        registry.register(id);
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.get(id).is_some());
        registry.deregister(id);
        assert_eq!(registry.connection_count(), 0);
    }
}
