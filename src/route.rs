//! Generic subscribe/unsubscribe/update state machine, parameterized over an
//! [`Engine`] capability so the same machinery drives both the datafeed and
//! broker routes.

use crate::error::FabricError;
use crate::ids::{ConnectionId, ListenerId};
use crate::pump::BroadcastPump;
use crate::registry::{ConnectionRegistry, RefTransition, TopicTracker};
use crate::topic::build_topic;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// The capability a route needs from its backing engine: start or stop
/// producing updates for a topic. Engines hold no per-subscriber state; one
/// producer runs per topic regardless of how many connections hold it.
pub trait Engine: Send + Sync {
    /// Called on the topic's first subscriber. `publish` enqueues a payload
    /// for delivery to every current subscriber of `topic`; the engine
    /// invokes it from whatever task it uses to generate updates.
    fn create_topic(&self, topic: &str, publish: Arc<dyn Fn(Value) + Send + Sync>);

    /// Called when a topic's last subscriber unsubscribes or disconnects.
    fn remove_topic(&self, topic: &str);
}

/// Required top-level keys for one route's subscribe payload. This is a
/// presence check only, since subscription payloads carry required fields
/// only and there is nothing optional left to validate.
fn required_fields(route: &str) -> &'static [&'static str] {
    match route {
        "bars" => &["symbol", "resolution"],
        "quotes" => &["symbols"],
        "orders" | "positions" | "equity" => &["accountId"],
        "executions" => &["accountId", "symbol"],
        _ => &[],
    }
}

/// Rejects a subscribe payload missing (or null for) one of its route's
/// required fields, before a topic is ever built from it.
fn validate_params(route: &str, params: &Value) -> Result<(), FabricError> {
    let obj = params.as_object();
    for field in required_fields(route) {
        let present = obj
            .and_then(|o| o.get(*field))
            .map(|v| !v.is_null())
            .unwrap_or(false);
        if !present {
            return Err(FabricError::Validation(format!(
                "missing required field \"{field}\""
            )));
        }
    }
    Ok(())
}

/// One logical stream: `bars`, `orders`, `positions`, and so on. Owns its
/// [`TopicTracker`] and [`BroadcastPump`]; the engine behind it is shared with
/// sibling routes of the same module (e.g. all broker routes share one
/// [`crate::broker::BrokerEngine`]).
pub struct Route {
    pub name: &'static str,
    tracker: TopicTracker,
    pump: Arc<BroadcastPump>,
    engine: Arc<dyn Engine>,
}

/// Outcome of a subscribe attempt, ready to be serialized as a
/// `{route}.subscribe.response` envelope.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SubscribeOutcome {
    Ok { topic: String },
    Error { reason: String },
}

impl Route {
    pub fn new(name: &'static str, queue_capacity: usize, engine: Arc<dyn Engine>) -> Self {
        Self {
            name,
            tracker: TopicTracker::new(),
            pump: BroadcastPump::new(name, queue_capacity),
            engine,
        }
    }

    pub fn pump(&self) -> Arc<BroadcastPump> {
        Arc::clone(&self.pump)
    }

    pub fn active_topic_count(&self) -> usize {
        self.tracker.active_topic_count()
    }

    pub fn dropped_count(&self) -> u64 {
        self.pump.dropped_count()
    }

    /// Handles an inbound `{route}.subscribe` request. Registers `sender` as
    /// the connection's outbound channel for this topic and idempotently
    /// increments the topic's reference count, spinning the engine up on the
    /// first subscriber.
    pub fn subscribe(
        &self,
        registry: &ConnectionRegistry,
        connection: ConnectionId,
        listener_id: ListenerId,
        params: &Value,
        sender: UnboundedSender<Value>,
    ) -> SubscribeOutcome {
        if let Err(e) = validate_params(self.name, params) {
            return SubscribeOutcome::Error { reason: e.to_string() };
        }

        let topic = match build_topic(self.name, params) {
            Ok(t) => t,
            Err(e) => return SubscribeOutcome::Error { reason: e.to_string() },
        };

        let Some(conn_subs) = registry.get(connection) else {
            return SubscribeOutcome::Error {
                reason: "unknown connection".to_string(),
            };
        };

        // Idempotent: a duplicate subscribe from the same listener must not
        // double-increment the topic's reference count.
        {
            let subs = conn_subs.lock();
            if subs.all_topics().iter().any(|(l, _)| l == &listener_id) {
                return SubscribeOutcome::Ok { topic };
            }
        }

        let transition = self.tracker.increment(&topic);
        if transition == RefTransition::FirstSubscriber {
            let pump = Arc::clone(&self.pump);
            let topic_for_cb = topic.clone();
            let publish: Arc<dyn Fn(Value) + Send + Sync> = Arc::new(move |payload| {
                pump.enqueue(topic_for_cb.clone(), payload);
            });
            self.engine.create_topic(&topic, publish);
        }

        self.pump.subscribe(&topic, connection, sender);
        {
            let mut subs = conn_subs.lock();
            subs.insert(listener_id.clone(), topic.clone());
            subs.confirm(&listener_id);
        }
        self.pump.confirm(&topic, connection);

        SubscribeOutcome::Ok { topic }
    }

    /// Handles an inbound `{route}.unsubscribe` request. A request for an
    /// unknown listener id is a no-op, not an error.
    pub fn unsubscribe(
        &self,
        registry: &ConnectionRegistry,
        connection: ConnectionId,
        listener_id: &ListenerId,
    ) {
        let Some(conn_subs) = registry.get(connection) else {
            return;
        };
        let removed = {
            let mut subs = conn_subs.lock();
            subs.remove(listener_id)
        };
        let Some(sub) = removed else { return };

        self.pump.unsubscribe(&sub.topic, connection);
        if self.tracker.decrement(&sub.topic) {
            self.engine.remove_topic(&sub.topic);
        }
    }

    /// Tears down every subscription this connection holds on this route.
    /// Called once per route when a connection disconnects.
    pub fn teardown_connection(&self, registry: &ConnectionRegistry, connection: ConnectionId) {
        let Some(conn_subs) = registry.get(connection) else {
            return;
        };
        let topics: Vec<(ListenerId, String)> = {
            let subs = conn_subs.lock();
            subs.all_topics()
        };
        for (listener_id, topic) in topics {
            {
                let mut subs = conn_subs.lock();
                subs.remove(&listener_id);
            }
            self.pump.unsubscribe(&topic, connection);
            if self.tracker.decrement(&topic) {
                self.engine.remove_topic(&topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct CountingEngine {
        created: SyncMutex<Vec<String>>,
        removed: SyncMutex<Vec<String>>,
    }

    impl CountingEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                created: SyncMutex::new(Vec::new()),
                removed: SyncMutex::new(Vec::new()),
            })
        }
    }

    impl Engine for CountingEngine {
        fn create_topic(&self, topic: &str, _publish: Arc<dyn Fn(Value) + Send + Sync>) {
            self.created.lock().push(topic.to_string());
        }

        fn remove_topic(&self, topic: &str) {
            self.removed.lock().push(topic.to_string());
        }
    }

    fn setup() -> (Route, Arc<CountingEngine>, ConnectionRegistry) {
        let engine = CountingEngine::new();
        let route = Route::new("bars", 16, engine.clone());
        let registry = ConnectionRegistry::new();
        (route, engine, registry)
    }

    #[test]
    fn first_subscriber_creates_topic_once() {
        let (route, engine, registry) = setup();
        let conn_a = ConnectionId(1);
        let conn_b = ConnectionId(2);
        registry.register(conn_a);
        registry.register(conn_b);
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let params = json!({"symbol": "AAPL", "resolution": "1"});

        route.subscribe(&registry, conn_a, ListenerId("a".into()), &params, tx_a);
        route.subscribe(&registry, conn_b, ListenerId("b".into()), &params, tx_b);

        assert_eq!(engine.created.lock().len(), 1);
        assert_eq!(route.active_topic_count(), 1);
    }

    #[test]
    fn last_unsubscribe_removes_topic() {
        let (route, engine, registry) = setup();
        let conn = ConnectionId(1);
        registry.register(conn);
        let (tx, _rx) = mpsc::unbounded_channel();
        let params = json!({"symbol": "AAPL", "resolution": "1"});
        let outcome = route.subscribe(&registry, conn, ListenerId("a".into()), &params, tx);
        match outcome {
            SubscribeOutcome::Ok { topic } => assert_eq!(topic, r#"bars:{"resolution":"1","symbol":"AAPL"}"#),
            SubscribeOutcome::Error { reason } => panic!("unexpected error: {reason}"),
        }

        route.unsubscribe(&registry, conn, &ListenerId("a".into()));
        assert_eq!(engine.removed.lock().len(), 1);
        assert_eq!(route.active_topic_count(), 0);
    }

    #[test]
    fn duplicate_subscribe_is_idempotent() {
        let (route, engine, registry) = setup();
        let conn = ConnectionId(1);
        registry.register(conn);
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let params = json!({"symbol": "AAPL", "resolution": "1"});
        route.subscribe(&registry, conn, ListenerId("a".into()), &params, tx1);
        route.subscribe(&registry, conn, ListenerId("a".into()), &params, tx2);
        assert_eq!(engine.created.lock().len(), 1);
    }

    #[test]
    fn unsubscribe_unknown_listener_is_noop() {
        let (route, engine, registry) = setup();
        let conn = ConnectionId(1);
        registry.register(conn);
        route.unsubscribe(&registry, conn, &ListenerId("ghost".into()));
        assert!(engine.removed.lock().is_empty());
    }

    #[test]
    fn teardown_unsubscribes_all_topics_for_connection() {
        let (route, engine, registry) = setup();
        let conn = ConnectionId(1);
        registry.register(conn);
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        route.subscribe(
            &registry,
            conn,
            ListenerId("a".into()),
            &json!({"symbol": "AAPL", "resolution": "1"}),
            tx1,
        );
        route.subscribe(
            &registry,
            conn,
            ListenerId("b".into()),
            &json!({"symbol": "MSFT", "resolution": "1"}),
            tx2,
        );
        route.teardown_connection(&registry, conn);
        assert_eq!(engine.removed.lock().len(), 2);
        assert_eq!(route.active_topic_count(), 0);
    }

    #[test]
    fn subscribe_missing_required_field_is_rejected() {
        let (route, engine, registry) = setup();
        let conn = ConnectionId(1);
        registry.register(conn);
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = route.subscribe(&registry, conn, ListenerId("a".into()), &json!({}), tx);
        match outcome {
            SubscribeOutcome::Error { reason } => {
                assert!(reason.contains("symbol"), "unexpected reason: {reason}")
            }
            SubscribeOutcome::Ok { .. } => panic!("expected a validation error"),
        }
        assert!(engine.created.lock().is_empty());
        assert_eq!(route.active_topic_count(), 0);
    }

    #[test]
    fn orders_subscribe_requires_account_id() {
        let engine = CountingEngine::new();
        let route = Route::new("orders", 16, engine.clone());
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId(1);
        registry.register(conn);
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = route.subscribe(
            &registry,
            conn,
            ListenerId("a".into()),
            &json!({"symbol": "AAPL"}),
            tx,
        );
        match outcome {
            SubscribeOutcome::Error { reason } => assert!(reason.contains("accountId")),
            SubscribeOutcome::Ok { .. } => panic!("expected a validation error"),
        }
    }
}
