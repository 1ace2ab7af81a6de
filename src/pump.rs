//! Per-route broadcast pump: a bounded outbound queue drained by a single
//! worker task that fans each update out to every connection subscribed to
//! its topic.
//!
//! The queue is a plain `VecDeque` behind a lock rather than
//! `tokio::sync::broadcast`, because the spec's backpressure policy ("drop
//! the oldest item for the route, increment a counter") needs an explicit
//! drop-oldest queue; a broadcast channel drops the *slow receiver*, not the
//! oldest item, which is a different failure mode.

use crate::ids::ConnectionId;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use parking_lot::Mutex as QueueMutex;
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// One unit of outbound work: a topic and the payload to publish to it.
#[derive(Debug, Clone)]
struct Enqueued {
    topic: String,
    payload: Value,
}

/// One connection's outbound channel for a topic, gated by `confirmed` so the
/// drain loop enforces "no update before the subscribe is acknowledged" on
/// its own, rather than depending on the caller never enqueueing before
/// confirming.
struct Subscriber {
    sender: UnboundedSender<Value>,
    confirmed: AtomicBool,
}

/// Per-route broadcast pump.
pub struct BroadcastPump {
    route: &'static str,
    capacity: usize,
    queue: QueueMutex<VecDeque<Enqueued>>,
    notify: Notify,
    subscribers: DashMap<String, DashMap<ConnectionId, Subscriber>>,
    dropped: AtomicU64,
}

impl BroadcastPump {
    pub fn new(route: &'static str, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            route,
            capacity,
            queue: QueueMutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            subscribers: DashMap::new(),
            dropped: AtomicU64::new(0),
        })
    }

    /// Registers `sender` to receive `{route}.update` envelopes for `topic`,
    /// initially unconfirmed. The drain loop will not deliver to it until
    /// [`Self::confirm`] is called.
    pub fn subscribe(&self, topic: &str, connection: ConnectionId, sender: UnboundedSender<Value>) {
        self.subscribers.entry(topic.to_string()).or_default().insert(
            connection,
            Subscriber {
                sender,
                confirmed: AtomicBool::new(false),
            },
        );
    }

    /// Marks `connection`'s subscription to `topic` as confirmed, making it
    /// eligible to receive updates from the drain loop.
    pub fn confirm(&self, topic: &str, connection: ConnectionId) {
        if let Some(conns) = self.subscribers.get(topic) {
            if let Some(sub) = conns.get(&connection) {
                sub.confirmed.store(true, Ordering::Release);
            }
        }
    }

    /// Removes `connection` from `topic`'s subscriber set.
    pub fn unsubscribe(&self, topic: &str, connection: ConnectionId) {
        if let Some(conns) = self.subscribers.get(topic) {
            conns.remove(&connection);
        }
    }

    /// Queues `payload` for delivery to `topic`'s subscribers. Non-blocking:
    /// if the queue is at capacity the oldest entry is dropped and
    /// `broadcasts_dropped` is incremented.
    pub fn enqueue(&self, topic: impl Into<String>, payload: Value) {
        let item = Enqueued {
            topic: topic.into(),
            payload,
        };
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(route = self.route, "broadcast pump queue full, dropped oldest entry");
            }
            queue.push_back(item);
        }
        self.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn active_topic_count(&self) -> usize {
        self.subscribers.iter().filter(|e| !e.is_empty()).count()
    }

    /// Spawns the drain task. Returns its `JoinHandle` so the supervisor can
    /// cancel it on shutdown. `on_send_failure` is invoked (outside the send
    /// path) for any connection whose channel is closed, so the caller can
    /// schedule its teardown; the pump itself never retries a failed send.
    pub fn spawn(
        self: Arc<Self>,
        on_send_failure: Arc<dyn Fn(ConnectionId) + Send + Sync>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let item = {
                    let mut queue = self.queue.lock();
                    queue.pop_front()
                };
                let Some(item) = item else {
                    self.notify.notified().await;
                    continue;
                };
                let envelope = serde_json::json!({
                    "type": format!("{}.update", self.route),
                    "payload": { "topic": item.topic, "payload": item.payload },
                });
                if let Some(conns) = self.subscribers.get(&item.topic) {
                    let mut dead = Vec::new();
                    for entry in conns.iter() {
                        if !entry.value().confirmed.load(Ordering::Acquire) {
                            continue;
                        }
                        if entry.value().sender.send(envelope.clone()).is_err() {
                            dead.push(*entry.key());
                        }
                    }
                    drop(conns);
                    for id in dead {
                        if let Some(conns) = self.subscribers.get(&item.topic) {
                            conns.remove(&id);
                        }
                        on_send_failure(id);
                    }
                }
            }
        })
    }
}
