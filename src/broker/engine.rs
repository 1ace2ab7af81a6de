//! The broker simulator: order placement, the single background execution
//! simulator task, and the deterministic `executions → orders → equity →
//! positions` cascade.

use crate::broker::accounting::{PositionOutcome, apply_fill};
use crate::config::{BrokerConfig, ExecutionDelay};
use crate::error::FabricError;
use crate::ids::{OrderId, OrderIdGenerator};
use crate::models::{
    Accounting, BrokerConnectionState, BrokerConnectionStatus, Execution, Order, OrderPatch,
    OrderStatus, OrderType, Position, PreOrder, Side,
};
use crate::route::Engine;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Which broker topic kind a topic string belongs to, parsed from its
/// `{route}:` prefix. The engine keys its callback registry by this, not by
/// the full topic string: the single-account simplification that collapses
/// every subscriber to a topic kind onto one shared callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TopicKind {
    Orders,
    Positions,
    Executions,
    Equity,
    BrokerConnection,
}

impl TopicKind {
    fn parse(topic: &str) -> Option<Self> {
        let (route, _) = topic.split_once(':')?;
        Some(match route {
            "orders" => TopicKind::Orders,
            "positions" => TopicKind::Positions,
            "executions" => TopicKind::Executions,
            "equity" => TopicKind::Equity,
            "broker-connection" => TopicKind::BrokerConnection,
            _ => return None,
        })
    }
}

type Publish = Arc<dyn Fn(Value) + Send + Sync>;

/// Mutable broker domain state, held behind one lock so that a cascade's four
/// broadcasts happen without another cascade interleaving between them. The
/// lock is held across the broadcast calls, which are themselves non-blocking
/// enqueue operations, never I/O.
struct BrokerState {
    orders: HashMap<OrderId, Order>,
    positions: HashMap<String, Position>,
    executions: Vec<Execution>,
    accounting: Accounting,
}

/// Implements the `orders`, `positions`, `executions`, `equity`, and
/// `broker-connection` routes behind one shared engine instance.
pub struct BrokerEngine {
    state: Mutex<BrokerState>,
    callbacks: Mutex<HashMap<TopicKind, Publish>>,
    id_gen: OrderIdGenerator,
    /// Last-seen bid/ask per symbol, used to resolve a market order's
    /// reference price when the order carries neither an explicit limit
    /// price nor a `seenPrice`. Populated by whatever REST layer or datafeed
    /// hookup the deployment wires in; the broker engine itself never reads
    /// live quotes on its own.
    quotes: DashMap<String, (f64, f64)>,
    config: BrokerConfig,
    simulator: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    self_ref: Mutex<Weak<BrokerEngine>>,
}

impl BrokerEngine {
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        let starting_balance = config.starting_balance;
        let engine = Arc::new(Self {
            state: Mutex::new(BrokerState {
                orders: HashMap::new(),
                positions: HashMap::new(),
                executions: Vec::new(),
                accounting: Accounting::new(starting_balance),
            }),
            callbacks: Mutex::new(HashMap::new()),
            id_gen: OrderIdGenerator::new(),
            quotes: DashMap::new(),
            config,
            simulator: Mutex::new(None),
            running: AtomicBool::new(false),
            self_ref: Mutex::new(Weak::new()),
        });
        *engine.self_ref.lock() = Arc::downgrade(&engine);
        engine
    }

    /// Updates the last-seen quote for a symbol.
    pub fn update_quote(&self, symbol: &str, bid: f64, ask: f64) {
        self.quotes.insert(symbol.to_string(), (bid, ask));
    }

    pub fn accounting(&self) -> Accounting {
        self.state.lock().accounting
    }

    pub fn order(&self, id: &OrderId) -> Option<Order> {
        self.state.lock().orders.get(id).cloned()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.state.lock().positions.get(symbol).cloned()
    }

    /// Resolves a reference price and inserts a new `Working` order.
    pub fn place_order(&self, pre: PreOrder) -> OrderId {
        let id = self.id_gen.next();
        let reference_price = pre.limit_price.or(pre.seen_price).or_else(|| {
            self.quotes.get(&pre.symbol).map(|q| {
                if pre.side == Side::Buy {
                    q.1
                } else {
                    q.0
                }
            })
        });
        let order = Order {
            id: id.clone(),
            symbol: pre.symbol,
            order_type: pre.order_type,
            side: pre.side,
            qty: pre.qty,
            limit_price: reference_price,
            stop_price: pre.stop_price,
            status: OrderStatus::Working,
            filled_qty: 0,
            avg_price: None,
            update_time: now_ms(),
        };
        self.state.lock().orders.insert(id.clone(), order);
        id
    }

    /// Mutates a still-`Working` order's price or size. Rejects modification
    /// of orders that have already left `Working`.
    pub fn modify_order(&self, id: &OrderId, patch: OrderPatch) -> Result<(), FabricError> {
        let snapshot = {
            let mut state = self.state.lock();
            let order = state
                .orders
                .get_mut(id)
                .ok_or_else(|| FabricError::NotFound(format!("no such order: {id}")))?;
            if order.status != OrderStatus::Working {
                return Err(FabricError::Conflict(format!("order {id} is not working")));
            }
            if let Some(qty) = patch.qty {
                order.qty = qty;
            }
            if let Some(limit_price) = patch.limit_price {
                order.limit_price = Some(limit_price);
            }
            if let Some(stop_price) = patch.stop_price {
                order.stop_price = Some(stop_price);
            }
            order.update_time = now_ms();
            order.clone()
        };
        self.broadcast(TopicKind::Orders, &snapshot);
        Ok(())
    }

    /// Cancels a still-`Working` order.
    pub fn cancel_order(&self, id: &OrderId) -> Result<(), FabricError> {
        let snapshot = {
            let mut state = self.state.lock();
            let order = state
                .orders
                .get_mut(id)
                .ok_or_else(|| FabricError::NotFound(format!("no such order: {id}")))?;
            if order.status != OrderStatus::Working {
                return Err(FabricError::Conflict(format!("order {id} is not working")));
            }
            order.status = OrderStatus::Canceled;
            order.update_time = now_ms();
            order.clone()
        };
        self.broadcast(TopicKind::Orders, &snapshot);
        Ok(())
    }

    fn broadcast<T: serde::Serialize>(&self, kind: TopicKind, payload: &T) {
        if let Some(cb) = self.callbacks.lock().get(&kind) {
            cb(serde_json::to_value(payload).expect("broker payloads always serialize"));
        }
    }

    fn working_order_ids(&self) -> Vec<OrderId> {
        self.state
            .lock()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Working)
            .map(|o| o.id.clone())
            .collect()
    }

    /// The deterministic execution cascade for one chosen order. The state
    /// lock spans all four broadcasts, which is what gives the cascade its
    /// atomicity: nothing in this critical section awaits, so no other
    /// cascade (or a cancellation) can observe it half-applied.
    async fn run_cascade(&self, order_id: OrderId) {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let mut state = self.state.lock();
        let Some(order) = state.orders.get(&order_id).cloned() else {
            return;
        };
        if order.status != OrderStatus::Working {
            return;
        }

        let price = match order.order_type {
            OrderType::Market => order.limit_price.unwrap_or(100.0),
            OrderType::Limit => match order.limit_price {
                Some(p) => p,
                None => {
                    tracing::warn!(order = %order.id, "limit order missing limit price, skipping cascade");
                    return;
                }
            },
            OrderType::Stop => match order.stop_price {
                Some(p) => p,
                None => {
                    tracing::warn!(order = %order.id, "stop order missing stop price, skipping cascade");
                    return;
                }
            },
        };

        let execution = Execution {
            symbol: order.symbol.clone(),
            price,
            qty: order.qty,
            side: order.side,
            time_ms: now_ms(),
        };
        state.executions.push(execution.clone());
        self.broadcast(TopicKind::Executions, &execution);

        {
            let filled = state.orders.get_mut(&order_id).expect("checked above");
            filled.status = OrderStatus::Filled;
            filled.filled_qty = execution.qty;
            filled.avg_price = Some(execution.price);
            filled.update_time = execution.time_ms;
        }
        let order_snapshot = state.orders.get(&order_id).expect("just updated").clone();
        self.broadcast(TopicKind::Orders, &order_snapshot);

        let outcome = apply_fill(&mut state.positions, &mut state.accounting, &execution);
        let equity_snapshot = state.accounting;
        self.broadcast(TopicKind::Equity, &equity_snapshot);

        match outcome {
            PositionOutcome::Upserted(position) => {
                self.broadcast(TopicKind::Positions, &position);
            }
            PositionOutcome::Closed(position) => {
                self.broadcast(TopicKind::Positions, &position);
                state.positions.remove(&position.symbol);
            }
        }
    }

    /// Manually runs one cascade for `order_id`, bypassing the simulator's
    /// random pick and sleep. Used by tests, and by an `executionDelay:
    /// disabled` deployment that drives executions from an external trigger.
    pub async fn trigger_execution(&self, order_id: OrderId) {
        self.run_cascade(order_id).await;
    }

    /// The background simulator loop. Idempotent: a second call while
    /// already running is a no-op.
    fn spawn_simulator(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(engine) = self.self_ref.lock().upgrade() else {
            return;
        };
        let delay = self.config.execution_delay;
        let handle = tokio::spawn(async move {
            loop {
                match delay {
                    ExecutionDelay::Disabled => {
                        // Manual-trigger mode: park forever. Tests and
                        // external drivers call `trigger_execution` directly.
                        std::future::pending::<()>().await;
                    }
                    ExecutionDelay::Fixed(secs) => {
                        tokio::time::sleep(std::time::Duration::from_secs_f64(secs)).await;
                    }
                    ExecutionDelay::Random => {
                        let millis = rand::rng().random_range(1000..=2000);
                        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
                    }
                }
                let working = engine.working_order_ids();
                if working.is_empty() {
                    continue;
                }
                let idx = rand::rng().random_range(0..working.len());
                engine.run_cascade(working[idx].clone()).await;
            }
        });
        *self.simulator.lock() = Some(handle);
    }

    fn cancel_simulator(&self) {
        if let Some(handle) = self.simulator.lock().take() {
            handle.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Aborts the simulator task. Called by the supervisor on shutdown.
    pub fn shutdown(&self) {
        self.cancel_simulator();
    }
}

impl Engine for BrokerEngine {
    fn create_topic(&self, topic: &str, publish: Publish) {
        let Some(kind) = TopicKind::parse(topic) else {
            tracing::warn!(topic, "broker engine asked to create an unknown topic kind");
            return;
        };

        let any_active = {
            let mut callbacks = self.callbacks.lock();
            callbacks.entry(kind).or_insert_with(|| Arc::clone(&publish));
            !callbacks.is_empty()
        };

        // Fires for every first-subscriber transition on a broker-connection
        // topic, via that topic's own `publish`, even though only the first
        // such topic's callback is kept for later broadcasts (the
        // single-account simplification above).
        if kind == TopicKind::BrokerConnection {
            publish(
                serde_json::to_value(BrokerConnectionStatus {
                    status: BrokerConnectionState::Connected,
                    timestamp: now_ms(),
                })
                .expect("status always serializes"),
            );
        }

        if any_active {
            self.spawn_simulator();
        }
    }

    fn remove_topic(&self, topic: &str) {
        let Some(kind) = TopicKind::parse(topic) else {
            return;
        };
        let now_empty = {
            let mut callbacks = self.callbacks.lock();
            callbacks.remove(&kind);
            callbacks.is_empty()
        };
        if now_empty {
            self.cancel_simulator();
        }
    }
}
