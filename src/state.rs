//! Shared application state: the connection registry, every route, and the
//! engines behind them.

use crate::broker::BrokerEngine;
use crate::config::Config;
use crate::datafeed::DatafeedEngine;
use crate::ids::ConnectionIdGenerator;
use crate::registry::ConnectionRegistry;
use crate::route::Route;
use std::collections::HashMap;
use std::sync::Arc;

/// Every route name the fabric exposes, in the order routes are built.
pub const ROUTE_NAMES: &[&str] = &[
    "bars",
    "quotes",
    "orders",
    "positions",
    "executions",
    "equity",
    "broker-connection",
];

/// Process-wide state, built once at startup and shared (via `Arc`) with
/// every connection task and HTTP handler.
pub struct AppState {
    pub config: Config,
    pub connections: ConnectionRegistry,
    pub connection_ids: ConnectionIdGenerator,
    pub routes: HashMap<&'static str, Arc<Route>>,
    pub datafeed: Arc<DatafeedEngine>,
    pub broker: Arc<BrokerEngine>,
}

impl AppState {
    /// Builds the datafeed and broker engines and wires one [`Route`] per
    /// entry in [`ROUTE_NAMES`], sharing the datafeed engine across
    /// `bars`/`quotes` and the broker engine across the remaining five.
    pub fn new(config: Config) -> Arc<Self> {
        let datafeed = DatafeedEngine::new(config.datafeed.clone());
        let broker = BrokerEngine::new(config.broker.clone());
        let capacity = config.server.route_queue_capacity;

        let mut routes = HashMap::new();
        for &name in ROUTE_NAMES {
            let engine: Arc<dyn crate::route::Engine> = match name {
                "bars" | "quotes" => datafeed.clone(),
                _ => broker.clone(),
            };
            routes.insert(name, Arc::new(Route::new(name, capacity, engine)));
        }

        Arc::new(Self {
            config,
            connections: ConnectionRegistry::new(),
            connection_ids: ConnectionIdGenerator::new(),
            routes,
            datafeed,
            broker,
        })
    }

    pub fn route(&self, name: &str) -> Option<Arc<Route>> {
        self.routes.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_one_route_per_name() {
        let state = AppState::new(Config::default());
        for name in ROUTE_NAMES {
            assert!(state.route(name).is_some(), "missing route {name}");
        }
        assert!(state.route("nonexistent").is_none());
    }
}
