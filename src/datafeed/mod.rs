//! Market datafeed engine: generates mock bar and quote updates for every
//! actively subscribed `(symbol, resolution)` or `symbols` topic.
//!
//! Implements [`Engine`](crate::route::Engine) once and is shared by both the
//! `bars` and `quotes` routes; it tells the two topic kinds apart by the
//! route prefix on the topic string.

mod walk;

use crate::config::DatafeedConfig;
use crate::models::{Bar, Quote};
use crate::route::Engine;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use walk::{Walker, base_price_for};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generates periodic bar and quote updates. One background task per active
/// topic, holding no per-subscriber state.
pub struct DatafeedEngine {
    config: DatafeedConfig,
    tasks: DashMap<String, JoinHandle<()>>,
    last_bars: Arc<DashMap<(String, String), Bar>>,
    last_quotes: Arc<DashMap<String, Quote>>,
}

impl DatafeedEngine {
    pub fn new(config: DatafeedConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            tasks: DashMap::new(),
            last_bars: Arc::new(DashMap::new()),
            last_quotes: Arc::new(DashMap::new()),
        })
    }

    pub fn active_generator_count(&self) -> usize {
        self.tasks.len()
    }

    /// Point-in-time read of the last bar generated for `(symbol, resolution)`,
    /// for the REST surface's `GET /datafeed/bars`.
    pub fn last_bar(&self, symbol: &str, resolution: &str) -> Option<Bar> {
        self.last_bars
            .get(&(symbol.to_string(), resolution.to_string()))
            .map(|b| *b)
    }

    /// Point-in-time read of the last quote generated for `symbol`, for
    /// `GET /datafeed/quotes`.
    pub fn last_quote(&self, symbol: &str) -> Option<Quote> {
        self.last_quotes.get(symbol).map(|q| q.clone())
    }

    fn known_symbol(&self, symbol: &str) -> bool {
        self.config.symbols.iter().any(|s| s == symbol)
    }

    /// Aborts every active generator task. Called by the supervisor on
    /// shutdown.
    pub fn shutdown(&self) {
        self.tasks.retain(|_, handle| {
            handle.abort();
            false
        });
    }

    fn spawn_bars_task(
        &self,
        topic: &str,
        params: &Value,
        publish: Arc<dyn Fn(Value) + Send + Sync>,
    ) {
        let symbol = params
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        let resolution = params
            .get("resolution")
            .and_then(Value::as_str)
            .unwrap_or("1")
            .to_string();
        let interval = self.config.interval();
        let last_bars = Arc::clone(&self.last_bars);
        let base = base_price_for(&symbol);
        let key = (symbol, resolution);

        let handle = tokio::spawn(async move {
            let mut walker = Walker::new(base);
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let bar = walker.next_bar(now_ms());
                last_bars.insert(key.clone(), bar);
                publish(serde_json::to_value(bar).expect("Bar always serializes"));
            }
        });
        self.tasks.insert(topic.to_string(), handle);
    }

    fn spawn_quotes_task(
        &self,
        topic: &str,
        params: &Value,
        publish: Arc<dyn Fn(Value) + Send + Sync>,
    ) {
        let symbols: Vec<String> = params
            .get("symbols")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let interval = self.config.interval();
        let last_quotes = Arc::clone(&self.last_quotes);
        let known: Vec<(String, bool)> = symbols
            .iter()
            .map(|s| (s.clone(), self.known_symbol(s)))
            .collect();

        let handle = tokio::spawn(async move {
            let mut walkers: std::collections::HashMap<String, Walker> = known
                .iter()
                .filter(|(_, is_known)| *is_known)
                .map(|(s, _)| (s.clone(), Walker::new(base_price_for(s))))
                .collect();
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for (symbol, is_known) in &known {
                    let quote = if *is_known {
                        let walker = walkers.get_mut(symbol).expect("seeded above");
                        let bar = walker.next_bar(now_ms());
                        let lp = bar.close;
                        Quote::Ok {
                            symbol: symbol.clone(),
                            lp,
                            bid: lp - 0.01,
                            ask: lp + 0.01,
                            ch: bar.close - bar.open,
                            chp: if bar.open != 0.0 {
                                (bar.close - bar.open) / bar.open * 100.0
                            } else {
                                0.0
                            },
                        }
                    } else {
                        Quote::Error {
                            symbol: symbol.clone(),
                            message: "unknown symbol".to_string(),
                        }
                    };
                    last_quotes.insert(symbol.clone(), quote.clone());
                    publish(serde_json::to_value(&quote).expect("Quote always serializes"));
                }
            }
        });
        self.tasks.insert(topic.to_string(), handle);
    }
}

impl Engine for DatafeedEngine {
    fn create_topic(&self, topic: &str, publish: Arc<dyn Fn(Value) + Send + Sync>) {
        if !self.config.enabled {
            return;
        }
        if let Some(rest) = topic.strip_prefix("bars:") {
            let params: Value = serde_json::from_str(rest).unwrap_or(Value::Null);
            self.spawn_bars_task(topic, &params, publish);
        } else if let Some(rest) = topic.strip_prefix("quotes:") {
            let params: Value = serde_json::from_str(rest).unwrap_or(Value::Null);
            self.spawn_quotes_task(topic, &params, publish);
        } else {
            tracing::warn!(topic, "datafeed engine asked to create an unknown topic kind");
        }
    }

    fn remove_topic(&self, topic: &str) {
        if let Some((_, handle)) = self.tasks.remove(topic) {
            handle.abort();
        }
    }
}
