//! # Market Event Fabric
//!
//! A real-time market data and broker event fabric served over WebSocket:
//! bars and quotes from a mock datafeed engine, and orders/positions/
//! executions/equity/broker-connection from a simulated broker engine.
//!
//! ## Key pieces
//!
//! - **Topic Builder** (`topic`): canonical JSON topic-string construction.
//! - **Route** (`route`): generic subscribe/unsubscribe state machine shared
//!   by every logical stream, parameterized over an `Engine` capability.
//! - **Broadcast Pump** (`pump`): per-route bounded, drop-oldest outbound queue.
//! - **Datafeed Engine** (`datafeed`): periodic random-walk bar/quote generator.
//! - **Broker Engine** (`broker`): order lifecycle, execution simulator, and
//!   the deterministic accounting cascade.
//!
//! Structured logging via `tracing`, configuration via `toml` + `serde`, and
//! no persisted state: a process restart clears every order, position, and
//! subscription.

pub mod api;
pub mod broker;
pub mod config;
pub mod datafeed;
pub mod error;
pub mod ids;
pub mod models;
pub mod pump;
pub mod registry;
pub mod route;
pub mod state;
pub mod supervisor;
pub mod topic;
