//! The broker execution simulator: order lifecycle, a background fill
//! generator, and the accounting cascade that keeps positions and equity in
//! sync with executions.

mod accounting;
mod engine;

pub use engine::BrokerEngine;
