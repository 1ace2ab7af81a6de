//! Random-walk bar and quote generation.
//!
//! The spec calls for a "mock" generator, not a reproducible one, so each
//! topic's walker seeds its own RNG from the process RNG at `create_topic`
//! time rather than from a fixed seed.

use crate::models::Bar;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Magnitude of the uniform percentage step applied to the previous close
/// each tick.
const STEP_PCT: f64 = 0.001;

/// Per-topic random walk state, producing one [`Bar`] per tick.
pub struct Walker {
    rng: StdRng,
    last_close: f64,
}

impl Walker {
    /// Seeds a new walker around `base_price`.
    pub fn new(base_price: f64) -> Self {
        Self {
            rng: StdRng::from_os_rng(),
            last_close: base_price,
        }
    }

    /// Generates the next bar, advancing `last_close` by a random percentage
    /// step. `open` is the previous tick's close; `high`/`low` widen around
    /// `open`/`close` by a smaller independent excursion.
    pub fn next_bar(&mut self, time_ms: i64) -> Bar {
        let open = self.last_close;
        let step = self.rng.random_range(-STEP_PCT..=STEP_PCT);
        let close = (open * (1.0 + step)).max(0.01);
        let excursion = (open.max(close)) * (STEP_PCT / 2.0);
        let high = open.max(close) + self.rng.random_range(0.0..=excursion);
        let low = (open.min(close) - self.rng.random_range(0.0..=excursion)).max(0.01);
        let volume = self.rng.random_range(100..=10_000u64);

        self.last_close = close;
        Bar {
            time: time_ms,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Deterministic base price for a symbol that has never been seen before, so
/// restarts produce a plausible (if arbitrary) starting point without a real
/// reference price feed.
pub fn base_price_for(symbol: &str) -> f64 {
    let sum: u32 = symbol.bytes().map(u32::from).sum();
    100.0 + (sum % 400) as f64
}
