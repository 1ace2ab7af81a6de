//! Position and accounting mutation for one executed fill.
//!
//! The three cases, no existing position, same-side add, opposite-side
//! reduce/flip, are pure functions over the engine's own maps so the
//! cascade in [`super::engine`] only has to decide *when* to broadcast, not
//! *how* to compute the numbers.

use crate::models::{Accounting, Execution, Position, Side};
use std::collections::HashMap;

/// What happened to a symbol's position as a result of one fill.
pub enum PositionOutcome {
    /// Position opened, added-to, reduced, or flipped; still open.
    Upserted(Position),
    /// Position fully closed. Carries the `qty=0` snapshot that must be
    /// broadcast before the entry is removed from `positions`.
    Closed(Position),
}

/// Applies `exec`'s accounting and position effects in place, returning the
/// broadcast-worthy result. `accounting.equity` is recomputed before
/// returning, in every branch, so the `equity == balance + unrealizedPL`
/// invariant holds at every broadcast point.
pub fn apply_fill(
    positions: &mut HashMap<String, Position>,
    accounting: &mut Accounting,
    exec: &Execution,
) -> PositionOutcome {
    match positions.remove(&exec.symbol) {
        None => {
            let position = Position {
                symbol: exec.symbol.clone(),
                side: exec.side,
                qty: exec.qty,
                avg_price: exec.price,
            };
            accounting.recompute_equity();
            positions.insert(exec.symbol.clone(), position.clone());
            PositionOutcome::Upserted(position)
        }
        Some(existing) if existing.side == exec.side => {
            let new_qty = existing.qty + exec.qty;
            let new_avg = (existing.avg_price * existing.qty as f64
                + exec.price * exec.qty as f64)
                / new_qty as f64;
            let position = Position {
                symbol: exec.symbol.clone(),
                side: existing.side,
                qty: new_qty,
                avg_price: new_avg,
            };
            // MVP mark price is the fill itself, so a same-side add never
            // moves unrealizedPL for this fill; equity is recomputed anyway
            // for consistency.
            accounting.recompute_equity();
            positions.insert(exec.symbol.clone(), position.clone());
            PositionOutcome::Upserted(position)
        }
        Some(existing) => {
            let fill_qty = existing.qty.min(exec.qty);
            let realized =
                (exec.price - existing.avg_price) * existing.side.sign() * fill_qty as f64;
            accounting.balance += realized;
            accounting.realized_pl += realized;

            let remaining =
                existing.qty as f64 * existing.side.sign() + exec.qty as f64 * exec.side.sign();
            accounting.recompute_equity();

            if remaining.abs() < 0.5 {
                PositionOutcome::Closed(Position {
                    symbol: exec.symbol.clone(),
                    side: existing.side,
                    qty: 0,
                    avg_price: existing.avg_price,
                })
            } else {
                let side = if remaining > 0.0 { Side::Buy } else { Side::Sell };
                let position = Position {
                    symbol: exec.symbol.clone(),
                    side,
                    qty: remaining.abs().round() as u64,
                    avg_price: exec.price,
                };
                positions.insert(exec.symbol.clone(), position.clone());
                PositionOutcome::Upserted(position)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(symbol: &str, price: f64, qty: u64, side: Side) -> Execution {
        Execution {
            symbol: symbol.to_string(),
            price,
            qty,
            side,
            time_ms: 0,
        }
    }

    #[test]
    fn opening_a_position_does_not_touch_realized_pl() {
        let mut positions = HashMap::new();
        let mut accounting = Accounting::new(100_000.0);
        let outcome = apply_fill(&mut positions, &mut accounting, &exec("AAPL", 150.0, 10, Side::Buy));
        match outcome {
            PositionOutcome::Upserted(p) => {
                assert_eq!(p.qty, 10);
                assert_eq!(p.avg_price, 150.0);
            }
            PositionOutcome::Closed(_) => panic!("should not close a fresh position"),
        }
        assert_eq!(accounting.equity, 100_000.0);
        assert_eq!(accounting.realized_pl, 0.0);
    }

    #[test]
    fn same_side_add_averages_up() {
        let mut positions = HashMap::new();
        let mut accounting = Accounting::new(100_000.0);
        apply_fill(&mut positions, &mut accounting, &exec("AAPL", 150.0, 10, Side::Buy));
        let outcome = apply_fill(&mut positions, &mut accounting, &exec("AAPL", 160.0, 10, Side::Buy));
        match outcome {
            PositionOutcome::Upserted(p) => {
                assert_eq!(p.qty, 20);
                assert_eq!(p.avg_price, 155.0);
            }
            _ => panic!("expected an open position"),
        }
    }

    #[test]
    fn opposite_side_full_close_realizes_pl_and_zeroes_qty() {
        let mut positions = HashMap::new();
        let mut accounting = Accounting::new(100_000.0);
        apply_fill(&mut positions, &mut accounting, &exec("AAPL", 150.0, 10, Side::Buy));
        let outcome = apply_fill(&mut positions, &mut accounting, &exec("AAPL", 155.0, 10, Side::Sell));
        match outcome {
            PositionOutcome::Closed(p) => assert_eq!(p.qty, 0),
            _ => panic!("expected closure"),
        }
        assert_eq!(accounting.realized_pl, 50.0);
        assert_eq!(accounting.balance, 100_050.0);
        assert_eq!(accounting.equity, 100_050.0);
    }

    #[test]
    fn opposite_side_oversized_fill_flips_the_position() {
        let mut positions = HashMap::new();
        let mut accounting = Accounting::new(100_000.0);
        apply_fill(&mut positions, &mut accounting, &exec("AAPL", 150.0, 10, Side::Buy));
        let outcome = apply_fill(&mut positions, &mut accounting, &exec("AAPL", 155.0, 15, Side::Sell));
        match outcome {
            PositionOutcome::Upserted(p) => {
                assert_eq!(p.side, Side::Sell);
                assert_eq!(p.qty, 5);
                assert_eq!(p.avg_price, 155.0);
            }
            _ => panic!("expected a flipped position, not a closure"),
        }
        assert_eq!(accounting.realized_pl, 50.0);
    }
}
