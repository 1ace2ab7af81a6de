//! Wire-level domain types shared by the datafeed and broker engines: orders,
//! positions, executions, accounting, bars, and quotes.

use crate::ids::OrderId;
use serde::{Deserialize, Serialize};

/// Buy or sell. `sign()` gives the convention used throughout the accounting
/// math: `buy` contributes positively to a signed quantity, `sell` negatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Order type, determining how the execution price is resolved in the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Working,
    Filled,
    Rejected,
    Canceled,
}

/// A broker order. `limit_price`/`stop_price` are populated according to
/// `order_type`; `avg_price`/`update_time` are set once the order leaves
/// `Working`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: Side,
    pub qty: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    pub status: OrderStatus,
    pub filled_qty: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_price: Option<f64>,
    pub update_time: i64,
}

/// A client's incoming order request, before an [`OrderId`] has been assigned.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreOrder {
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: Side,
    pub qty: u64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    /// Last observed quote price at order-entry time, used to resolve a
    /// market order's reference price when no live quote is wired in.
    pub seen_price: Option<f64>,
}

/// A request to modify a still-`Working` order's price or size.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OrderPatch {
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub qty: Option<u64>,
}

/// A held position in one symbol. `qty` is always non-negative; the sign of
/// the exposure is carried by `side`. A `qty == 0` position is broadcast once
/// to announce closure, then removed from the engine's map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub qty: u64,
    pub avg_price: f64,
}

/// One simulated fill. `time_ms` keeps its snake_case wire name explicitly,
/// unlike the rest of the broker domain's camelCase fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub symbol: String,
    pub price: f64,
    pub qty: u64,
    pub side: Side,
    #[serde(rename = "time_ms")]
    pub time_ms: i64,
}

/// Account-level rollup. `equity == balance + unrealized_pl` is a standing
/// invariant checked after every mutation. `realized_pl`/`unrealized_pl` are
/// spelled out on the wire as `realizedPL`/`unrealizedPL`, which plain
/// `camelCase` renaming doesn't produce on its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accounting {
    pub balance: f64,
    #[serde(rename = "realizedPL")]
    pub realized_pl: f64,
    #[serde(rename = "unrealizedPL")]
    pub unrealized_pl: f64,
    pub equity: f64,
}

impl Accounting {
    pub fn new(starting_balance: f64) -> Self {
        Self {
            balance: starting_balance,
            realized_pl: 0.0,
            unrealized_pl: 0.0,
            equity: starting_balance,
        }
    }

    /// Recomputes `equity` from `balance` and `unrealized_pl`. Call after any
    /// mutation to the other two fields.
    pub fn recompute_equity(&mut self) {
        self.equity = self.balance + self.unrealized_pl;
    }
}

/// Broker connection lifecycle status, published once on subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConnectionStatus {
    pub status: BrokerConnectionState,
    pub timestamp: i64,
}

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// A quote for one symbol: either a live value or an error string for an
/// unknown symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Quote {
    Ok {
        symbol: String,
        lp: f64,
        bid: f64,
        ask: f64,
        ch: f64,
        chp: f64,
    },
    Error {
        symbol: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_sign_convention() {
        assert_eq!(Side::Buy.sign(), 1.0);
        assert_eq!(Side::Sell.sign(), -1.0);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn accounting_equity_invariant() {
        let mut acc = Accounting::new(100_000.0);
        acc.realized_pl = 50.0;
        acc.balance += 50.0;
        acc.unrealized_pl = -10.0;
        acc.recompute_equity();
        assert_eq!(acc.equity, 100_040.0);
    }

    #[test]
    fn order_serializes_without_unset_optionals() {
        let order = Order {
            id: OrderId("ORDER-1".to_string()),
            symbol: "AAPL".to_string(),
            order_type: OrderType::Market,
            side: Side::Buy,
            qty: 10,
            limit_price: None,
            stop_price: None,
            status: OrderStatus::Working,
            filled_qty: 0,
            avg_price: None,
            update_time: 0,
        };
        let json = serde_json::to_string(&order).unwrap();
        assert!(!json.contains("limit_price"));
        assert!(!json.contains("avg_price"));
    }

    #[test]
    fn order_wire_shape_is_camel_case() {
        let order = Order {
            id: OrderId("ORDER-1".to_string()),
            symbol: "AAPL".to_string(),
            order_type: OrderType::Market,
            side: Side::Buy,
            qty: 10,
            limit_price: Some(150.0),
            stop_price: None,
            status: OrderStatus::Filled,
            filled_qty: 10,
            avg_price: Some(150.0),
            update_time: 1234,
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["filledQty"], 10);
        assert_eq!(json["avgPrice"], 150.0);
        assert_eq!(json["updateTime"], 1234);
        assert_eq!(json["limitPrice"], 150.0);
        assert!(json.get("filled_qty").is_none());
    }

    #[test]
    fn accounting_wire_shape_uses_pl_suffix() {
        let mut acc = Accounting::new(100_000.0);
        acc.realized_pl = 50.0;
        acc.unrealized_pl = -10.0;
        acc.recompute_equity();
        let json = serde_json::to_value(acc).unwrap();
        assert_eq!(json["realizedPL"], 50.0);
        assert_eq!(json["unrealizedPL"], -10.0);
        assert!(json.get("realized_pl").is_none());
    }

    #[test]
    fn execution_wire_shape_keeps_time_ms_snake_case() {
        let exec = Execution {
            symbol: "AAPL".to_string(),
            price: 150.0,
            qty: 10,
            side: Side::Buy,
            time_ms: 999,
        };
        let json = serde_json::to_value(&exec).unwrap();
        assert_eq!(json["time_ms"], 999);
        assert!(json.get("timeMs").is_none());
    }

    #[test]
    fn quote_error_variant_round_trips() {
        let q = Quote::Error {
            symbol: "ZZZZ".to_string(),
            message: "unknown symbol".to_string(),
        };
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["symbol"], "ZZZZ");
    }
}
