//! Strongly typed identifiers used across the fabric.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a broker order. Wraps a string so call sites cannot confuse an
/// order id with a symbol or a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic generator for [`OrderId`] values, formatted `ORDER-<n>`.
#[derive(Debug, Default)]
pub struct OrderIdGenerator {
    next: AtomicU64,
}

impl OrderIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> OrderId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        OrderId(format!("ORDER-{n}"))
    }
}

/// Identifies one accepted WebSocket connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Monotonic generator for [`ConnectionId`] values.
#[derive(Debug, Default)]
pub struct ConnectionIdGenerator {
    next: AtomicU64,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifies a single subscribe request from a client, used to resolve an
/// unsubscribe back to its topic without the client having to resend params.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub String);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_increment() {
        let gen = OrderIdGenerator::new();
        assert_eq!(gen.next(), OrderId("ORDER-1".to_string()));
        assert_eq!(gen.next(), OrderId("ORDER-2".to_string()));
    }

    #[test]
    fn connection_ids_increment() {
        let gen = ConnectionIdGenerator::new();
        assert_eq!(gen.next(), ConnectionId(1));
        assert_eq!(gen.next(), ConnectionId(2));
    }

    #[test]
    fn order_id_display() {
        assert_eq!(OrderId("ORDER-7".to_string()).to_string(), "ORDER-7");
    }
}
