//! Canonical topic-string construction.
//!
//! A topic is `"{route}:{canonical-params}"`. The canonical form of a
//! parameter record is a deterministic, whitespace-free JSON rendering with
//! object keys sorted lexicographically. Two parameter records with the same
//! key-value pairs in any order MUST produce byte-identical topics, because
//! the datafeed and broker engines match on the topic string alone.

use crate::error::FabricError;
use serde_json::Value;

/// Builds the canonical topic string for a route and a parameter record.
///
/// `params` is typically an object (the common case) but any JSON value is
/// accepted; non-object top-level values are canonicalized the same way a
/// nested value would be.
pub fn build_topic(route: &str, params: &Value) -> Result<String, FabricError> {
    let canonical = canonicalize(params)?;
    Ok(format!("{route}:{canonical}"))
}

/// Recursively renders a [`Value`] into its canonical string form.
///
/// `null` (including an absent/omitted field, which `serde_json` also
/// represents as `Value::Null` once defaulted) canonicalizes to the empty
/// string. Anything `serde_json::Value` cannot express (it has no variant for
/// functions or raw binary) cannot reach this function in the first place, so
/// the only failure path is a nested `Value::Null` appearing where a route's
/// schema requires a concrete scalar, and callers that need that distinction
/// validate before calling `canonicalize`.
fn canonicalize(value: &Value) -> Result<String, FabricError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => serde_json::to_string(s).map_err(|e| FabricError::InvalidParams {
            reason: e.to_string(),
        }),
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(canonicalize(item)?);
            }
            Ok(format!("[{}]", parts.join(",")))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut parts = Vec::with_capacity(keys.len());
            for key in keys {
                let key_json = serde_json::to_string(key).map_err(|e| FabricError::InvalidParams {
                    reason: e.to_string(),
                })?;
                let val = canonicalize(&map[key])?;
                parts.push(format!("{key_json}:{val}"));
            }
            Ok(format!("{{{}}}", parts.join(",")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys() {
        let a = build_topic("bars", &json!({"symbol": "AAPL", "resolution": "1"})).unwrap();
        let b = build_topic("bars", &json!({"resolution": "1", "symbol": "AAPL"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"bars:{"resolution":"1","symbol":"AAPL"}"#);
    }

    #[test]
    fn no_whitespace_ever() {
        let t = build_topic("orders", &json!({"accountId": "TEST-001", "symbol": "AAPL"}))
            .unwrap();
        assert!(!t.contains(' '));
        assert_eq!(t, r#"orders:{"accountId":"TEST-001","symbol":"AAPL"}"#);
    }

    #[test]
    fn null_becomes_empty_string() {
        let t = build_topic("quotes", &json!({"symbol": Value::Null})).unwrap();
        assert_eq!(t, r#"quotes:{"symbol":}"#);
    }

    #[test]
    fn arrays_preserve_order() {
        let t = build_topic("quotes", &json!({"symbols": ["AAPL", "MSFT"]})).unwrap();
        assert_eq!(t, r#"quotes:{"symbols":["AAPL","MSFT"]}"#);
    }

    #[test]
    fn nested_objects_canonicalize_recursively() {
        let a = build_topic("x", &json!({"b": {"z": 1, "a": 2}, "a": 1})).unwrap();
        let b = build_topic("x", &json!({"a": 1, "b": {"a": 2, "z": 1}})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let params = json!({"symbol": "AAPL", "resolution": "5"});
        let once = build_topic("bars", &params).unwrap();
        let reparsed: Value = serde_json::from_str(&once.split_once(':').unwrap().1).unwrap();
        let twice = build_topic("bars", &reparsed).unwrap();
        assert_eq!(once, twice);
    }
}
