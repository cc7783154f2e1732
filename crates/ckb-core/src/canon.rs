// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON canonicalization for snapshot comparison.
//!
//! Keys sorted, floats rendered with at most six decimals and no trailing
//! zeros, timestamp and duration fields excluded from byte comparison.

use serde_json::Value;
use std::collections::BTreeMap;

/// Field names excluded from canonical byte comparison.
const VOLATILE_SUFFIXES: &[&str] = &["_at", "_ms", "_secs"];
const VOLATILE_NAMES: &[&str] = &["timestamp", "age_secs", "latency_ms", "computed_at"];

fn is_volatile(key: &str) -> bool {
    VOLATILE_NAMES.contains(&key) || VOLATILE_SUFFIXES.iter().any(|s| key.ends_with(s))
}

/// Render a float with at most six decimals and no trailing zeros.
#[must_use]
pub fn canon_f64(v: f64) -> String {
    let s = format!("{v:.6}");
    let s = s.trim_end_matches('0');
    let s = s.trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Produce the canonical string for a JSON value: sorted keys, canonical
/// floats, volatile fields dropped.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if n.is_f64() {
                    out.push_str(&canon_f64(f));
                } else {
                    out.push_str(&n.to_string());
                }
            } else {
                out.push_str(&n.to_string());
            }
        }
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> =
                map.iter().filter(|(k, _)| !is_volatile(k)).collect();
            out.push('{');
            for (i, (k, v)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(
                    &serde_json::to_string(k).expect("string serialization is infallible"),
                );
                out.push(':');
                write_value(v, out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn floats_have_no_trailing_zeros() {
        assert_eq!(canon_f64(0.5), "0.5");
        assert_eq!(canon_f64(0.123456789), "0.123457");
        assert_eq!(canon_f64(1.0), "1");
        assert_eq!(canon_f64(0.0), "0");
        assert_eq!(canon_f64(-0.25), "-0.25");
    }

    #[test]
    fn keys_are_sorted() {
        let v = json!({"zebra": 1, "apple": 2, "mango": 3});
        assert_eq!(canonical_json(&v), r#"{"apple":2,"mango":3,"zebra":1}"#);
    }

    #[test]
    fn volatile_fields_are_dropped() {
        let v = json!({"created_at": "2026-01-01T00:00:00Z", "duration_ms": 12, "name": "x"});
        assert_eq!(canonical_json(&v), r#"{"name":"x"}"#);
    }

    #[test]
    fn nested_structures_canonicalize() {
        let v = json!({"b": [{"y": 1.50, "x": 2}], "a": null});
        assert_eq!(canonical_json(&v), r#"{"a":null,"b":[{"x":2,"y":1.5}]}"#);
    }

    #[test]
    fn identical_inputs_produce_identical_bytes() {
        let a = json!({"score": 0.8000001, "indexed_at": "now", "items": [1, 2]});
        let b = json!({"items": [1, 2], "score": 0.8000001, "indexed_at": "later"});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }
}
