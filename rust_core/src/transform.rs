//! Static registry of named field transforms.
//!
//! Feed configs reference transforms by name; the name is resolved against
//! this table when the config is loaded, so an unknown name fails at startup
//! instead of at extraction time. Transforms are pure `Value -> Value`.

use crate::error::{FeedError, Result};
use serde_json::Value;

pub type TransformFn = fn(Value) -> Value;

/// Look up a transform by name.
pub fn lookup(name: &str) -> Result<TransformFn> {
    match name {
        "float" => Ok(to_float),
        "int" => Ok(to_int),
        "str" => Ok(to_str),
        "round2" => Ok(round2),
        other => Err(FeedError::Config(format!("unknown transform '{other}'"))),
    }
}

fn to_float(v: Value) -> Value {
    let parsed = match &v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed.and_then(serde_json::Number::from_f64) {
        Some(n) => Value::Number(n),
        None => v,
    }
}

fn to_int(v: Value) -> Value {
    let parsed = match &v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(i) => Value::Number(i.into()),
        None => v,
    }
}

fn to_str(v: Value) -> Value {
    match v {
        Value::String(s) => Value::String(s),
        other => Value::String(other.to_string()),
    }
}

fn round2(v: Value) -> Value {
    match v.as_f64().and_then(|f| {
        serde_json::Number::from_f64((f * 100.0).round() / 100.0)
    }) {
        Some(n) => Value::Number(n),
        None => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_known_names() {
        for name in ["float", "int", "str", "round2"] {
            assert!(lookup(name).is_ok(), "transform '{name}' should resolve");
        }
    }

    #[test]
    fn test_lookup_unknown_name_is_config_error() {
        let err = lookup("eval").unwrap_err();
        assert!(matches!(err, FeedError::Config(_)));
    }

    #[test]
    fn test_to_float_from_string() {
        assert_eq!(to_float(json!("42.5")), json!(42.5));
        assert_eq!(to_float(json!(7)), json!(7.0));
        // Unparseable input passes through untouched
        assert_eq!(to_float(json!("n/a")), json!("n/a"));
    }

    #[test]
    fn test_to_int() {
        assert_eq!(to_int(json!("1027")), json!(1027));
        assert_eq!(to_int(json!(3.9)), json!(3));
    }

    #[test]
    fn test_to_str() {
        assert_eq!(to_str(json!(42)), json!("42"));
        assert_eq!(to_str(json!("BTC")), json!("BTC"));
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(json!(91.679295)), json!(91.68));
    }
}
