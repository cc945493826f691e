//! Built-in scalar functions (§4.4). Each takes already-evaluated
//! arguments and returns a `Value`; arity is enforced centrally by
//! `FunctionRegistry::call_scalar` before the closure runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::FunctionRegistry;
use crate::errors::{EngineError, EngineResult};
use crate::value::Value;

fn arg_err(name: &str) -> EngineError {
    EngineError::runtime(format!("invalid argument to {}", name))
}

pub fn register_builtins(registry: &mut FunctionRegistry) {
    registry.register_scalar("range", "math", "Inclusive integer range, optional step", 2, Some(3), |args| {
        let start = expect_int(&args[0], "range")?;
        let end = expect_int(&args[1], "range")?;
        let step = if args.len() == 3 { expect_int(&args[2], "range")? } else { 1 };
        if step == 0 {
            return Err(EngineError::runtime("range step must not be zero"));
        }
        let mut out = Vec::new();
        let mut i = start;
        if step > 0 {
            while i <= end {
                out.push(Value::Integer(i));
                i += step;
            }
        } else {
            while i >= end {
                out.push(Value::Integer(i));
                i += step;
            }
        }
        Ok(Value::Array(out))
    });

    registry.register_scalar("size", "collection", "Length of an array, string, or map", 1, Some(1), |args| {
        Ok(Value::Integer(match &args[0] {
            Value::Array(a) => a.len() as i64,
            Value::Path(p) => p.len() as i64,
            Value::String(s) => s.chars().count() as i64,
            Value::Map(m) => m.len() as i64,
            Value::Null => 0,
            other => return Err(arg_err_value("size", other)),
        }))
    });

    registry.register_scalar("split", "string", "Splits a string on a separator", 2, Some(2), |args| {
        let s = expect_str(&args[0], "split")?;
        let sep = expect_str(&args[1], "split")?;
        let parts: Vec<Value> = if sep.is_empty() {
            s.chars().map(|c| Value::String(c.to_string())).collect()
        } else {
            s.split(sep).map(|p| Value::String(p.to_string())).collect()
        };
        Ok(Value::Array(parts))
    });

    registry.register_scalar("join", "string", "Joins an array of strings with a separator", 1, Some(2), |args| {
        let arr = expect_array(&args[0], "join")?;
        let sep = if args.len() == 2 { expect_str(&args[1], "join")? } else { "" };
        let parts: Vec<String> = arr
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Err(arg_err_value("join", other)),
            })
            .collect::<EngineResult<_>>()?;
        Ok(Value::String(parts.join(sep)))
    });

    registry.register_scalar("replace", "string", "Replaces all occurrences of a substring", 3, Some(3), |args| {
        let s = expect_str(&args[0], "replace")?;
        let from = expect_str(&args[1], "replace")?;
        let to = expect_str(&args[2], "replace")?;
        Ok(Value::String(s.replace(from, to)))
    });

    registry.register_scalar("keys", "collection", "Keys of a map or node/relationship properties", 1, Some(1), |args| {
        let keys: Vec<Value> = match &args[0] {
            Value::Map(m) => m.keys().cloned().map(Value::String).collect(),
            Value::Node(n) => n.properties.keys().cloned().map(Value::String).collect(),
            Value::Relationship(r) => r.properties.keys().cloned().map(Value::String).collect(),
            other => return Err(arg_err_value("keys", other)),
        };
        Ok(Value::Array(keys))
    });

    registry.register_scalar("type", "introspection", "Dynamic type name of a value", 1, Some(1), |args| {
        Ok(Value::String(args[0].type_name().to_string()))
    });

    registry.register_scalar("tointeger", "conversion", "Converts to an integer, or null if not possible", 1, Some(1), |args| {
        Ok(match &args[0] {
            Value::Integer(i) => Value::Integer(*i),
            Value::Float(f) => Value::Integer(*f as i64),
            Value::String(s) => s.trim().parse::<i64>().map(Value::Integer).unwrap_or(Value::Null),
            Value::Bool(b) => Value::Integer(if *b { 1 } else { 0 }),
            _ => Value::Null,
        })
    });

    registry.register_scalar("tolower", "string", "Lowercases a string", 1, Some(1), |args| {
        Ok(Value::String(expect_str(&args[0], "toLower")?.to_lowercase()))
    });

    registry.register_scalar("toupper", "string", "Uppercases a string", 1, Some(1), |args| {
        Ok(Value::String(expect_str(&args[0], "toUpper")?.to_uppercase()))
    });

    registry.register_scalar("head", "collection", "First element of an array", 1, Some(1), |args| {
        Ok(expect_array(&args[0], "head")?.first().cloned().unwrap_or(Value::Null))
    });

    registry.register_scalar("last", "collection", "Last element of an array", 1, Some(1), |args| {
        Ok(expect_array(&args[0], "last")?.last().cloned().unwrap_or(Value::Null))
    });

    registry.register_scalar("round", "math", "Rounds to the nearest integer, or to N decimal places", 1, Some(2), |args| {
        let f = args[0].as_f64().ok_or_else(|| arg_err("round"))?;
        if args.len() == 2 {
            let places = expect_int(&args[1], "round")? as i32;
            let factor = 10f64.powi(places);
            Ok(Value::Float((f * factor).round() / factor))
        } else {
            Ok(Value::Integer(f.round() as i64))
        }
    });

    registry.register_scalar("rand", "math", "Pseudo-random float in [0, 1) seeded by a hash of the call site", 0, Some(1), |args| {
        // Deterministic by design (no wall-clock/OS entropy source is part
        // of this engine's contract): derived from an optional seed
        // argument, or a fixed default seed otherwise.
        let seed = if let Some(v) = args.first() { v.dedup_key() } else { "flowquery-rand".to_string() };
        let mut hash: u64 = 1469598103934665603;
        for b in seed.bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        Ok(Value::Float((hash % 1_000_000) as f64 / 1_000_000.0))
    });

    registry.register_scalar("tojson", "conversion", "Serializes a value to a JSON string", 1, Some(1), |args| {
        let json: serde_json::Value = args[0].clone().into();
        Ok(Value::String(serde_json::to_string(&json).map_err(|e| EngineError::runtime(e.to_string()))?))
    });

    registry.register_scalar("stringify", "conversion", "Parses a JSON string back into a value", 1, Some(1), |args| {
        let s = expect_str(&args[0], "stringify")?;
        let json: serde_json::Value = serde_json::from_str(s).map_err(|e| EngineError::runtime(e.to_string()))?;
        Ok(Value::from(json))
    });

    registry.register_scalar("coalesce", "logic", "First non-null argument", 1, None, |args| {
        Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
    });

    registry.register_scalar("substring", "string", "Substring starting at a 0-based offset with optional length", 2, Some(3), |args| {
        let s = expect_str(&args[0], "substring")?;
        let chars: Vec<char> = s.chars().collect();
        let start = expect_int(&args[1], "substring")?.max(0) as usize;
        let len = if args.len() == 3 { Some(expect_int(&args[2], "substring")?.max(0) as usize) } else { None };
        if start >= chars.len() {
            return Ok(Value::String(String::new()));
        }
        let end = match len {
            Some(l) => (start + l).min(chars.len()),
            None => chars.len(),
        };
        Ok(Value::String(chars[start..end].iter().collect()))
    });

    registry.register_scalar("string_distance", "string", "Levenshtein edit distance between two strings", 2, Some(2), |args| {
        let a = expect_str(&args[0], "string_distance")?;
        let b = expect_str(&args[1], "string_distance")?;
        Ok(Value::Integer(levenshtein(a, b) as i64))
    });

    registry.register_scalar("id", "graph", "The `id` field of a node or relationship", 1, Some(1), |args| {
        Ok(match &args[0] {
            Value::Node(n) => (*n.id).clone(),
            Value::Relationship(_) => Value::Null,
            other => return Err(arg_err_value("id", other)),
        })
    });

    registry.register_scalar("nodes", "graph", "The node sequence of a bound path", 1, Some(1), |args| {
        match &args[0] {
            Value::Path(p) => Ok(Value::Array(p.iter().filter(|v| matches!(v, Value::Node(_))).cloned().collect())),
            other => Err(arg_err_value("nodes", other)),
        }
    });

    registry.register_scalar("datetime", "temporal", "Current or parsed ISO-8601 datetime string", 0, Some(1), |args| {
        Ok(Value::String(match args.first() {
            None => Utc::now().to_rfc3339(),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|d| d.to_rfc3339())
                .map_err(|e| EngineError::runtime(format!("invalid datetime: {}", e)))?,
            Some(other) => return Err(arg_err_value("datetime", other)),
        }))
    });

    registry.register_scalar("time", "temporal", "Current or parsed time-of-day string", 0, Some(1), |args| {
        Ok(Value::String(match args.first() {
            None => Utc::now().format("%H:%M:%S%.3f").to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(arg_err_value("time", other)),
        }))
    });

    registry.register_scalar("duration", "temporal", "Builds a duration map from a component map, in seconds", 1, Some(1), |args| {
        let map = match &args[0] {
            Value::Map(m) => m,
            other => return Err(arg_err_value("duration", other)),
        };
        let component = |key: &str, factor: i64| -> i64 {
            map.get(key).and_then(|v| v.as_f64()).map(|f| (f * factor as f64) as i64).unwrap_or(0)
        };
        let seconds = component("days", 86_400)
            + component("hours", 3_600)
            + component("minutes", 60)
            + component("seconds", 1);
        let mut out = BTreeMap::new();
        out.insert("seconds".to_string(), Value::Integer(seconds));
        Ok(Value::Map(out))
    });
}

fn expect_int(v: &Value, fname: &str) -> EngineResult<i64> {
    match v {
        Value::Integer(i) => Ok(*i),
        Value::Float(f) => Ok(*f as i64),
        _ => Err(arg_err(fname)),
    }
}

fn expect_str(v: &Value, fname: &str) -> EngineResult<&str> {
    v.as_str().ok_or_else(|| arg_err(fname))
}

fn expect_array(v: &Value, fname: &str) -> EngineResult<&[Value]> {
    v.as_array().ok_or_else(|| arg_err(fname))
}

fn arg_err_value(fname: &str, v: &Value) -> EngineError {
    EngineError::runtime(format!("{} does not accept a {} argument", fname, v.type_name()))
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_inclusive() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry.call_scalar("range", &[Value::Integer(1), Value::Integer(3)]).unwrap();
        assert_eq!(result, Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]));
    }

    #[test]
    fn split_join_round_trip() {
        let registry = FunctionRegistry::with_builtins();
        let arr = registry.call_scalar("split", &[Value::String("a,b,c".into()), Value::String(",".into())]).unwrap();
        let joined = registry.call_scalar("join", &[arr, Value::String(",".into())]).unwrap();
        assert_eq!(joined, Value::String("a,b,c".into()));
    }

    #[test]
    fn tojson_stringify_round_trip() {
        let registry = FunctionRegistry::with_builtins();
        let original = Value::Integer(42);
        let json = registry.call_scalar("tojson", &[original.clone()]).unwrap();
        let back = registry.call_scalar("stringify", &[json]).unwrap();
        assert!(original.deep_eq(&back));
    }

    #[test]
    fn coalesce_returns_first_non_null() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry.call_scalar("coalesce", &[Value::Null, Value::Null, Value::Integer(5)]).unwrap();
        assert_eq!(result, Value::Integer(5));
    }

    #[test]
    fn string_distance_identical_strings_is_zero() {
        let registry = FunctionRegistry::with_builtins();
        let result = registry
            .call_scalar("string_distance", &[Value::String("abc".into()), Value::String("abc".into())])
            .unwrap();
        assert_eq!(result, Value::Integer(0));
    }

    #[test]
    fn arity_mismatch_is_semantic_error() {
        let registry = FunctionRegistry::with_builtins();
        let err = registry.call_scalar("split", &[Value::String("a".into())]).unwrap_err();
        assert!(format!("{}", err).contains("expected"));
    }
}
