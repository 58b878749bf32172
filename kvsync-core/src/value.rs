//! Structural helpers over `serde_json::Value`.
//!
//! Stored values are plain JSON trees. `Value::Null` and a missing slot both
//! mean "absent". These helpers give the engine an explicit equality contract
//! and the path get/set/merge operations used by partial updates.

use crate::{KvSyncResult, ValidationError};
use serde_json::{Map, Value};

/// Whether the value counts as absent.
pub fn is_absent(value: &Value) -> bool {
    value.is_null()
}

/// Whether the value is an object or an array.
pub fn is_compound(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Short description of a value's kind, used in error messages.
pub fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "absent",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Deep structural equality.
///
/// - arrays compare element-wise, order-sensitive
/// - objects compare by key set and per-key value, insertion order ignored
/// - numbers compare by numeric value, so `1` equals `1.0`
///
/// JSON trees cannot hold NaN or cycles, so neither needs handling here.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x == y {
                return true;
            }
            match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| deep_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Deep equality over optional values, treating `None` and `Null` alike.
pub fn deep_equal_opt(a: Option<&Value>, b: Option<&Value>) -> bool {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    deep_equal(a, b)
}

/// Split a dotted path such as `"user.tags.0"` into segments.
pub fn parse_path(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split('.').map(str::to_string).collect()
}

/// Read the value at `path`, if every segment resolves.
pub fn get_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `new_value` at `path` inside `root`, creating intermediate containers.
///
/// A missing intermediate becomes an array when the next segment is an index
/// and an object otherwise. Walking through a scalar is an error.
pub fn set_path(root: Value, path: &[String], new_value: Value) -> KvSyncResult<Value> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(new_value);
    };

    let mut root = if root.is_null() {
        empty_container_for(first)
    } else {
        root
    };

    let slot = child_slot(&mut root, first, path)?;
    let child = std::mem::take(slot);
    *slot = set_path(child, rest, new_value)?;
    Ok(root)
}

/// Furthest an index may point past the end of an array it grows.
const MAX_INDEX_GAP: usize = 1024;

fn empty_container_for(segment: &str) -> Value {
    if segment.parse::<usize>().is_ok() {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

fn child_slot<'a>(
    container: &'a mut Value,
    segment: &str,
    full_path: &[String],
) -> KvSyncResult<&'a mut Value> {
    match container {
        Value::Object(map) => Ok(map.entry(segment.to_string()).or_insert(Value::Null)),
        Value::Array(items) => {
            let index = segment.parse::<usize>().map_err(|_| ValidationError::InvalidPath {
                path: full_path.join("."),
                reason: format!("segment \"{}\" is not an array index", segment),
            })?;
            if index >= items.len() {
                let len = index
                    .checked_add(1)
                    .filter(|len| *len - items.len() <= MAX_INDEX_GAP)
                    .ok_or_else(|| ValidationError::InvalidPath {
                        path: full_path.join("."),
                        reason: format!(
                            "index {} is more than {} past the end of an array of {}",
                            index,
                            MAX_INDEX_GAP,
                            items.len()
                        ),
                    })?;
                items.resize(len, Value::Null);
            }
            Ok(&mut items[index])
        }
        other => Err(ValidationError::InvalidPath {
            path: full_path.join("."),
            reason: format!("segment \"{}\" crosses {}", segment, describe(other)),
        }
        .into()),
    }
}

/// Recursively merge `source` into `target`.
///
/// Objects merge key by key and arrays merge index by index; any other
/// pairing takes the source value. An absent target yields the source.
pub fn merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut into), Value::Object(from)) => {
            for (key, incoming) in from {
                let existing = into.remove(&key).unwrap_or(Value::Null);
                into.insert(key, merge(existing, incoming));
            }
            Value::Object(into)
        }
        (Value::Array(mut into), Value::Array(from)) => {
            for (index, incoming) in from.into_iter().enumerate() {
                if index < into.len() {
                    let existing = std::mem::take(&mut into[index]);
                    into[index] = merge(existing, incoming);
                } else {
                    into.push(incoming);
                }
            }
            Value::Array(into)
        }
        (_, source) => source,
    }
}

// =============================================================================
// TESTS
// =============================================================================
