//! Helpers for walking semantic document trees.
//!
//! Paths use dot notation for object keys and brackets for array
//! indices: `services[0].goal_number`.

use std::collections::BTreeMap;

use serde_json::Value;

/// Present and carrying content: not null, not blank text, not an empty collection.
pub fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Append an object key to a path.
pub fn join_key(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Append an array index to a path.
pub fn join_index(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}

/// Look up a dotted path of object keys (no indices).
pub fn lookup<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(tree);
    }
    path.split('.')
        .try_fold(tree, |node, key| node.as_object().and_then(|map| map.get(key)))
}

/// Flatten a tree into leaf paths.
///
/// Scalars, empty arrays and empty objects are leaves.
pub fn flatten_leaves(tree: &Value) -> BTreeMap<String, &Value> {
    let mut leaves = BTreeMap::new();
    collect_leaves(tree, String::new(), &mut leaves);
    leaves
}

fn collect_leaves<'a>(node: &'a Value, path: String, out: &mut BTreeMap<String, &'a Value>) {
    match node {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_leaves(child, join_key(&path, key), out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                collect_leaves(child, join_index(&path, i), out);
            }
        }
        _ => {
            out.insert(path, node);
        }
    }
}

/// Canonical text used to compare scalar keys across collections.
///
/// `3`, `3.0` and `" 3 "` all compare equal.
pub fn reference_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<f64>() {
                Ok(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", n as i64)),
                _ => Some(trimmed.to_string()),
            }
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", f as i64)),
            _ => Some(n.to_string()),
        },
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
