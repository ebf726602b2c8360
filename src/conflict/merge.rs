// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Generic field-level merge for `MergeCompatible`.
//!
//! | local \ cloud  | list        | number | object    | other scalar |
//! |----------------|-------------|--------|-----------|--------------|
//! | list           | union       | hook   | hook      | hook         |
//! | number         | hook        | max    | hook      | newer        |
//! | object         | hook        | hook   | recurse   | hook         |
//! | other scalar   | hook        | newer  | hook      | newer        |
//!
//! "hook" cells go to the caller's [`FieldMerger`](super::FieldMerger). When
//! there is none, or it declines, the whole merge is abandoned.

use serde_json::{Map, Value};

use super::FieldMerger;

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// Merge two payload values. `None` means the generic contract could not
/// merge them and the caller should fall back.
pub(crate) fn merge_values(
    path: &str,
    local: &Value,
    cloud: &Value,
    local_newer: bool,
    hook: Option<&FieldMerger>,
) -> Option<Value> {
    if local == cloud {
        return Some(local.clone());
    }

    match (local, cloud) {
        (Value::Array(l), Value::Array(c)) => Some(Value::Array(union(l, c))),
        (Value::Number(l), Value::Number(c)) => {
            let lf = l.as_f64().unwrap_or(f64::MIN);
            let cf = c.as_f64().unwrap_or(f64::MIN);
            Some(if lf > cf { local.clone() } else { cloud.clone() })
        }
        (Value::Object(l), Value::Object(c)) => merge_objects(path, l, c, local_newer, hook).map(Value::Object),
        (l, c) if is_scalar(l) && is_scalar(c) => Some(if local_newer { l.clone() } else { c.clone() }),
        (l, c) => hook.and_then(|merge| merge(path, l, c)),
    }
}

fn merge_objects(
    path: &str,
    local: &Map<String, Value>,
    cloud: &Map<String, Value>,
    local_newer: bool,
    hook: Option<&FieldMerger>,
) -> Option<Map<String, Value>> {
    let mut merged = Map::new();

    for (key, l) in local {
        let field_path = join(path, key);
        let value = match cloud.get(key) {
            Some(c) => merge_values(&field_path, l, c, local_newer, hook)?,
            None => l.clone(),
        };
        merged.insert(key.clone(), value);
    }
    for (key, c) in cloud {
        if !local.contains_key(key) {
            merged.insert(key.clone(), c.clone());
        }
    }

    Some(merged)
}

/// Local order first, then cloud items not already present.
fn union(local: &[Value], cloud: &[Value]) -> Vec<Value> {
    let mut out = local.to_vec();
    for item in cloud {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}
