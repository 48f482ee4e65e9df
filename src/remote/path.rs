//! Path parsing and JSON tree navigation.

use crate::error::{Result, SyncError};
use serde_json::{Map, Value};

const FORBIDDEN: &[char] = &['.', '#', '$', '[', ']'];

/// Split a `/`-separated path. The empty path is the root.
pub(crate) fn segments(path: &str) -> Result<Vec<String>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split('/')
        .map(|seg| {
            if seg.is_empty() || seg.contains(FORBIDDEN) {
                Err(SyncError::InvalidPath(path.to_string()))
            } else {
                Ok(seg.to_string())
            }
        })
        .collect()
}

/// Node at `segs`, if present.
pub(crate) fn lookup<'a>(root: &'a Value, segs: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for seg in segs {
        node = node.as_object()?.get(seg)?;
    }
    Some(node)
}

/// Write `value` at `segs`. `null` deletes and prunes emptied parents.
pub(crate) fn set(node: &mut Value, segs: &[String], value: Value) {
    let Some((head, rest)) = segs.split_first() else {
        *node = value;
        return;
    };

    if value.is_null() {
        if let Value::Object(map) = node {
            if rest.is_empty() {
                map.remove(head);
            } else if let Some(child) = map.get_mut(head) {
                set(child, rest, value);
                if is_empty(child) {
                    map.remove(head);
                }
            }
        }
        return;
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set(child, rest, value);
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
