//! JSON tree helpers shared by the in-memory store and the streaming client.
//!
//! Paths are sequences of object keys. Writing `null` removes a key, and
//! objects left empty by a removal are pruned, matching realtime-database
//! semantics where empty nodes do not exist.

use serde_json::{Map, Value};

/// Value at `segments` under `root`, if any.
pub(crate) fn get<'a, 'b>(
    root: &'a Value,
    segments: impl IntoIterator<Item = &'b str>,
) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    (!node.is_null()).then_some(node)
}

/// Replace the value at `segments` under `root`.
pub(crate) fn set(root: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove(root, segments);
        return;
    }

    let mut node = root;
    for segment in parents {
        node = ensure_object(node)
            .entry((*segment).to_string())
            .or_insert(Value::Null);
    }
    ensure_object(node).insert((*last).to_string(), value);
}

/// Merge the children of `patch` into the object at `segments`.
#[cfg(feature = "firebase")]
pub(crate) fn merge(root: &mut Value, segments: &[&str], patch: Map<String, Value>) {
    for (key, value) in patch {
        let mut child: Vec<&str> = segments.to_vec();
        child.extend(key.split('/').filter(|s| !s.is_empty()));
        set(root, &child, value);
    }
}

fn remove(root: &mut Value, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else {
        *root = Value::Null;
        return;
    };
    let Some(object) = root.as_object_mut() else {
        return;
    };
    if rest.is_empty() {
        object.remove(*first);
    } else if let Some(child) = object.get_mut(*first) {
        remove(child, rest);
        if is_empty_node(child) {
            object.remove(*first);
        }
    }
    if object.is_empty() {
        *root = Value::Null;
    }
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}
