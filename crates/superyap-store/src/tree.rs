//! Path operations on a JSON tree.
//!
//! Every node is either a leaf or an object. `null` means absent, and an
//! object with no children is absent too, so [`prune`] runs after every
//! change.

use serde_json::{Map, Value};

pub(crate) fn get<'a>(node: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = node;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Replace the value at `segments`. Missing or non-object ancestors are
/// replaced by objects. A `null` value removes the entry.
pub(crate) fn set(node: &mut Value, segments: &[String], value: Value) {
    if value.is_null() {
        remove(node, segments);
        return;
    }
    let Some((last, parents)) = segments.split_last() else {
        *node = value;
        return;
    };

    let mut current = node;
    for segment in parents {
        current = object_mut(current)
            .entry(segment.clone())
            .or_insert(Value::Null);
    }
    object_mut(current).insert(last.clone(), value);
}

/// Remove the entry at `segments`, leaving the rest of the tree untouched.
pub(crate) fn remove(node: &mut Value, segments: &[String]) {
    let Some((last, parents)) = segments.split_last() else {
        *node = Value::Null;
        return;
    };

    let mut current = node;
    for segment in parents {
        match current.as_object_mut().and_then(|map| map.get_mut(segment)) {
            Some(child) => current = child,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(last);
    }
}

/// Drop `null` fields and empty objects, bottom-up. An empty root becomes
/// `null`.
pub(crate) fn prune(node: &mut Value) {
    if let Value::Object(map) = node {
        for child in map.values_mut() {
            prune(child);
        }
        map.retain(|_, child| !child.is_null());
        if map.is_empty() {
            *node = Value::Null;
        }
    }
}

fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced by an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segs(path: &str) -> Vec<String> {
        path.split('/').map(str::to_string).collect()
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut root = Value::Null;
        set(&mut root, &segs("a/b/c"), json!(1));
        set(&mut root, &segs("a/d"), json!("x"));
        assert_eq!(root, json!({"a": {"b": {"c": 1}, "d": "x"}}));
        assert_eq!(get(&root, &segs("a/b/c")), Some(&json!(1)));
        assert_eq!(get(&root, &segs("a/missing")), None);
        assert_eq!(get(&root, &segs("a/d/deeper")), None);
    }

    #[test]
    fn set_replaces_leaf_with_object() {
        let mut root = json!({"a": "leaf"});
        set(&mut root, &segs("a/b"), json!(true));
        assert_eq!(root, json!({"a": {"b": true}}));
    }

    #[test]
    fn remove_then_prune_collapses_empty_parents() {
        let mut root = json!({"chats": {"a_b": {"m1": {"reactions": {"👍": {"bob": true}}}}}, "users": {"x": 1}});
        remove(&mut root, &segs("chats/a_b/m1/reactions/👍/bob"));
        prune(&mut root);
        assert_eq!(root, json!({"users": {"x": 1}}));

        remove(&mut root, &segs("users/x"));
        prune(&mut root);
        assert!(root.is_null());
    }

    #[test]
    fn remove_missing_path_is_noop() {
        let mut root = json!({"a": "leaf"});
        remove(&mut root, &segs("a/b/c"));
        remove(&mut root, &segs("z/y"));
        assert_eq!(root, json!({"a": "leaf"}));
    }
}
