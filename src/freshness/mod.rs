//! The per-leaf freshness tree: `Node = Leaf{value, ts} | Branch{children}`.
//! A leaf's timestamp advances iff its value changed in the record that
//! produced it — this is the invariant the rest of the enrichment engine
//! depends on for stable "what changed and when" reporting.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A node in the freshness tree. Serializes to the same shape the original
/// store used: a leaf is a two-key object `{"value": ..., "ts": ...}`; a
/// branch is any other object.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf { value: Value, ts: DateTime<Utc> },
    Branch(BTreeMap<String, Node>),
}

impl Node {
    pub fn empty_branch() -> Self {
        Node::Branch(BTreeMap::new())
    }

    /// Serializes to the on-disk/wire JSON shape.
    pub fn to_json(&self) -> Value {
        match self {
            Node::Leaf { value, ts } => {
                let mut obj = Map::new();
                obj.insert("value".to_string(), value.clone());
                obj.insert(
                    "ts".to_string(),
                    Value::String(format_event_ts(ts)),
                );
                Value::Object(obj)
            }
            Node::Branch(children) => {
                let mut obj = Map::new();
                for (key, node) in children {
                    obj.insert(key.clone(), node.to_json());
                }
                Value::Object(obj)
            }
        }
    }

    /// Parses the on-disk JSON shape back into a tree. A malformed leaf
    /// (e.g. `ts` not parseable) is treated as an empty branch, matching
    /// the original's tolerant `isinstance` based reconstruction.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(obj) => {
                if let (Some(v), Some(Value::String(ts_str))) = (obj.get("value"), obj.get("ts")) {
                    if obj.len() == 2 {
                        if let Some(ts) = parse_event_ts(ts_str) {
                            return Node::Leaf { value: v.clone(), ts };
                        }
                    }
                }
                let mut children = BTreeMap::new();
                for (key, child) in obj {
                    children.insert(key.clone(), Node::from_json(child));
                }
                Node::Branch(children)
            }
            _ => Node::empty_branch(),
        }
    }
}

/// Event timestamps are stored and compared as `YYYY-MM-DD HH:MM:SS` UTC,
/// seconds precision, per the wire/storage format.
pub fn format_event_ts(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn parse_event_ts(s: &str) -> Option<DateTime<Utc>> {
    let normalized = s.replacen(' ', "T", 1);
    let naive = chrono::NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

/// `reconstruct(freshness) -> plain`: depth-first replace each leaf with
/// its value, preserving branch structure.
pub fn reconstruct(node: &Node) -> Value {
    match node {
        Node::Leaf { value, .. } => value.clone(),
        Node::Branch(children) => {
            let mut obj = Map::new();
            for (key, child) in children {
                obj.insert(key.clone(), reconstruct(child));
            }
            Value::Object(obj)
        }
    }
}

/// `convert(plain, ts) -> freshness`: every non-null scalar becomes a leaf
/// at `ts`; null scalars are omitted entirely (they carry no information).
pub fn convert(plain: &Value, ts: DateTime<Utc>) -> Node {
    match plain {
        Value::Object(obj) => {
            let mut children = BTreeMap::new();
            for (key, value) in obj {
                match value {
                    Value::Null => continue,
                    Value::Object(_) => {
                        children.insert(key.clone(), convert(value, ts));
                    }
                    other => {
                        children.insert(
                            key.clone(),
                            Node::Leaf {
                                value: other.clone(),
                                ts,
                            },
                        );
                    }
                }
            }
            Node::Branch(children)
        }
        other => Node::Leaf {
            value: other.clone(),
            ts,
        },
    }
}

/// `update(base, new_plain, new_ts) -> next`: the central merge.
///
/// For every key present in `new_plain`: if the value differs from the
/// corresponding leaf (or no leaf exists yet), the leaf is replaced with
/// `{new_value, new_ts}`; an unchanged value keeps its original timestamp.
/// Branches recurse; a branch missing from `base` is built fresh via
/// `convert`. Keys present only in `base` (absent from `new_plain`) are
/// preserved unchanged — the record simply says nothing about them.
pub fn update(base: &Node, new_plain: &Value, new_ts: DateTime<Utc>) -> Node {
    let new_obj = match new_plain {
        Value::Object(obj) => obj,
        other => {
            // A scalar replacing what used to be (or still is) a branch:
            // treat as a single leaf update against the whole base node.
            return update_scalar_leaf(base, other, new_ts);
        }
    };

    let base_children = match base {
        Node::Branch(children) => Some(children),
        Node::Leaf { .. } => None,
    };

    let mut result: BTreeMap<String, Node> = BTreeMap::new();

    // Preserve keys only present in base.
    if let Some(children) = base_children {
        for (key, node) in children {
            if !new_obj.contains_key(key) {
                result.insert(key.clone(), node.clone());
            }
        }
    }

    for (key, new_value) in new_obj {
        if new_value.is_null() {
            // Record says nothing definite; treat like absence (see C2
            // ordering rule): preserve whatever was already there.
            if let Some(children) = base_children {
                if let Some(existing) = children.get(key) {
                    result.insert(key.clone(), existing.clone());
                }
            }
            continue;
        }

        let base_child = base_children.and_then(|children| children.get(key));

        match new_value {
            Value::Object(_) => {
                let base_sub = match base_child {
                    Some(Node::Branch(_)) => base_child.cloned().unwrap(),
                    _ => Node::empty_branch(),
                };
                result.insert(key.clone(), update(&base_sub, new_value, new_ts));
            }
            scalar => {
                let leaf = match base_child {
                    Some(Node::Leaf { value: old_value, ts: old_ts }) if old_value == scalar => {
                        Node::Leaf {
                            value: old_value.clone(),
                            ts: *old_ts,
                        }
                    }
                    _ => Node::Leaf {
                        value: scalar.clone(),
                        ts: new_ts,
                    },
                };
                result.insert(key.clone(), leaf);
            }
        }
    }

    Node::Branch(result)
}

fn update_scalar_leaf(base: &Node, new_value: &Value, new_ts: DateTime<Utc>) -> Node {
    match base {
        Node::Leaf { value: old_value, ts: old_ts } if old_value == new_value => Node::Leaf {
            value: old_value.clone(),
            ts: *old_ts,
        },
        _ => Node::Leaf {
            value: new_value.clone(),
            ts: new_ts,
        },
    }
}

/// `parse_with_ages(freshness, now) -> (plain, ages)`. `ages` mirrors the
/// tree shape with each leaf key `k` renamed `{k}_age_in_seconds`; scalars
/// that reach this function outside of a Leaf wrapper (shouldn't normally
/// happen post-merge) are reported as `"untracked"`.
pub fn parse_with_ages(node: &Node, now: DateTime<Utc>) -> (Value, Value) {
    match node {
        Node::Leaf { value, ts } => {
            let age = (now - *ts).num_seconds();
            (value.clone(), Value::from(age))
        }
        Node::Branch(children) => {
            let mut data = Map::new();
            let mut ages = Map::new();
            for (key, child) in children {
                match child {
                    Node::Leaf { value, ts } => {
                        data.insert(key.clone(), value.clone());
                        let age = (now - *ts).num_seconds();
                        ages.insert(format!("{key}_age_in_seconds"), Value::from(age));
                    }
                    Node::Branch(_) => {
                        let (sub_data, sub_ages) = parse_with_ages(child, now);
                        data.insert(key.clone(), sub_data);
                        ages.insert(key.clone(), sub_ages);
                    }
                }
            }
            (Value::Object(data), Value::Object(ages))
        }
    }
}

/// `diff(new, old) -> delta`: recursive structural diff over plain states.
/// A changed/added scalar is included with its new value; a key present
/// only in `old` is included with a `null` marker; equal subtrees collapse
/// to absent; empty resulting branches are omitted.
pub fn diff(new_plain: &Value, old_plain: &Value) -> Value {
    match (new_plain, old_plain) {
        (Value::Object(new_obj), Value::Object(old_obj)) => {
            let mut delta = Map::new();
            let mut keys: Vec<&String> = new_obj.keys().chain(old_obj.keys()).collect();
            keys.sort();
            keys.dedup();

            for key in keys {
                let new_val = new_obj.get(key);
                let old_val = old_obj.get(key);
                match (new_val, old_val) {
                    (Some(n), None) => {
                        if !n.is_null() {
                            delta.insert(key.clone(), n.clone());
                        }
                    }
                    (None, Some(_)) => {
                        delta.insert(key.clone(), Value::Null);
                    }
                    (Some(Value::Null), Some(o)) if !o.is_null() => {
                        delta.insert(key.clone(), Value::Null);
                    }
                    (Some(Value::Object(_)), Some(Value::Object(_))) => {
                        let sub = diff(new_val.unwrap(), old_val.unwrap());
                        if sub.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
                            delta.insert(key.clone(), sub);
                        }
                    }
                    (Some(n), Some(o)) => {
                        if n != o {
                            delta.insert(key.clone(), n.clone());
                        }
                    }
                    (None, None) => {}
                }
            }
            Value::Object(delta)
        }
        (new_val, _) => new_val.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(seconds, 0).unwrap()
    }

    #[test]
    fn reconstruct_then_convert_roundtrips_nonnull_scalars() {
        let plain = json!({"power": {"battery_percent": 50}, "name": "dev"});
        let node = convert(&plain, ts(1000));
        assert_eq!(reconstruct(&node), plain);
    }

    #[test]
    fn update_preserves_timestamp_on_unchanged_value() {
        let base = convert(&json!({"battery_percent": 50}), ts(100));
        let next = update(&base, &json!({"battery_percent": 50}), ts(200));
        if let Node::Branch(children) = &next {
            if let Node::Leaf { ts: leaf_ts, .. } = children.get("battery_percent").unwrap() {
                assert_eq!(*leaf_ts, ts(100));
            } else {
                panic!("expected leaf");
            }
        } else {
            panic!("expected branch");
        }
    }

    #[test]
    fn update_advances_timestamp_on_changed_value() {
        let base = convert(&json!({"battery_percent": 50}), ts(100));
        let next = update(&base, &json!({"battery_percent": 30}), ts(200));
        if let Node::Branch(children) = &next {
            if let Node::Leaf { ts: leaf_ts, value } = children.get("battery_percent").unwrap() {
                assert_eq!(*leaf_ts, ts(200));
                assert_eq!(*value, json!(30));
            } else {
                panic!("expected leaf");
            }
        } else {
            panic!("expected branch");
        }
    }

    #[test]
    fn update_preserves_keys_absent_from_new_record() {
        let base = convert(&json!({"battery_percent": 50, "device_name": "foo"}), ts(100));
        let next = update(&base, &json!({"battery_percent": 30}), ts(200));
        if let Node::Branch(children) = &next {
            assert!(children.contains_key("device_name"));
        } else {
            panic!("expected branch");
        }
    }

    #[test]
    fn diff_is_empty_for_identical_states() {
        let a = json!({"a": 1, "b": {"c": 2}});
        assert_eq!(diff(&a, &a), json!({}));
    }

    #[test]
    fn diff_against_empty_returns_full_state() {
        let a = json!({"a": 1});
        assert_eq!(diff(&a, &json!({})), json!({"a": 1}));
    }

    #[test]
    fn diff_detects_nested_change_only() {
        let old = json!({"battery": {"percent": 40, "capacity": 4000}});
        let new = json!({"battery": {"percent": 40, "capacity": 4000}});
        assert_eq!(diff(&new, &old), json!({}));
        let new2 = json!({"battery": {"percent": 30, "capacity": 4000}});
        assert_eq!(diff(&new2, &old), json!({"battery": {"percent": 30}}));
    }

    #[test]
    fn parse_with_ages_reports_seconds_since_leaf_ts() {
        let node = convert(&json!({"battery_percent": 50}), ts(100));
        let (plain, ages) = parse_with_ages(&node, ts(160));
        assert_eq!(plain, json!({"battery_percent": 50}));
        assert_eq!(ages, json!({"battery_percent_age_in_seconds": 60}));
    }

    #[test]
    fn event_ts_format_matches_storage_format() {
        let t = ts(1_700_000_000);
        assert_eq!(format_event_ts(&t), "2023-11-14 22:13:20");
        assert_eq!(parse_event_ts("2023-11-14 22:13:20").unwrap(), t);
    }
}
