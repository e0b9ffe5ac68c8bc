//! Shallow Snapshots
//!
//! One-level copies of arrays and objects. Dirty checking compares a live
//! collection against its snapshot by own keys/indices only; nested values are
//! compared by identity, never recursed into.

use indexmap::IndexMap;
use loom_expr::Value;
use std::fmt;
use std::rc::Rc;

/// Position of an entry inside a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionKey {
    Index(usize),
    Key(Rc<str>),
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKey::Index(i) => write!(f, "{i}"),
            CollectionKey::Key(k) => f.write_str(k),
        }
    }
}

/// Shallow copy of a collection's own entries
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Array(Vec<Value>),
    Object(IndexMap<Rc<str>, Value>),
}

/// Own-key classification between a snapshot and a live value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShallowDiff {
    pub added: Vec<CollectionKey>,
    pub removed: Vec<CollectionKey>,
    pub changed: Vec<CollectionKey>,
}

impl ShallowDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl Snapshot {
    /// Snapshot of an array or object; scalars have none
    pub fn capture(value: &Value) -> Option<Self> {
        match value {
            Value::Array(array) => Some(Snapshot::Array(array.to_vec())),
            Value::Object(object) => Some(Snapshot::Object(object.borrow().clone())),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Snapshot::Array(values) => values.len(),
            Snapshot::Object(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries as `(key, value)` pairs in collection order
    pub fn entries(&self) -> Vec<(CollectionKey, Value)> {
        match self {
            Snapshot::Array(values) => values
                .iter()
                .enumerate()
                .map(|(i, v)| (CollectionKey::Index(i), v.clone()))
                .collect(),
            Snapshot::Object(entries) => entries
                .iter()
                .map(|(k, v)| (CollectionKey::Key(k.clone()), v.clone()))
                .collect(),
        }
    }

    /// Compare against the live value one level deep
    pub fn diff(&self, current: &Value) -> ShallowDiff {
        let mut diff = ShallowDiff::default();
        match (self, current) {
            (Snapshot::Array(previous), Value::Array(array)) => {
                let current = array.borrow();
                for (i, value) in current.iter().enumerate() {
                    match previous.get(i) {
                        None => diff.added.push(CollectionKey::Index(i)),
                        Some(old) if !old.same_value(value) => diff.changed.push(CollectionKey::Index(i)),
                        Some(_) => {}
                    }
                }
                diff.removed.extend((current.len()..previous.len()).map(CollectionKey::Index));
            }
            (Snapshot::Object(previous), Value::Object(object)) => {
                let current = object.borrow();
                for (key, value) in current.iter() {
                    match previous.get(key) {
                        None => diff.added.push(CollectionKey::Key(key.clone())),
                        Some(old) if !old.same_value(value) => diff.changed.push(CollectionKey::Key(key.clone())),
                        Some(_) => {}
                    }
                }
                diff.removed.extend(
                    previous
                        .keys()
                        .filter(|key| !current.contains_key(*key))
                        .map(|key| CollectionKey::Key(key.clone())),
                );
            }
            (snapshot, current) => {
                // different shape: every old entry is gone, every new one is fresh
                diff.removed = snapshot.entries().into_iter().map(|(k, _)| k).collect();
                if let Some(fresh) = Snapshot::capture(current) {
                    diff.added = fresh.entries().into_iter().map(|(k, _)| k).collect();
                }
            }
        }
        diff
    }

    /// True when `current` has the same own entries
    pub fn matches(&self, current: &Value) -> bool {
        self.diff(current).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_have_no_snapshot() {
        assert!(Snapshot::capture(&Value::from(1)).is_none());
        assert!(Snapshot::capture(&Value::from("s")).is_none());
        assert!(Snapshot::capture(&Value::Undefined).is_none());
    }

    #[test]
    fn test_object_added_removed_changed() {
        let object = Value::object([("a", Value::from(1)), ("b", Value::from(2))]);
        let snapshot = Snapshot::capture(&object).unwrap();
        let live = object.as_object().unwrap();
        live.set("c", Value::from(3));
        live.remove("a");
        live.set("b", Value::from(20));

        let diff = snapshot.diff(&object);
        assert_eq!(diff.added, vec![CollectionKey::Key("c".into())]);
        assert_eq!(diff.removed, vec![CollectionKey::Key("a".into())]);
        assert_eq!(diff.changed, vec![CollectionKey::Key("b".into())]);
    }

    #[test]
    fn test_array_push_then_revert() {
        let array = Value::array([Value::from(1), Value::from(2)]);
        let snapshot = Snapshot::capture(&array).unwrap();
        let live = array.as_array().unwrap();

        live.push(Value::from(3));
        assert_eq!(snapshot.diff(&array).added, vec![CollectionKey::Index(2)]);

        live.pop();
        assert!(snapshot.matches(&array));
    }

    #[test]
    fn test_nested_mutation_is_invisible() {
        let inner = Value::object([("n", Value::from(1))]);
        let outer = Value::array([inner.clone()]);
        let snapshot = Snapshot::capture(&outer).unwrap();

        inner.as_object().unwrap().set("n", Value::from(2));
        assert!(snapshot.matches(&outer));
    }

    #[test]
    fn test_shape_change() {
        let snapshot = Snapshot::capture(&Value::array([Value::from(1)])).unwrap();
        let diff = snapshot.diff(&Value::object([("x", Value::Null)]));
        assert_eq!(diff.removed, vec![CollectionKey::Index(0)]);
        assert_eq!(diff.added, vec![CollectionKey::Key("x".into())]);
    }
}
