//! Iterable Differ
//!
//! Turns two states of a collection into the operation stream a repeat
//! construct applies to its rows.
//!
//! Without a key function arrays compare positionally, so an insertion shows
//! up as updates of every later row plus an add at the tail. With a key
//! function each row carries an identity and moved rows become
//! [`Operation::RemapKey`] instead of a remove/add pair.
//!
//! Operations come out in application order: removals (highest index first),
//! then remaps, then adds and updates in current order.

use crate::snapshot::{CollectionKey, Snapshot};
use indexmap::IndexMap;
use loom_expr::{IdentityKey, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiffError {
    #[error("cannot diff a value of type {found}: expected an array or an object")]
    NotIterable { found: &'static str },

    #[error("key function produced duplicate key '{key}' (at indices {first} and {second})")]
    DuplicateKey { key: String, first: usize, second: usize },
}

/// One step of reconciliation.
///
/// A diff lists removals first (highest index first), then key remaps, then
/// adds and updates in current order, so applying the steps in sequence never
/// touches a row that a later step still expects at its old position.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Add { key: CollectionKey, value: Value },
    Update { key: CollectionKey, value: Value, previous: Value },
    Remove { key: CollectionKey, previous: Value },
    RemapKey { from: usize, to: usize },
}

/// Identity of a row: `key(index, value)`
pub type KeyFn = dyn Fn(usize, &Value) -> Value;

/// The identity key function: rows are identified by their own value
pub fn identity_key(_index: usize, value: &Value) -> Value {
    value.clone()
}

/// Differ snapshot: the last seen collection plus, when keyed, its key index
#[derive(Debug, Clone, Default)]
struct State {
    entries: Option<Snapshot>,
    keys: HashMap<IdentityKey, usize>,
}

/// Stateful differ that remembers the collection between calls
pub struct IterableDiffer {
    key_fn: Option<Box<KeyFn>>,
    state: State,
}

impl std::fmt::Debug for IterableDiffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterableDiffer")
            .field("keyed", &self.key_fn.is_some())
            .field("len", &self.state.entries.as_ref().map_or(0, Snapshot::len))
            .finish()
    }
}

fn check_iterable(value: &Value) -> Result<(), DiffError> {
    match value {
        Value::Array(_) | Value::Object(_) | Value::Undefined | Value::Null => Ok(()),
        other => Err(DiffError::NotIterable { found: other.type_of() }),
    }
}

impl IterableDiffer {
    /// Differ for `collection`, which is validated here rather than on the
    /// first [`diff`](Self::diff). `undefined` and `null` count as empty.
    ///
    /// The differ starts empty, so the first diff reports every entry as
    /// added.
    pub fn new(collection: &Value, key_fn: Option<Box<KeyFn>>) -> Result<Self, DiffError> {
        check_iterable(collection)?;
        Ok(Self { key_fn, state: State::default() })
    }

    /// Keyed differ using [`identity_key`]
    pub fn with_identity(collection: &Value) -> Result<Self, DiffError> {
        Self::new(collection, Some(Box::new(identity_key)))
    }

    pub fn is_keyed(&self) -> bool {
        self.key_fn.is_some()
    }

    /// Operations since the previous call, or `None` when nothing changed.
    /// The snapshot is replaced only when something changed.
    pub fn diff(&mut self, current: &Value) -> Result<Option<Vec<Operation>>, DiffError> {
        check_iterable(current)?;
        let next = Snapshot::capture(current);
        let keys = match (&self.key_fn, &next) {
            (Some(key_fn), Some(Snapshot::Array(values))) => key_index(values, &**key_fn)?,
            _ => HashMap::new(),
        };

        let operations = match (&self.key_fn, &next) {
            (Some(_), Some(Snapshot::Array(values))) => {
                diff_keyed(self.state.entries.as_ref(), &self.state.keys, values, &keys)
            }
            _ => diff_unkeyed(self.state.entries.as_ref(), next.as_ref()),
        };

        if operations.is_empty() {
            return Ok(None);
        }
        trace!(operations = operations.len(), "collection changed");
        self.state = State { entries: next, keys };
        Ok(Some(operations))
    }
}

/// Stateless diff of two collections
pub fn diff(previous: &Value, current: &Value, key_fn: Option<&KeyFn>) -> Result<Vec<Operation>, DiffError> {
    check_iterable(previous)?;
    check_iterable(current)?;
    let before = Snapshot::capture(previous);
    let after = Snapshot::capture(current);

    match (key_fn, &before, &after) {
        (Some(key_fn), Some(Snapshot::Array(_)) | None, Some(Snapshot::Array(new))) => {
            let old_keys = key_index(old_or_empty(&before), key_fn)?;
            let new_keys = key_index(new, key_fn)?;
            Ok(diff_keyed(before.as_ref(), &old_keys, new, &new_keys))
        }
        _ => Ok(diff_unkeyed(before.as_ref(), after.as_ref())),
    }
}

fn old_or_empty(snapshot: &Option<Snapshot>) -> &[Value] {
    match snapshot {
        Some(Snapshot::Array(values)) => values,
        _ => &[],
    }
}

fn key_index(values: &[Value], key_fn: &KeyFn) -> Result<HashMap<IdentityKey, usize>, DiffError> {
    let mut keys = HashMap::with_capacity(values.len());
    for (index, value) in values.iter().enumerate() {
        let key = key_fn(index, value);
        if let Some(first) = keys.insert(key.identity_key(), index) {
            return Err(DiffError::DuplicateKey { key: key.to_string(), first, second: index });
        }
    }
    Ok(keys)
}

fn diff_unkeyed(before: Option<&Snapshot>, after: Option<&Snapshot>) -> Vec<Operation> {
    match (before, after) {
        (Some(Snapshot::Array(old)), Some(Snapshot::Array(new))) => diff_positional(old, new),
        (Some(Snapshot::Object(old)), Some(Snapshot::Object(new))) => diff_map(old, new),
        (before, after) => {
            let mut operations: Vec<Operation> = before
                .map(Snapshot::entries)
                .unwrap_or_default()
                .into_iter()
                .rev()
                .map(|(key, previous)| Operation::Remove { key, previous })
                .collect();
            operations.extend(
                after
                    .map(Snapshot::entries)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(key, value)| Operation::Add { key, value }),
            );
            operations
        }
    }
}

fn diff_positional(old: &[Value], new: &[Value]) -> Vec<Operation> {
    let mut operations: Vec<Operation> = (new.len()..old.len())
        .rev()
        .map(|i| Operation::Remove { key: CollectionKey::Index(i), previous: old[i].clone() })
        .collect();

    for (i, value) in new.iter().enumerate() {
        match old.get(i) {
            None => operations.push(Operation::Add { key: CollectionKey::Index(i), value: value.clone() }),
            Some(previous) if !previous.same_value(value) => operations.push(Operation::Update {
                key: CollectionKey::Index(i),
                value: value.clone(),
                previous: previous.clone(),
            }),
            Some(_) => {}
        }
    }
    operations
}

fn diff_map(old: &IndexMap<std::rc::Rc<str>, Value>, new: &IndexMap<std::rc::Rc<str>, Value>) -> Vec<Operation> {
    let mut operations: Vec<Operation> = old
        .iter()
        .filter(|(key, _)| !new.contains_key(*key))
        .map(|(key, previous)| Operation::Remove { key: CollectionKey::Key(key.clone()), previous: previous.clone() })
        .collect();

    for (key, value) in new {
        match old.get(key) {
            None => operations.push(Operation::Add { key: CollectionKey::Key(key.clone()), value: value.clone() }),
            Some(previous) if !previous.same_value(value) => operations.push(Operation::Update {
                key: CollectionKey::Key(key.clone()),
                value: value.clone(),
                previous: previous.clone(),
            }),
            Some(_) => {}
        }
    }
    operations
}

fn diff_keyed(
    before: Option<&Snapshot>,
    old_keys: &HashMap<IdentityKey, usize>,
    new: &[Value],
    new_keys: &HashMap<IdentityKey, usize>,
) -> Vec<Operation> {
    let old: &[Value] = match before {
        Some(Snapshot::Array(values)) => values,
        _ => &[],
    };

    let mut removed: Vec<usize> = old_keys
        .iter()
        .filter(|(key, _)| !new_keys.contains_key(*key))
        .map(|(_, index)| *index)
        .collect();
    // an object snapshot has no key index; all of its entries go
    let mut operations: Vec<Operation> = match before {
        Some(Snapshot::Object(_)) => before
            .map(Snapshot::entries)
            .unwrap_or_default()
            .into_iter()
            .rev()
            .map(|(key, previous)| Operation::Remove { key, previous })
            .collect(),
        _ => Vec::new(),
    };
    removed.sort_unstable_by(|a, b| b.cmp(a));
    operations.extend(
        removed
            .into_iter()
            .map(|i| Operation::Remove { key: CollectionKey::Index(i), previous: old[i].clone() }),
    );

    // new_keys is built from `new`, so every row's key is present
    let mut placements: Vec<(usize, Option<usize>)> = Vec::with_capacity(new.len());
    let mut index_to_key: Vec<Option<&IdentityKey>> = vec![None; new.len()];
    for (key, &index) in new_keys {
        index_to_key[index] = Some(key);
    }
    for (index, key) in index_to_key.iter().enumerate() {
        let from = key.and_then(|key| old_keys.get(key).copied());
        placements.push((index, from));
    }

    operations.extend(placements.iter().filter_map(|&(to, from)| match from {
        Some(from) if from != to => Some(Operation::RemapKey { from, to }),
        _ => None,
    }));

    for (to, from) in placements {
        let value = &new[to];
        match from {
            None => operations.push(Operation::Add { key: CollectionKey::Index(to), value: value.clone() }),
            Some(from) if !old[from].same_value(value) => operations.push(Operation::Update {
                key: CollectionKey::Index(to),
                value: value.clone(),
                previous: old[from].clone(),
            }),
            Some(_) => {}
        }
    }
    operations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Value {
        Value::array(items.iter().map(|s| Value::from(*s)))
    }

    fn index(i: usize) -> CollectionKey {
        CollectionKey::Index(i)
    }

    #[test]
    fn test_positional_insert_is_destructive() {
        let ops = diff(&strings(&["a", "c"]), &strings(&["a", "b", "c"]), None).unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::Update { key: index(1), value: Value::from("b"), previous: Value::from("c") },
                Operation::Add { key: index(2), value: Value::from("c") },
            ]
        );
    }

    #[test]
    fn test_keyed_insert_remaps() {
        let ops = diff(&strings(&["a", "c"]), &strings(&["a", "b", "c"]), Some(&identity_key)).unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::RemapKey { from: 1, to: 2 },
                Operation::Add { key: index(1), value: Value::from("b") },
            ]
        );
    }

    #[test]
    fn test_positional_removals_descend() {
        let ops = diff(&strings(&["a", "b", "c"]), &strings(&["a"]), None).unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::Remove { key: index(2), previous: Value::from("c") },
                Operation::Remove { key: index(1), previous: Value::from("b") },
            ]
        );
    }

    #[test]
    fn test_keyed_reverse_has_no_removals() {
        let ops = diff(&strings(&["a", "b", "c"]), &strings(&["c", "b", "a"]), Some(&identity_key)).unwrap();
        assert_eq!(ops, vec![Operation::RemapKey { from: 2, to: 0 }, Operation::RemapKey { from: 0, to: 2 }]);
    }

    #[test]
    fn test_keyed_removal_and_update() {
        let row = |id: i32, label: &str| Value::object([("id", Value::from(id)), ("label", Value::from(label))]);
        let by_id = |_: usize, row: &Value| row.as_object().and_then(|o| o.get("id")).unwrap_or_default();
        let old = Value::array([row(1, "one"), row(2, "two")]);
        let replacement = row(2, "TWO");
        let new = Value::array([replacement.clone()]);

        let ops = diff(&old, &new, Some(&by_id)).unwrap();
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], Operation::Remove { key: CollectionKey::Index(0), .. }));
        assert_eq!(ops[1], Operation::RemapKey { from: 1, to: 0 });
        assert!(matches!(&ops[2], Operation::Update { key: CollectionKey::Index(0), value, .. } if value.same_value(&replacement)));
    }

    #[test]
    fn test_duplicate_key() {
        let err = diff(&Value::Undefined, &strings(&["x", "x"]), Some(&identity_key)).unwrap_err();
        assert_eq!(err, DiffError::DuplicateKey { key: "x".into(), first: 0, second: 1 });
    }

    #[test]
    fn test_map_diff() {
        let old = Value::object([("a", Value::from(1)), ("b", Value::from(2))]);
        let new = Value::object([("b", Value::from(3)), ("c", Value::from(4))]);
        let ops = diff(&old, &new, None).unwrap();
        assert_eq!(
            ops,
            vec![
                Operation::Remove { key: CollectionKey::Key("a".into()), previous: Value::from(1) },
                Operation::Update { key: CollectionKey::Key("b".into()), value: Value::from(3), previous: Value::from(2) },
                Operation::Add { key: CollectionKey::Key("c".into()), value: Value::from(4) },
            ]
        );
    }

    #[test]
    fn test_not_iterable_at_construction() {
        assert_eq!(
            IterableDiffer::new(&Value::from(3), None).unwrap_err(),
            DiffError::NotIterable { found: "number" }
        );
        assert!(IterableDiffer::new(&Value::Null, None).is_ok());
    }

    #[test]
    fn test_stateful_differ() {
        let list = strings(&["a", "c"]);
        let mut differ = IterableDiffer::with_identity(&list).unwrap();

        let first = differ.diff(&list).unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert!(differ.diff(&list).unwrap().is_none());

        list.as_array().unwrap().borrow_mut().insert(1, Value::from("b"));
        let ops = differ.diff(&list).unwrap().unwrap();
        assert_eq!(
            ops,
            vec![Operation::RemapKey { from: 1, to: 2 }, Operation::Add { key: index(1), value: Value::from("b") }]
        );
        assert!(differ.diff(&list).unwrap().is_none());
    }
}
