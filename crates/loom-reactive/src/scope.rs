//! Scope Tree
//!
//! Parent-linked variable maps mirroring the UI composition tree. Scopes live
//! in a generational arena; a child only ever stores its parent's index, so
//! detaching a subtree cannot leave dangling references behind.

use crate::arena::{GenArena, GenIndex};
use indexmap::IndexMap;
use loom_expr::Value;
use thiserror::Error;

/// Handle to one scope in a [`ScopeTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(GenIndex);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScopeError {
    #[error("'{name}' is already declared in this scope")]
    AlreadyDeclared { name: String },

    #[error("scope does not exist (detached or never created)")]
    UnknownScope,
}

#[derive(Debug, Default)]
struct Scope {
    variables: IndexMap<String, Value>,
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
}

/// Arena of scopes
#[derive(Debug, Default)]
pub struct ScopeTree {
    scopes: GenArena<Scope>,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope with no parent
    pub fn create_root(&mut self) -> ScopeId {
        ScopeId(self.scopes.insert(Scope::default()))
    }

    /// Create a scope whose lookups fall back to `parent`
    pub fn create_child(&mut self, parent: ScopeId) -> Result<ScopeId, ScopeError> {
        if !self.contains(parent) {
            return Err(ScopeError::UnknownScope);
        }
        let child = ScopeId(self.scopes.insert(Scope { parent: Some(parent), ..Default::default() }));
        self.scope_mut(parent)?.children.push(child);
        Ok(child)
    }

    pub fn contains(&self, scope: ScopeId) -> bool {
        self.scopes.contains(scope.0)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scopes.get(scope.0).and_then(|s| s.parent)
    }

    pub fn children(&self, scope: ScopeId) -> &[ScopeId] {
        self.scopes.get(scope.0).map(|s| s.children.as_slice()).unwrap_or(&[])
    }

    /// Names declared at this level, in declaration order
    pub fn names(&self, scope: ScopeId) -> impl Iterator<Item = &str> {
        self.scopes
            .get(scope.0)
            .into_iter()
            .flat_map(|s| s.variables.keys().map(String::as_str))
    }

    fn scope(&self, scope: ScopeId) -> Result<&Scope, ScopeError> {
        self.scopes.get(scope.0).ok_or(ScopeError::UnknownScope)
    }

    fn scope_mut(&mut self, scope: ScopeId) -> Result<&mut Scope, ScopeError> {
        self.scopes.get_mut(scope.0).ok_or(ScopeError::UnknownScope)
    }

    /// Value declared at this level only
    pub fn get(&self, scope: ScopeId, name: &str) -> Result<Option<Value>, ScopeError> {
        Ok(self.scope(scope)?.variables.get(name).cloned())
    }

    /// Write at this level, declaring the name if needed
    pub fn set(&mut self, scope: ScopeId, name: &str, value: Value) -> Result<(), ScopeError> {
        self.scope_mut(scope)?.variables.insert(name.to_owned(), value);
        Ok(())
    }

    /// Declare a new name at this level
    pub fn declare(&mut self, scope: ScopeId, name: &str, value: Value) -> Result<(), ScopeError> {
        let level = self.scope_mut(scope)?;
        if level.variables.contains_key(name) {
            return Err(ScopeError::AlreadyDeclared { name: name.to_owned() });
        }
        level.variables.insert(name.to_owned(), value);
        Ok(())
    }

    /// Nearest level (walking toward the root) that declares `name`
    pub fn owner(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let level = self.scopes.get(id.0)?;
            if level.variables.contains_key(name) {
                return Some(id);
            }
            current = level.parent;
        }
        None
    }

    /// Walk toward the root; `None` when no level declares `name`
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<Value> {
        let owner = self.owner(scope, name)?;
        self.scopes.get(owner.0)?.variables.get(name).cloned()
    }

    /// Walk toward the root; `undefined` when nothing is found. Never fails.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Value {
        self.lookup(scope, name).unwrap_or_default()
    }

    /// Write where `name` already resolves, otherwise declare it on `scope`.
    /// Returns the level that received the value.
    pub fn assign(&mut self, scope: ScopeId, name: &str, value: Value) -> Result<ScopeId, ScopeError> {
        if !self.contains(scope) {
            return Err(ScopeError::UnknownScope);
        }
        let target = self.owner(scope, name).unwrap_or(scope);
        self.set(target, name, value)?;
        Ok(target)
    }

    /// Discard a scope and all of its descendants. Returns how many scopes were
    /// removed; detaching an unknown scope removes nothing.
    pub fn detach(&mut self, scope: ScopeId) -> usize {
        let Some(parent) = self.scopes.get(scope.0).map(|s| s.parent) else {
            return 0;
        };
        if let Some(parent) = parent.and_then(|p| self.scopes.get_mut(p.0)) {
            parent.children.retain(|child| *child != scope);
        }

        let mut removed = 0;
        let mut stack = vec![scope];
        while let Some(id) = stack.pop() {
            if let Some(level) = self.scopes.remove(id.0) {
                stack.extend(level.children);
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_walks_to_root() {
        let mut tree = ScopeTree::new();
        let root = tree.create_root();
        let child = tree.create_child(root).unwrap();
        let grandchild = tree.create_child(child).unwrap();
        tree.set(root, "title", Value::from("hello")).unwrap();

        assert_eq!(tree.resolve(grandchild, "title"), Value::from("hello"));
        assert_eq!(tree.get(grandchild, "title").unwrap(), None);
        assert_eq!(tree.resolve(grandchild, "missing"), Value::Undefined);
        assert_eq!(tree.owner(grandchild, "title"), Some(root));
    }

    #[test]
    fn test_shadowing() {
        let mut tree = ScopeTree::new();
        let root = tree.create_root();
        let child = tree.create_child(root).unwrap();
        tree.set(root, "x", Value::from(1)).unwrap();
        tree.declare(child, "x", Value::from(2)).unwrap();

        assert_eq!(tree.resolve(child, "x"), Value::from(2));
        assert_eq!(tree.resolve(root, "x"), Value::from(1));
    }

    #[test]
    fn test_declare_collision() {
        let mut tree = ScopeTree::new();
        let root = tree.create_root();
        tree.declare(root, "x", Value::Null).unwrap();
        assert_eq!(
            tree.declare(root, "x", Value::Null),
            Err(ScopeError::AlreadyDeclared { name: "x".into() })
        );
    }

    #[test]
    fn test_assign_targets_owner() {
        let mut tree = ScopeTree::new();
        let root = tree.create_root();
        let child = tree.create_child(root).unwrap();
        tree.set(root, "count", Value::from(1)).unwrap();

        assert_eq!(tree.assign(child, "count", Value::from(2)), Ok(root));
        assert_eq!(tree.assign(child, "fresh", Value::from(3)), Ok(child));
        assert_eq!(tree.get(root, "count").unwrap(), Some(Value::from(2)));
        assert_eq!(tree.get(root, "fresh").unwrap(), None);
    }

    #[test]
    fn test_detach_subtree() {
        let mut tree = ScopeTree::new();
        let root = tree.create_root();
        let child = tree.create_child(root).unwrap();
        let grandchild = tree.create_child(child).unwrap();
        let sibling = tree.create_child(root).unwrap();

        assert_eq!(tree.detach(child), 2);
        assert!(!tree.contains(grandchild));
        assert_eq!(tree.children(root), &[sibling]);
        assert_eq!(tree.detach(child), 0);
        assert_eq!(tree.get(child, "x"), Err(ScopeError::UnknownScope));
        assert_eq!(tree.create_child(child), Err(ScopeError::UnknownScope));
        assert_eq!(tree.resolve(grandchild, "x"), Value::Undefined);
    }
}
