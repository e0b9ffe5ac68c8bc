//! Change Detector
//!
//! Dirty-checking tree mirroring the UI composition tree. Each node owns a set
//! of watchers; `check()` re-reads every watcher's dependencies, compares them
//! with the values seen last time and calls the listener of each watcher that
//! changed, then descends into children whose strategy is
//! [`Strategy::AlwaysCheck`].
//!
//! # Comparison
//! A dependency is dirty when its new value is not the same value as before
//! (identity for arrays, objects and functions). When it is the same array or
//! object, its own entries are compared against a shallow snapshot taken
//! the last time it was read; nested values are not recursed into.
//!
//! # Re-entrancy
//! Listeners get a [`WatchContext`]. A refresh requested from a listener runs
//! synchronously as soon as the listener returns. A refresh of a node that is
//! already being checked is not re-entered; the node is checked again once
//! its current pass finishes, up to `max_recheck_passes` times.

use crate::arena::{GenArena, GenIndex};
use crate::binding::{BindError, Binder};
use crate::scope::{ScopeId, ScopeTree};
use crate::snapshot::Snapshot;
use loom_expr::{CompiledExpression, Dependency, Value};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Handle to one node of a [`ChangeDetector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetectorId(GenIndex);

/// Handle returned by [`ChangeDetector::watch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle {
    node: DetectorId,
    watcher: GenIndex,
}

impl WatchHandle {
    pub fn node(&self) -> DetectorId {
        self.node
    }
}

/// Whether an ancestor's walk descends into a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    AlwaysCheck,
    /// Only checked by an explicit [`ChangeDetector::refresh`] on the node
    SkipUnlessForced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Active,
    /// Terminal: the node is detached and checking it does nothing
    Disabled,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("change detector node is detached")]
    Disabled,

    #[error("failed to read '{dependency}' of '{expression}'")]
    Baseline {
        expression: String,
        dependency: String,
        #[source]
        error: BindError,
    },
}

/// Listener invoked when a watcher's dependencies change
pub type Listener = dyn FnMut(&mut WatchContext<'_>);

#[derive(Debug, Clone)]
pub struct DetectorOptions {
    /// How often a node may be re-checked in one call after a refresh was
    /// requested for it while it was being checked
    pub max_recheck_passes: usize,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self { max_recheck_passes: 10 }
    }
}

/// A dependency failing to evaluate during a check
#[derive(Debug)]
pub struct WatchError {
    pub handle: WatchHandle,
    pub expression: String,
    pub error: BindError,
}

/// Outcome of one `check()`/`refresh()`
#[derive(Debug, Default)]
pub struct CheckReport {
    pub nodes_visited: usize,
    pub listeners_invoked: usize,
    pub errors: Vec<WatchError>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.listeners_invoked == 0 && self.errors.is_empty()
    }
}

/// What a listener can see and do
pub struct WatchContext<'a> {
    scopes: &'a mut ScopeTree,
    binder: &'a Binder,
    expression: &'a CompiledExpression,
    scope: ScopeId,
    handle: WatchHandle,
    changed: &'a [String],
    refresh_requests: Vec<DetectorId>,
    unwatch: Vec<WatchHandle>,
}

impl<'a> WatchContext<'a> {
    pub fn scopes(&self) -> &ScopeTree {
        &*self.scopes
    }

    pub fn scopes_mut(&mut self) -> &mut ScopeTree {
        &mut *self.scopes
    }

    /// Scope the watcher's node evaluates in
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn handle(&self) -> WatchHandle {
        self.handle
    }

    pub fn expression(&self) -> &CompiledExpression {
        self.expression
    }

    /// Code of the dependencies that changed, in dependency order
    pub fn changed(&self) -> &[String] {
        self.changed
    }

    /// Evaluate the watched expression in the node's scope
    pub fn value(&mut self) -> Result<Value, BindError> {
        self.binder.evaluate_compiled(self.expression, &mut *self.scopes, self.scope)
    }

    /// Check `node` right after this listener returns
    pub fn request_refresh(&mut self, node: DetectorId) {
        self.refresh_requests.push(node);
    }

    /// Remove this watcher once the listener returns
    pub fn unwatch_self(&mut self) {
        self.unwatch.push(self.handle);
    }

    /// Remove another watcher once the listener returns
    pub fn unwatch(&mut self, handle: WatchHandle) {
        self.unwatch.push(handle);
    }
}

struct TrackedDependency {
    code: String,
    expression: Rc<CompiledExpression>,
    previous: Value,
    snapshot: Option<Snapshot>,
}

impl TrackedDependency {
    fn is_dirty(&self, current: &Value) -> bool {
        if !self.previous.same_value(current) {
            return true;
        }
        self.snapshot.as_ref().is_some_and(|snapshot| !snapshot.matches(current))
    }

    fn record(&mut self, current: Value) {
        self.snapshot = Snapshot::capture(&current);
        self.previous = current;
    }
}

struct Watcher {
    expression: Rc<CompiledExpression>,
    dependencies: Vec<TrackedDependency>,
    listener: Option<Box<Listener>>,
}

struct Node {
    scope: ScopeId,
    parent: Option<DetectorId>,
    children: Vec<DetectorId>,
    strategy: Strategy,
    watchers: GenArena<Watcher>,
    /// Registration order of live watchers
    order: Vec<GenIndex>,
    in_progress: bool,
    recheck: bool,
}

impl Node {
    fn new(scope: ScopeId, parent: Option<DetectorId>, strategy: Strategy) -> Self {
        Self {
            scope,
            parent,
            children: Vec::new(),
            strategy,
            watchers: GenArena::new(),
            order: Vec::new(),
            in_progress: false,
            recheck: false,
        }
    }
}

/// Tree of dirty-checking nodes. Detached nodes are freed; their ids stay
/// invalid for good.
pub struct ChangeDetector {
    nodes: GenArena<Node>,
    binder: Binder,
    options: DetectorOptions,
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("nodes", &self.nodes.len())
            .field("options", &self.options)
            .finish()
    }
}

impl ChangeDetector {
    pub fn new(binder: Binder, options: DetectorOptions) -> Self {
        Self { nodes: GenArena::new(), binder, options }
    }

    pub fn binder(&self) -> &Binder {
        &self.binder
    }

    pub fn binder_mut(&mut self) -> &mut Binder {
        &mut self.binder
    }

    /// Node without a parent, evaluating in `scope`
    pub fn create_root(&mut self, scope: ScopeId) -> DetectorId {
        DetectorId(self.nodes.insert(Node::new(scope, None, Strategy::AlwaysCheck)))
    }

    pub fn create_child(
        &mut self,
        parent: DetectorId,
        scope: ScopeId,
        strategy: Strategy,
    ) -> Result<DetectorId, DetectorError> {
        self.active_node(parent)?;
        let child = DetectorId(self.nodes.insert(Node::new(scope, Some(parent), strategy)));
        if let Some(node) = self.nodes.get_mut(parent.0) {
            node.children.push(child);
        }
        Ok(child)
    }

    fn active_node(&self, id: DetectorId) -> Result<&Node, DetectorError> {
        self.nodes.get(id.0).ok_or(DetectorError::Disabled)
    }

    /// Ids are only handed out by `create_*`, so one the arena no longer
    /// holds belongs to a detached node
    pub fn state(&self, id: DetectorId) -> DetectorState {
        if self.nodes.contains(id.0) { DetectorState::Active } else { DetectorState::Disabled }
    }

    /// Live nodes across all trees
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn strategy(&self, id: DetectorId) -> Option<Strategy> {
        self.nodes.get(id.0).map(|node| node.strategy)
    }

    pub fn set_strategy(&mut self, id: DetectorId, strategy: Strategy) -> Result<(), DetectorError> {
        self.active_node(id)?;
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.strategy = strategy;
        }
        Ok(())
    }

    pub fn scope(&self, id: DetectorId) -> Option<ScopeId> {
        self.nodes.get(id.0).map(|node| node.scope)
    }

    pub fn parent(&self, id: DetectorId) -> Option<DetectorId> {
        self.nodes.get(id.0).and_then(|node| node.parent)
    }

    pub fn children(&self, id: DetectorId) -> &[DetectorId] {
        self.nodes.get(id.0).map(|node| node.children.as_slice()).unwrap_or(&[])
    }

    /// Live watchers on a node
    pub fn watcher_count(&self, id: DetectorId) -> usize {
        self.nodes.get(id.0).map_or(0, |node| node.watchers.len())
    }

    /// Track `expression` on `node`. Every dependency is read once now to
    /// record its baseline; call dependencies are only tracked when
    /// `allow_calls` is set.
    pub fn watch(
        &mut self,
        node: DetectorId,
        scopes: &ScopeTree,
        expression: Rc<CompiledExpression>,
        allow_calls: bool,
        listener: impl FnMut(&mut WatchContext<'_>) + 'static,
    ) -> Result<WatchHandle, DetectorError> {
        let scope = self.active_node(node)?.scope;

        let mut dependencies = Vec::new();
        for dependency in expression.dependencies() {
            if dependency.is_call() && !allow_calls {
                continue;
            }
            let tracked = self
                .baseline(dependency, scopes, scope)
                .map_err(|error| DetectorError::Baseline {
                    expression: expression.source().to_owned(),
                    dependency: dependency.code().to_owned(),
                    error,
                })?;
            dependencies.push(tracked);
        }

        let watcher = Watcher { expression, dependencies, listener: Some(Box::new(listener)) };
        let Some(entry) = self.nodes.get_mut(node.0) else {
            return Err(DetectorError::Disabled);
        };
        let index = entry.watchers.insert(watcher);
        entry.order.push(index);
        trace!(?node, watchers = entry.watchers.len(), "watch");
        Ok(WatchHandle { node, watcher: index })
    }

    fn baseline(&self, dependency: &Dependency, scopes: &ScopeTree, scope: ScopeId) -> Result<TrackedDependency, BindError> {
        let expression = self.binder.compile_dependency(dependency)?;
        let value = self.binder.run(&expression, scopes, scope)?.result;
        Ok(TrackedDependency {
            code: dependency.code().to_owned(),
            expression,
            snapshot: Snapshot::capture(&value),
            previous: value,
        })
    }

    /// Stop tracking. Unknown or already removed handles are ignored.
    pub fn unwatch(&mut self, handle: WatchHandle) -> bool {
        let Some(node) = self.nodes.get_mut(handle.node.0) else {
            return false;
        };
        if node.watchers.remove(handle.watcher).is_none() {
            return false;
        }
        node.order.retain(|index| *index != handle.watcher);
        true
    }

    /// Permanently disable a node and its descendants, freeing them along
    /// with their watchers. Detaching twice does nothing.
    pub fn detach(&mut self, id: DetectorId) {
        let Some(parent) = self.nodes.get(id.0).map(|node| node.parent) else {
            return;
        };
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p.0)) {
            parent.children.retain(|child| *child != id);
        }

        let mut stack = vec![id];
        let mut removed = 0;
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(current.0) {
                stack.extend(node.children);
                removed += 1;
            }
        }
        debug!(?id, removed, "detached change detector subtree");
    }

    /// Check `id`, then every always-check descendant. A detached node yields
    /// an empty report.
    pub fn check(&mut self, id: DetectorId, scopes: &mut ScopeTree) -> Result<CheckReport, DetectorError> {
        let mut report = CheckReport::default();
        if self.nodes.contains(id.0) {
            self.visit(id, scopes, &mut report);
        }
        Ok(report)
    }

    /// Explicit check of one node, whatever its strategy. This is how a
    /// [`Strategy::SkipUnlessForced`] subtree gets checked.
    pub fn refresh(&mut self, id: DetectorId, scopes: &mut ScopeTree) -> Result<CheckReport, DetectorError> {
        self.check(id, scopes)
    }

    fn visit(&mut self, id: DetectorId, scopes: &mut ScopeTree, report: &mut CheckReport) {
        let Some(node) = self.nodes.get_mut(id.0) else {
            return;
        };
        if node.in_progress {
            trace!(?id, "refresh requested during check; deferring");
            node.recheck = true;
            return;
        }
        node.in_progress = true;
        report.nodes_visited += 1;
        trace!(?id, "checking node");

        let mut passes = 0;
        loop {
            if let Some(node) = self.nodes.get_mut(id.0) {
                node.recheck = false;
            }
            self.check_watchers(id, scopes, report);
            passes += 1;

            let recheck = self.nodes.get(id.0).is_some_and(|node| node.recheck);
            if !recheck {
                break;
            }
            if passes > self.options.max_recheck_passes {
                warn!(?id, passes, "re-check limit reached; remaining changes wait for the next check");
                break;
            }
        }

        let Some(node) = self.nodes.get_mut(id.0) else {
            return;
        };
        node.in_progress = false;

        let children = node.children.clone();
        for child in children {
            let descend = self
                .nodes
                .get(child.0)
                .is_some_and(|node| node.strategy == Strategy::AlwaysCheck);
            if descend {
                self.visit(child, scopes, report);
            }
        }
    }

    fn check_watchers(&mut self, id: DetectorId, scopes: &mut ScopeTree, report: &mut CheckReport) {
        let Some(node) = self.nodes.get(id.0) else {
            return;
        };
        let scope = node.scope;
        let order = node.order.clone();

        for index in order {
            let handle = WatchHandle { node: id, watcher: index };
            let Some(watcher) = self.nodes.get_mut(id.0).and_then(|node| node.watchers.get_mut(index)) else {
                continue;
            };

            // every dependency is read before any baseline moves, so a failure
            // leaves the watcher exactly as it was
            let mut current = Vec::with_capacity(watcher.dependencies.len());
            let mut failed = None;
            for dependency in &watcher.dependencies {
                match self.binder.run(&dependency.expression, scopes, scope) {
                    Ok(outcome) => current.push(outcome.result),
                    Err(error) => {
                        failed = Some((dependency.code.clone(), error));
                        break;
                    }
                }
            }
            if let Some((code, error)) = failed {
                warn!(?id, expression = watcher.expression.source(), dependency = %code, %error, "watch evaluation failed");
                report.errors.push(WatchError { handle, expression: watcher.expression.source().to_owned(), error });
                continue;
            }

            let mut changed = Vec::new();
            for (dependency, value) in watcher.dependencies.iter_mut().zip(current) {
                if dependency.is_dirty(&value) {
                    changed.push(dependency.code.clone());
                    dependency.record(value);
                }
            }
            if changed.is_empty() {
                continue;
            }

            let Some(mut listener) = watcher.listener.take() else {
                continue;
            };
            let expression = watcher.expression.clone();
            debug!(?id, expression = expression.source(), changed = ?changed, "invoking listener");

            let mut context = WatchContext {
                scopes: &mut *scopes,
                binder: &self.binder,
                expression: &expression,
                scope,
                handle,
                changed: &changed,
                refresh_requests: Vec::new(),
                unwatch: Vec::new(),
            };
            listener(&mut context);
            report.listeners_invoked += 1;
            let WatchContext { refresh_requests, unwatch, .. } = context;

            if let Some(watcher) = self.nodes.get_mut(id.0).and_then(|node| node.watchers.get_mut(index)) {
                watcher.listener = Some(listener);
            }
            for handle in unwatch {
                self.unwatch(handle);
            }
            for target in refresh_requests {
                self.visit(target, scopes, report);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Fixture {
        scopes: ScopeTree,
        detector: ChangeDetector,
        scope: ScopeId,
        root: DetectorId,
    }

    fn fixture() -> Fixture {
        let mut scopes = ScopeTree::new();
        let scope = scopes.create_root();
        let mut detector = ChangeDetector::new(Binder::default(), DetectorOptions::default());
        let root = detector.create_root(scope);
        Fixture { scopes, detector, scope, root }
    }

    fn counter() -> (Rc<Cell<usize>>, impl FnMut(&mut WatchContext<'_>) + 'static) {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        (calls, move |_: &mut WatchContext<'_>| seen.set(seen.get() + 1))
    }

    impl Fixture {
        fn watch(&mut self, node: DetectorId, source: &str) -> (WatchHandle, Rc<Cell<usize>>) {
            let expression = self.detector.binder().compile(source).unwrap();
            let (calls, listener) = counter();
            let handle = self.detector.watch(node, &self.scopes, expression, false, listener).unwrap();
            (handle, calls)
        }

        fn check(&mut self) -> CheckReport {
            self.detector.check(self.root, &mut self.scopes).unwrap()
        }
    }

    #[test]
    fn test_scalar_change_notifies_once() {
        let mut f = fixture();
        f.scopes.set(f.scope, "a", Value::from(1)).unwrap();
        f.scopes.set(f.scope, "b", Value::from(2)).unwrap();
        let (_, calls) = f.watch(f.root, "a + b");

        f.check();
        assert_eq!(calls.get(), 0);

        f.scopes.set(f.scope, "a", Value::from(10)).unwrap();
        f.scopes.set(f.scope, "b", Value::from(20)).unwrap();
        let report = f.check();
        assert_eq!(calls.get(), 1);
        assert_eq!(report.listeners_invoked, 1);

        f.check();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_changed_names_reported() {
        let mut f = fixture();
        f.scopes.set(f.scope, "a", Value::from(1)).unwrap();
        f.scopes.set(f.scope, "b", Value::from(2)).unwrap();
        let expression = f.detector.binder().compile("a + b").unwrap();
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = seen.clone();
        f.detector
            .watch(f.root, &f.scopes, expression, false, move |ctx| {
                sink.borrow_mut().extend(ctx.changed().iter().cloned());
            })
            .unwrap();

        f.scopes.set(f.scope, "b", Value::from(3)).unwrap();
        f.check();
        assert_eq!(*seen.borrow(), vec!["b".to_owned()]);
    }

    #[test]
    fn test_call_dependencies_are_opt_in() {
        let mut f = fixture();
        let calls = Rc::new(Cell::new(0.0));
        let ticks = calls.clone();
        let next = loom_expr::Function::native("next", move |_| {
            ticks.set(ticks.get() + 1.0);
            Ok(Value::from(ticks.get()))
        });
        f.scopes.set(f.scope, "next", Value::Function(next)).unwrap();

        let (_, notified) = f.watch(f.root, "next()");
        f.check();
        assert_eq!(calls.get(), 0.0);
        assert_eq!(notified.get(), 0);

        let expression = f.detector.binder().compile("next()").unwrap();
        let (tracked, listener) = counter();
        f.detector.watch(f.root, &f.scopes, expression, true, listener).unwrap();
        f.check();
        assert_eq!(tracked.get(), 1);
    }

    #[test]
    fn test_listener_does_not_retrigger_itself() {
        let mut f = fixture();
        f.scopes.set(f.scope, "n", Value::from(0)).unwrap();
        let expression = f.detector.binder().compile("n").unwrap();
        let (calls, mut count) = counter();
        f.detector
            .watch(f.root, &f.scopes, expression, false, move |ctx| {
                count(ctx);
                let scope = ctx.scope();
                let n = ctx.scopes().resolve(scope, "n").to_number();
                if n < 5.0 {
                    ctx.scopes_mut().set(scope, "n", Value::from(n + 1.0)).unwrap();
                }
            })
            .unwrap();

        f.scopes.set(f.scope, "n", Value::from(1)).unwrap();
        f.check();
        assert_eq!(calls.get(), 1);
        f.check();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_errors_do_not_stop_siblings() {
        let mut f = fixture();
        f.scopes.set(f.scope, "user", Value::object([("name", Value::from("ada"))])).unwrap();
        f.scopes.set(f.scope, "count", Value::from(0)).unwrap();
        let (_, broken) = f.watch(f.root, "user.name");
        let (_, healthy) = f.watch(f.root, "count");

        f.scopes.set(f.scope, "user", Value::Null).unwrap();
        f.scopes.set(f.scope, "count", Value::from(1)).unwrap();
        let report = f.check();
        assert_eq!(broken.get(), 0);
        assert_eq!(healthy.get(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].expression, "user.name");
    }

    #[test]
    fn test_baseline_failure() {
        let mut f = fixture();
        f.scopes.set(f.scope, "user", Value::Null).unwrap();
        let expression = f.detector.binder().compile("user.name").unwrap();
        let err = f.detector.watch(f.root, &f.scopes, expression, false, |_| {}).unwrap_err();
        assert!(matches!(err, DetectorError::Baseline { ref dependency, .. } if dependency == "user.name"));
    }

    #[test]
    fn test_unwatch_self() {
        let mut f = fixture();
        f.scopes.set(f.scope, "n", Value::from(0)).unwrap();
        let expression = f.detector.binder().compile("n").unwrap();
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        f.detector
            .watch(f.root, &f.scopes, expression, false, move |ctx| {
                seen.set(seen.get() + 1);
                ctx.unwatch_self();
            })
            .unwrap();

        f.scopes.set(f.scope, "n", Value::from(1)).unwrap();
        f.check();
        f.scopes.set(f.scope, "n", Value::from(2)).unwrap();
        f.check();
        assert_eq!(calls.get(), 1);
        assert_eq!(f.detector.watcher_count(f.root), 0);
    }

    #[test]
    fn test_refresh_request_runs_before_walk_continues() {
        let mut f = fixture();
        let child_scope = f.scopes.create_child(f.scope).unwrap();
        let child = f.detector.create_child(f.root, child_scope, Strategy::SkipUnlessForced).unwrap();
        f.scopes.set(f.scope, "trigger", Value::from(0)).unwrap();
        f.scopes.set(f.scope, "data", Value::from(0)).unwrap();
        let (_, child_calls) = f.watch(child, "data");

        let expression = f.detector.binder().compile("trigger").unwrap();
        f.detector
            .watch(f.root, &f.scopes, expression, false, move |ctx| {
                let scope = ctx.scope();
                ctx.scopes_mut().set(scope, "data", Value::from(1)).unwrap();
                ctx.request_refresh(child);
            })
            .unwrap();

        f.scopes.set(f.scope, "trigger", Value::from(1)).unwrap();
        let report = f.check();
        assert_eq!(child_calls.get(), 1);
        assert_eq!(report.nodes_visited, 2);
    }

    #[test]
    fn test_self_refresh_is_bounded() {
        let mut f = fixture();
        f.scopes.set(f.scope, "n", Value::from(0)).unwrap();
        let expression = f.detector.binder().compile("n").unwrap();
        let root = f.root;
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        f.detector
            .watch(f.root, &f.scopes, expression, false, move |ctx| {
                seen.set(seen.get() + 1);
                let scope = ctx.scope();
                let n = ctx.scopes().resolve(scope, "n").to_number();
                ctx.scopes_mut().set(scope, "n", Value::from(n + 1.0)).unwrap();
                ctx.request_refresh(root);
            })
            .unwrap();

        f.scopes.set(f.scope, "n", Value::from(1)).unwrap();
        f.check();
        // first pass plus max_recheck_passes re-checks
        assert_eq!(calls.get(), 1 + DetectorOptions::default().max_recheck_passes);
    }

    #[test]
    fn test_detach_frees_nodes() {
        let mut f = fixture();
        for _ in 0..1000 {
            let row = f.detector.create_child(f.root, f.scope, Strategy::AlwaysCheck).unwrap();
            f.detector.create_child(row, f.scope, Strategy::AlwaysCheck).unwrap();
            f.watch(row, "1");
            f.detector.detach(row);
        }
        assert_eq!(f.detector.len(), 1);
    }

    #[test]
    fn test_detach_disables_subtree() {
        let mut f = fixture();
        let child = f.detector.create_child(f.root, f.scope, Strategy::AlwaysCheck).unwrap();
        let grandchild = f.detector.create_child(child, f.scope, Strategy::AlwaysCheck).unwrap();
        f.scopes.set(f.scope, "x", Value::from(1)).unwrap();
        let (_, calls) = f.watch(grandchild, "x");

        f.detector.detach(child);
        assert_eq!(f.detector.state(grandchild), DetectorState::Disabled);
        assert_eq!(f.detector.state(f.root), DetectorState::Active);
        assert!(f.detector.children(f.root).is_empty());
        f.scopes.set(f.scope, "x", Value::from(2)).unwrap();
        f.check();
        assert_eq!(calls.get(), 0);

        let report = f.detector.refresh(grandchild, &mut f.scopes).unwrap();
        assert_eq!(report.nodes_visited, 0);
        assert!(matches!(
            f.detector.create_child(child, f.scope, Strategy::AlwaysCheck),
            Err(DetectorError::Disabled)
        ));
    }
}
