//! Engine - Main entry point

use crate::{Config, ConfigError};
use loom_expr::{EvalError, Value};
use loom_reactive::{
    BindError, Binder, ChangeDetector, CheckReport, DetectorError, DetectorId, ScopeError, ScopeId, ScopeTree,
    Strategy, WatchContext, WatchHandle,
};

/// Scope tree, change-detector tree and binder behind one host-driven tick
pub struct Engine {
    config: Config,
    scopes: ScopeTree,
    detector: ChangeDetector,
    root_scope: ScopeId,
    root_node: DetectorId,
    ticks: u64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scopes", &self.scopes.len())
            .field("detector", &self.detector)
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl Engine {
    /// Create an engine with one root scope and one root detector node
    pub fn new(config: Config) -> Result<Self, EngineError> {
        let binder = Binder::new(config.compile_options()?, config.binder_options()?);
        let mut detector = ChangeDetector::new(binder, config.detector_options());
        let mut scopes = ScopeTree::new();
        let root_scope = scopes.create_root();
        let root_node = detector.create_root(root_scope);

        tracing::info!("Loom {} initialized", crate::VERSION);
        Ok(Self { config, scopes, detector, root_scope, root_node, ticks: 0 })
    }

    /// Get engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root_scope(&self) -> ScopeId {
        self.root_scope
    }

    pub fn root_node(&self) -> DetectorId {
        self.root_node
    }

    pub fn scopes(&self) -> &ScopeTree {
        &self.scopes
    }

    pub fn scopes_mut(&mut self) -> &mut ScopeTree {
        &mut self.scopes
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn binder(&self) -> &Binder {
        self.detector.binder()
    }

    /// Scope a detector node evaluates in
    pub fn scope_of(&self, node: DetectorId) -> Result<ScopeId, EngineError> {
        self.detector.scope(node).ok_or(EngineError::Detector(DetectorError::Disabled))
    }

    /// Add a filter usable as `value | name:arg`
    pub fn register_filter(
        &mut self,
        name: &str,
        filter: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    ) {
        self.detector.binder_mut().filters_mut().register(name, filter);
    }

    /// Attach a child UI node: a child scope plus a child detector node
    pub fn create_child(&mut self, parent: DetectorId, strategy: Strategy) -> Result<DetectorId, EngineError> {
        let parent_scope = self.scope_of(parent)?;
        let scope = self.scopes.create_child(parent_scope)?;
        match self.detector.create_child(parent, scope, strategy) {
            Ok(node) => Ok(node),
            Err(err) => {
                self.scopes.detach(scope);
                Err(err.into())
            }
        }
    }

    /// Detach a UI node: its detector subtree is disabled and, when the node
    /// owns its scope, that scope subtree is discarded
    pub fn detach(&mut self, node: DetectorId) {
        let scope = self.detector.scope(node);
        let parent_scope = self.detector.parent(node).and_then(|parent| self.detector.scope(parent));
        self.detector.detach(node);
        if let Some(scope) = scope.filter(|scope| Some(*scope) != parent_scope) {
            let removed = self.scopes.detach(scope);
            tracing::debug!(removed, "discarded scopes of detached node");
        }
    }

    /// Compile `source` and watch it on `node`. Function calls inside the
    /// expression are not tracked as dependencies.
    pub fn bind(
        &mut self,
        source: &str,
        node: DetectorId,
        listener: impl FnMut(&mut WatchContext<'_>) + 'static,
    ) -> Result<WatchHandle, EngineError> {
        self.watch(source, node, false, listener)
    }

    /// [`bind`](Self::bind) with control over call dependencies
    pub fn watch(
        &mut self,
        source: &str,
        node: DetectorId,
        allow_calls: bool,
        listener: impl FnMut(&mut WatchContext<'_>) + 'static,
    ) -> Result<WatchHandle, EngineError> {
        let expression = self.detector.binder().compile(source)?;
        Ok(self.detector.watch(node, &self.scopes, expression, allow_calls, listener)?)
    }

    pub fn unbind(&mut self, handle: WatchHandle) -> bool {
        self.detector.unwatch(handle)
    }

    /// Evaluate once in `scope`; exports are merged into the scope tree
    pub fn evaluate(&mut self, source: &str, scope: ScopeId) -> Result<Value, EngineError> {
        Ok(self.detector.binder().evaluate(source, &mut self.scopes, scope)?)
    }

    /// One host tick: check the whole always-check tree
    pub fn tick(&mut self) -> Result<CheckReport, EngineError> {
        self.ticks += 1;
        let report = self.detector.check(self.root_node, &mut self.scopes)?;
        tracing::debug!(
            tick = self.ticks,
            nodes = report.nodes_visited,
            listeners = report.listeners_invoked,
            errors = report.errors.len(),
            "tick"
        );
        Ok(report)
    }

    /// Explicit check of one node regardless of its strategy
    pub fn refresh(&mut self, node: DetectorId) -> Result<CheckReport, EngineError> {
        Ok(self.detector.refresh(node, &mut self.scopes)?)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Engine error
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Binding error: {0}")]
    Bind(#[from] BindError),

    #[error("Change detection error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),
}
