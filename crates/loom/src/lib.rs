//! Loom
//!
//! A reactive template-binding engine: expressions embedded in markup are
//! compiled once, evaluated against a tree of scopes and re-checked on every
//! host tick, calling back whenever what they read changes.
//!
//! # Example
//! ```rust,ignore
//! use loom::{Config, Engine, Value};
//!
//! let mut engine = Engine::new(Config::default())?;
//! let scope = engine.root_scope();
//! engine.scopes_mut().set(scope, "name", Value::from("ada"))?;
//!
//! let root = engine.root_node();
//! engine.bind("name | uppercase", root, |ctx| {
//!     println!("{}", ctx.value().unwrap_or_default());
//! })?;
//! engine.tick()?;
//! ```

mod config;
mod engine;

pub use config::{Config, ConfigError};
pub use engine::{Engine, EngineError};

pub use loom_expr::{
    compile, CompileError, CompileOptions, CompiledExpression, Dependency, EvalError, Function, Value,
};
pub use loom_reactive::{
    diff, identity_key, BindError, Binder, CheckReport, CollectionKey, DetectorError, DetectorId, DiffError,
    FilterRegistry, IterableDiffer, Operation, ScopeError, ScopeId, ScopeTree, Strategy, WatchContext,
    WatchHandle,
};

// Re-export sub-crates for advanced usage
pub use loom_expr as expr;
pub use loom_reactive as reactive;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
