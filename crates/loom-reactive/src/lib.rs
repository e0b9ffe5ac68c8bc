//! Loom Reactive Core
//!
//! Everything between a compiled expression and a UI refresh.
//!
//! # Components
//! - [`ScopeTree`]: parent-linked variable maps, one per UI node
//! - [`Binder`]: compile cache plus evaluation of expressions in a scope
//! - [`ChangeDetector`]: dirty-checking tree of watchers
//! - [`IterableDiffer`]: collection diffs for repeat constructs
//!
//! # Example
//! ```rust,ignore
//! use loom_reactive::{Binder, ChangeDetector, DetectorOptions, ScopeTree};
//!
//! let mut scopes = ScopeTree::new();
//! let scope = scopes.create_root();
//! let mut detector = ChangeDetector::new(Binder::default(), DetectorOptions::default());
//! let root = detector.create_root(scope);
//!
//! let expression = detector.binder().compile("user.name | uppercase")?;
//! detector.watch(root, &scopes, expression, false, |ctx| {
//!     println!("now {:?}", ctx.value());
//! })?;
//! detector.check(root, &mut scopes)?;
//! ```

pub mod arena;
mod binding;
mod detector;
mod differ;
mod filters;
mod scope;
mod snapshot;

pub use arena::{GenArena, GenIndex};
pub use binding::{BindError, Binder, BinderOptions};
pub use detector::{
    ChangeDetector, CheckReport, DetectorError, DetectorId, DetectorOptions, DetectorState, Listener, Strategy,
    WatchContext, WatchError, WatchHandle,
};
pub use differ::{diff, identity_key, DiffError, IterableDiffer, KeyFn, Operation};
pub use filters::FilterRegistry;
pub use scope::{ScopeError, ScopeId, ScopeTree};
pub use snapshot::{CollectionKey, ShallowDiff, Snapshot};
