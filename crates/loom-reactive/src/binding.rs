//! Binder
//!
//! Composes the expression compiler, the scope tree and the sandboxed
//! evaluator: `evaluate(expression, scope)`.
//!
//! Only the names a program actually references are looked up, walking the
//! scope chain. Exported names are merged back into the scope tree after the
//! run.

use crate::filters::FilterRegistry;
use crate::scope::{ScopeError, ScopeId, ScopeTree};
use loom_expr::{
    compile, evaluate_program, CompileError, CompileOptions, CompiledExpression, Dependency, EvalError,
    EvalOptions, EvalOutcome, Value, Variables, FILTERS_VARIABLE,
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum BindError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// Evaluation settings
#[derive(Debug, Clone)]
pub struct BinderOptions {
    /// Withhold names that resolve nowhere so reading them is a
    /// `ReferenceError`. When off they read as `undefined`.
    pub strict_references: bool,
    pub max_call_depth: usize,
}

impl Default for BinderOptions {
    fn default() -> Self {
        Self { strict_references: true, max_call_depth: EvalOptions::default().max_call_depth }
    }
}

/// Compiles, caches and evaluates binding expressions against scopes
#[derive(Debug)]
pub struct Binder {
    compile_options: CompileOptions,
    fragment_options: CompileOptions,
    options: BinderOptions,
    filters: FilterRegistry,
    cache: RefCell<HashMap<String, Rc<CompiledExpression>>>,
    fragments: RefCell<HashMap<String, Rc<CompiledExpression>>>,
}

impl Default for Binder {
    fn default() -> Self {
        Self::new(CompileOptions::default(), BinderOptions::default())
    }
}

impl Binder {
    pub fn new(compile_options: CompileOptions, options: BinderOptions) -> Self {
        Self {
            fragment_options: compile_options.fragment(),
            compile_options,
            options,
            filters: FilterRegistry::with_builtins(),
            cache: RefCell::default(),
            fragments: RefCell::default(),
        }
    }

    pub fn compile_options(&self) -> &CompileOptions {
        &self.compile_options
    }

    pub fn options(&self) -> &BinderOptions {
        &self.options
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterRegistry {
        &mut self.filters
    }

    /// Number of distinct expressions compiled so far
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Compile once per distinct source
    pub fn compile(&self, source: &str) -> Result<Rc<CompiledExpression>, BindError> {
        cached_compile(&self.cache, source, &self.compile_options)
    }

    /// Compile a dependency path on its own, so it can be re-read without
    /// running the whole expression. Exportable paths keep their `#` so an
    /// unassigned name reads as `undefined` instead of failing.
    pub fn compile_dependency(&self, dependency: &Dependency) -> Result<Rc<CompiledExpression>, BindError> {
        let source = if dependency.is_exportable() {
            format!("#{}", dependency.code())
        } else {
            dependency.code().to_owned()
        };
        cached_compile(&self.fragments, &source, &self.fragment_options)
    }

    /// Compile and evaluate `source` in `scope`, merging exports into the tree
    pub fn evaluate(&self, source: &str, scopes: &mut ScopeTree, scope: ScopeId) -> Result<Value, BindError> {
        let compiled = self.compile(source)?;
        self.evaluate_compiled(&compiled, scopes, scope)
    }

    /// Evaluate in `scope` and merge exports: each exported name is written
    /// where it already resolves, otherwise declared on `scope`
    pub fn evaluate_compiled(
        &self,
        expression: &CompiledExpression,
        scopes: &mut ScopeTree,
        scope: ScopeId,
    ) -> Result<Value, BindError> {
        let outcome = self.run(expression, scopes, scope)?;
        for (name, value) in outcome.exports {
            let target = scopes.assign(scope, &name, value)?;
            debug!(name = %name, ?target, "merged export into scope");
        }
        Ok(outcome.result)
    }

    /// Evaluate without touching the scope tree
    pub fn run(&self, expression: &CompiledExpression, scopes: &ScopeTree, scope: ScopeId) -> Result<EvalOutcome, BindError> {
        if !scopes.contains(scope) {
            return Err(ScopeError::UnknownScope.into());
        }

        let mut variables = Variables::new();
        for name in expression.program().free_names() {
            match scopes.lookup(scope, name) {
                Some(value) => {
                    variables.insert(name.to_string(), value);
                }
                None if &**name == FILTERS_VARIABLE => {
                    variables.insert(name.to_string(), self.filters.as_value());
                }
                None if self.options.strict_references => {}
                None => {
                    variables.insert(name.to_string(), Value::Undefined);
                }
            }
        }

        let exportable: Vec<String> = expression.exportable_names().map(str::to_owned).collect();
        let options = EvalOptions {
            auto_instantiate: exportable.clone(),
            auto_export: exportable,
            max_call_depth: self.options.max_call_depth,
        };
        Ok(evaluate_program(expression.program(), &variables, &options)?)
    }

    /// Current value of one dependency path
    pub fn evaluate_dependency(&self, dependency: &Dependency, scopes: &ScopeTree, scope: ScopeId) -> Result<Value, BindError> {
        let compiled = self.compile_dependency(dependency)?;
        Ok(self.run(&compiled, scopes, scope)?.result)
    }
}

fn cached_compile(
    cache: &RefCell<HashMap<String, Rc<CompiledExpression>>>,
    source: &str,
    options: &CompileOptions,
) -> Result<Rc<CompiledExpression>, BindError> {
    if let Some(compiled) = cache.borrow().get(source) {
        trace!(source, "compile cache hit");
        return Ok(compiled.clone());
    }
    let compiled = Rc::new(compile(source, options)?);
    cache.borrow_mut().insert(source.to_owned(), compiled.clone());
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (ScopeTree, ScopeId, ScopeId) {
        let mut scopes = ScopeTree::new();
        let root = scopes.create_root();
        let child = scopes.create_child(root).unwrap();
        (scopes, root, child)
    }

    #[test]
    fn test_evaluate_through_scope_chain() {
        let (mut scopes, root, child) = tree();
        scopes.set(root, "price", Value::from(4)).unwrap();
        scopes.set(child, "qty", Value::from(3)).unwrap();

        let binder = Binder::default();
        assert_eq!(binder.evaluate("price * qty", &mut scopes, child).unwrap(), Value::from(12));
    }

    #[test]
    fn test_compile_cache() {
        let binder = Binder::default();
        let a = binder.compile("a + 1").unwrap();
        let b = binder.compile("a + 1").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(binder.cached(), 1);
    }

    #[test]
    fn test_export_declares_on_evaluating_scope() {
        let (mut scopes, root, child) = tree();
        scopes.set(root, "a", Value::from(5)).unwrap();

        let binder = Binder::default();
        assert_eq!(binder.evaluate("#b = a", &mut scopes, child).unwrap(), Value::from(5));
        assert_eq!(scopes.get(child, "b").unwrap(), Some(Value::from(5)));
        assert_eq!(scopes.get(root, "b").unwrap(), None);
    }

    #[test]
    fn test_export_updates_owner() {
        let (mut scopes, root, child) = tree();
        scopes.set(root, "count", Value::from(1)).unwrap();

        let binder = Binder::default();
        binder.evaluate("#count += 1", &mut scopes, child).unwrap();
        assert_eq!(scopes.get(root, "count").unwrap(), Some(Value::from(2)));
        assert_eq!(scopes.get(child, "count").unwrap(), None);
    }

    #[test]
    fn test_missing_names_read_as_undefined_when_lenient() {
        let (mut scopes, _, child) = tree();
        let binder = Binder::new(
            CompileOptions::default(),
            BinderOptions { strict_references: false, ..Default::default() },
        );
        assert_eq!(binder.evaluate("typeof missing", &mut scopes, child).unwrap(), Value::from("undefined"));
        assert_eq!(binder.evaluate("missing", &mut scopes, child).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_unresolved_names_are_rejected_by_default() {
        let (mut scopes, _, child) = tree();
        let binder = Binder::default();
        let err = binder.evaluate("missing + 1", &mut scopes, child).unwrap_err();
        assert!(matches!(err, BindError::Eval(EvalError::Reference(ref name)) if name == "missing"));
        let err = binder.evaluate("window", &mut scopes, child).unwrap_err();
        assert!(matches!(err, BindError::Eval(EvalError::Reference(ref name)) if name == "window"));
        assert_eq!(binder.evaluate("typeof window", &mut scopes, child).unwrap(), Value::from("undefined"));
    }

    #[test]
    fn test_parameter_names_do_not_hide_scope_variables() {
        let (mut scopes, root, child) = tree();
        scopes.set(root, "x", Value::from(3)).unwrap();
        let binder = Binder::default();
        let doubled = binder.evaluate("(function (x) { return x * 2 })(x)", &mut scopes, child).unwrap();
        assert_eq!(doubled, Value::from(6));
        let shadowed = binder.evaluate("(function () { var x = 10; return x })() + x", &mut scopes, child).unwrap();
        assert_eq!(shadowed, Value::from(13));
    }

    #[test]
    fn test_builtin_filters() {
        let (mut scopes, root, _) = tree();
        scopes.set(root, "name", Value::from("  ada ")).unwrap();
        scopes.set(root, "nothing", Value::Undefined).unwrap();
        let binder = Binder::default();
        assert_eq!(binder.evaluate("name | trim | uppercase", &mut scopes, root).unwrap(), Value::from("ADA"));
        assert_eq!(binder.evaluate("nothing | default:'-'", &mut scopes, root).unwrap(), Value::from("-"));
    }

    #[test]
    fn test_custom_filter() {
        let (mut scopes, root, _) = tree();
        scopes.set(root, "n", Value::from(21)).unwrap();
        let mut binder = Binder::default();
        binder.filters_mut().register("double", |args| {
            Ok(Value::from(args.first().map(Value::to_number).unwrap_or(f64::NAN) * 2.0))
        });
        assert_eq!(binder.evaluate("n | double", &mut scopes, root).unwrap(), Value::from(42));
    }

    #[test]
    fn test_dependency_values() {
        let (mut scopes, root, _) = tree();
        scopes.set(root, "user", Value::object([("name", Value::from("ada"))])).unwrap();
        let binder = Binder::default();
        let compiled = binder.compile("user.name + '!'").unwrap();
        let dependency = &compiled.dependencies()[0];
        assert_eq!(dependency.code(), "user.name");
        assert_eq!(binder.evaluate_dependency(dependency, &scopes, root).unwrap(), Value::from("ada"));
    }

    #[test]
    fn test_unknown_scope() {
        let (mut scopes, _, child) = tree();
        scopes.detach(child);
        let binder = Binder::default();
        assert!(matches!(
            binder.evaluate("1", &mut scopes, child),
            Err(BindError::Scope(ScopeError::UnknownScope))
        ));
    }

    #[test]
    fn test_compile_errors_surface() {
        let (mut scopes, root, _) = tree();
        let binder = Binder::default();
        assert!(matches!(binder.evaluate("(a", &mut scopes, root), Err(BindError::Compile(_))));
    }
}
