//! Filter Registry
//!
//! Named functions reachable from `value | name:arg` pipes. The registry is
//! handed to evaluations as one object under [`loom_expr::FILTERS_VARIABLE`], which the
//! default filter template dereferences.

use indexmap::IndexMap;
use loom_expr::{EvalError, Function, Value};

/// Named filter functions
#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    filters: IndexMap<String, Function>,
}

impl FilterRegistry {
    /// Registry without any filters
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with `uppercase`, `lowercase`, `trim`, `default`, `length`,
    /// `join` and `json`
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("uppercase", |args| Ok(map_text(args, |s| s.to_uppercase())));
        registry.register("lowercase", |args| Ok(map_text(args, |s| s.to_lowercase())));
        registry.register("trim", |args| Ok(map_text(args, |s| s.trim().to_owned())));
        registry.register("default", default_filter);
        registry.register("length", length_filter);
        registry.register("join", join_filter);
        registry.register("json", json_filter);
        registry
    }

    /// Add or replace a filter. Arguments arrive as `[value, arg0, arg1, ..]`.
    pub fn register(
        &mut self,
        name: &str,
        filter: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    ) {
        self.filters.insert(name.to_owned(), Function::native(name, filter));
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.filters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    /// Fresh object bound to [`loom_expr::FILTERS_VARIABLE`] for one evaluation, so an
    /// expression writing to it never reaches the registry
    pub fn as_value(&self) -> Value {
        Value::object(self.filters.iter().map(|(name, f)| (name.as_str(), Value::Function(f.clone()))))
    }
}

fn input(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or_default()
}

fn map_text(args: &[Value], f: impl Fn(&str) -> String) -> Value {
    match input(args) {
        value if value.is_nullish() => Value::from(""),
        value => Value::from(f(&value.to_string())),
    }
}

fn default_filter(args: &[Value]) -> Result<Value, EvalError> {
    let value = input(args);
    let empty = value.is_nullish() || value.as_str().is_some_and(str::is_empty);
    Ok(if empty { args.get(1).cloned().unwrap_or_default() } else { value })
}

fn length_filter(args: &[Value]) -> Result<Value, EvalError> {
    let length = match input(args) {
        Value::Array(array) => array.len(),
        Value::Object(object) => object.len(),
        Value::String(s) => s.chars().count(),
        _ => 0,
    };
    Ok(Value::from(length))
}

fn join_filter(args: &[Value]) -> Result<Value, EvalError> {
    let separator = match args.get(1) {
        None | Some(Value::Undefined) => ",".to_owned(),
        Some(other) => other.to_string(),
    };
    match input(args) {
        Value::Array(array) => {
            let parts: Vec<String> = array
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_string() })
                .collect();
            Ok(Value::from(parts.join(&separator)))
        }
        value if value.is_nullish() => Ok(Value::from("")),
        other => Err(EvalError::Type(format!("join filter expects an array, got {}", other.type_of()))),
    }
}

fn json_filter(args: &[Value]) -> Result<Value, EvalError> {
    let value = input(args);
    let pretty = args.get(1).is_some_and(|indent| indent.to_number() > 0.0);
    let text = if pretty { serde_json::to_string_pretty(&value) } else { serde_json::to_string(&value) };
    text.map(Value::from)
        .map_err(|e| EvalError::Type(format!("json filter: {e}")))
}
