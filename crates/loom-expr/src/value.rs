//! Runtime Values
//!
//! Scalars are held inline; arrays and objects are shared, interior-mutable
//! references, so two values may alias the same collection. Dirty checking
//! relies on that: identity is cheap to compare, contents need a snapshot.

use crate::evaluator::{Closure, EvalError};
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// Runtime value
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Array),
    Object(Object),
    Function(Function),
}

/// Longest array an expression may grow; arrays are stored densely
pub const MAX_ARRAY_LENGTH: usize = 1 << 24;

/// Shared array
#[derive(Clone, Default)]
pub struct Array(Rc<RefCell<Vec<Value>>>);

fn invalid_length() -> EvalError {
    EvalError::Range("Invalid array length".to_owned())
}

impl Array {
    pub fn new() -> Self { Self::default() }
    pub fn from_vec(values: Vec<Value>) -> Self { Self(Rc::new(RefCell::new(values))) }

    pub fn len(&self) -> usize { self.0.borrow().len() }
    pub fn is_empty(&self) -> bool { self.0.borrow().is_empty() }
    pub fn get(&self, index: usize) -> Value { self.0.borrow().get(index).cloned().unwrap_or_default() }
    pub fn push(&self, value: Value) { self.0.borrow_mut().push(value); }
    pub fn pop(&self) -> Value { self.0.borrow_mut().pop().unwrap_or_default() }
    pub fn to_vec(&self) -> Vec<Value> { self.0.borrow().clone() }
    pub fn borrow(&self) -> Ref<'_, Vec<Value>> { self.0.borrow() }
    pub fn borrow_mut(&self) -> RefMut<'_, Vec<Value>> { self.0.borrow_mut() }

    /// Store at `index`, padding with `undefined`
    pub fn set(&self, index: usize, value: Value) -> Result<(), EvalError> {
        let len = self.len();
        if index >= len {
            let grown = index.checked_add(1).ok_or_else(invalid_length)?;
            self.set_len(grown)?;
        }
        if let Some(slot) = self.0.borrow_mut().get_mut(index) {
            *slot = value;
        }
        Ok(())
    }

    /// Truncate or pad with `undefined` up to [`MAX_ARRAY_LENGTH`]
    pub fn set_len(&self, len: usize) -> Result<(), EvalError> {
        if len > MAX_ARRAY_LENGTH {
            return Err(invalid_length());
        }
        let mut elements = self.0.borrow_mut();
        if len > elements.len() {
            let additional = len - elements.len();
            elements.try_reserve(additional).map_err(|_| invalid_length())?;
        }
        elements.resize(len, Value::Undefined);
        Ok(())
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// Shared object with insertion-ordered keys
#[derive(Clone, Default)]
pub struct Object(Rc<RefCell<IndexMap<Rc<str>, Value>>>);

impl Object {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, key: &str) -> Option<Value> { self.0.borrow().get(key).cloned() }
    pub fn contains_key(&self, key: &str) -> bool { self.0.borrow().contains_key(key) }
    pub fn len(&self) -> usize { self.0.borrow().len() }
    pub fn is_empty(&self) -> bool { self.0.borrow().is_empty() }
    pub fn keys(&self) -> Vec<Rc<str>> { self.0.borrow().keys().cloned().collect() }
    pub fn borrow(&self) -> Ref<'_, IndexMap<Rc<str>, Value>> { self.0.borrow() }

    pub fn set(&self, key: impl Into<Rc<str>>, value: Value) {
        self.0.borrow_mut().insert(key.into(), value);
    }

    /// Remove a key, keeping the order of the others
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().shift_remove(key)
    }

    pub fn entries(&self) -> Vec<(Rc<str>, Value)> {
        self.0.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl<K: Into<Rc<str>>> FromIterator<(K, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let map = iter.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self(Rc::new(RefCell::new(map)))
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

/// Signature of native functions
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, EvalError>;

pub enum FunctionKind {
    Native { name: Rc<str>, call: Box<NativeFn> },
    Closure(Closure),
}

/// Callable value
#[derive(Clone)]
pub struct Function(Rc<FunctionKind>);

impl Function {
    pub fn native(name: impl Into<Rc<str>>, call: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static) -> Self {
        Self(Rc::new(FunctionKind::Native { name: name.into(), call: Box::new(call) }))
    }

    pub(crate) fn closure(closure: Closure) -> Self {
        Self(Rc::new(FunctionKind::Closure(closure)))
    }

    pub fn kind(&self) -> &FunctionKind {
        &self.0
    }

    pub fn name(&self) -> &str {
        match &*self.0 {
            FunctionKind::Native { name, .. } => name,
            FunctionKind::Closure(closure) => closure.name(),
        }
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// Hashable identity: scalars by value, collections and functions by reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Undefined,
    Null,
    Bool(bool),
    Number(u64),
    String(Rc<str>),
    Reference(usize),
}

impl Value {
    pub fn array(values: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(values.into_iter().collect())
    }

    pub fn object<K: Into<Rc<str>>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(entries.into_iter().collect())
    }

    pub fn is_undefined(&self) -> bool { matches!(self, Value::Undefined) }
    pub fn is_nullish(&self) -> bool { matches!(self, Value::Undefined | Value::Null) }

    /// Arrays and objects, the values that get shallow snapshots
    pub fn is_collection(&self) -> bool { matches!(self, Value::Array(_) | Value::Object(_)) }

    pub fn as_number(&self) -> Option<f64> {
        match self { Value::Number(n) => Some(*n), _ => None }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { Value::String(s) => Some(s), _ => None }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self { Value::Array(a) => Some(a), _ => None }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self { Value::Object(o) => Some(o), _ => None }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self { Value::Function(f) => Some(f), _ => None }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => if *b { 1.0 } else { 0.0 },
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Array(a) => match a.len() {
                0 => 0.0,
                1 => a.get(0).to_number(),
                _ => f64::NAN,
            },
            Value::Object(_) | Value::Function(_) => f64::NAN,
        }
    }

    /// Key used for member access with a computed property
    pub fn to_property_key(&self) -> Rc<str> {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string().into(),
        }
    }

    /// Identity comparison used to decide whether a value changed.
    ///
    /// Like `===`, except that `NaN` equals itself.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Value::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            _ => self.strict_equals(other),
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        match self {
            Value::Undefined => IdentityKey::Undefined,
            Value::Null => IdentityKey::Null,
            Value::Bool(b) => IdentityKey::Bool(*b),
            Value::Number(n) if n.is_nan() => IdentityKey::Number(f64::NAN.to_bits()),
            Value::Number(n) if *n == 0.0 => IdentityKey::Number(0f64.to_bits()),
            Value::Number(n) => IdentityKey::Number(n.to_bits()),
            Value::String(s) => IdentityKey::String(s.clone()),
            Value::Array(a) => IdentityKey::Reference(a.address()),
            Value::Object(o) => IdentityKey::Reference(o.address()),
            Value::Function(f) => IdentityKey::Reference(f.address()),
        }
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    match trimmed {
        "" => 0.0,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse().unwrap_or(f64::NAN),
    }
}

/// Number formatting as expressions print them: integers without a fraction
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_owned() } else { "-Infinity".to_owned() }
    } else if n == 0.0 {
        "0".to_owned()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(a) => {
                for (i, element) in a.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    if !element.is_nullish() {
                        write!(f, "{element}")?;
                    }
                }
                Ok(())
            }
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function(func) => write!(f, "function {}() {{ [code] }}", func.name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(a) => f.debug_list().entries(a.borrow().iter()).finish(),
            Value::Object(o) => f.debug_map().entries(o.borrow().iter()).finish(),
            Value::Function(func) => write!(f, "[Function: {}]", func.name()),
            other => write!(f, "{other}"),
        }
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.borrow().iter()).finish()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.borrow().iter()).finish()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name())
    }
}

/// Structural equality, for assertions and snapshots; `NaN` equals `NaN`
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b) || *a.borrow() == *b.borrow(),
            (Value::Object(a), Value::Object(b)) => {
                a.ptr_eq(b) || {
                    let (a, b) = (a.borrow(), b.borrow());
                    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v == w))
                }
            }
            _ => self.same_value(other),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null | Value::Function(_) => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                serializer.serialize_i64(*n as i64)
            }
            Value::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            Value::Number(_) => serializer.serialize_none(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(a) => {
                let elements = a.borrow();
                let mut seq = serializer.serialize_seq(Some(elements.len()))?;
                for element in elements.iter() {
                    seq.serialize_element(element)?;
                }
                seq.end()
            }
            Value::Object(o) => {
                let entries = o.borrow();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries.iter().filter(|(_, v)| !matches!(v, Value::Undefined | Value::Function(_))) {
                    map.serialize_entry(&**key, value)?;
                }
                map.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self { Value::Number(n) }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self { Value::Number(n.into()) }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self { Value::Number(n as f64) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::String(s.into()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::String(s.into()) }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self { Value::String(s) }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self { Value::Array(Array::from_vec(values)) }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self { Value::Array(a) }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self { Value::Object(o) }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self { Value::Function(f) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(Value::array([]).is_truthy());
    }

    #[test]
    fn test_array_growth_is_bounded() {
        let array = Array::from_vec(vec![Value::from(1)]);
        array.set(3, Value::from(4)).unwrap();
        assert_eq!(array.len(), 4);
        assert!(array.get(2).is_undefined());

        assert!(matches!(array.set(MAX_ARRAY_LENGTH, Value::Null), Err(EvalError::Range(_))));
        assert!(matches!(array.set(usize::MAX, Value::Null), Err(EvalError::Range(_))));
        assert!(matches!(array.set_len(usize::MAX), Err(EvalError::Range(_))));
        assert_eq!(array.len(), 4);

        array.set_len(1).unwrap();
        assert_eq!(array.to_vec(), vec![Value::from(1)]);
    }

    #[test]
    fn test_same_value() {
        let nan = Value::Number(f64::NAN);
        assert!(nan.same_value(&nan));
        assert!(!nan.strict_equals(&nan));

        let a = Value::array([Value::from(1)]);
        let b = Value::array([Value::from(1)]);
        assert!(a.same_value(&a.clone()));
        assert!(!a.same_value(&b));
        assert_eq!(a, b);
    }

    #[test]
    fn test_loose_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(Value::from("1").loose_equals(&Value::from(1)));
        assert!(Value::from(true).loose_equals(&Value::from(1)));
        assert!(!Value::Null.loose_equals(&Value::from(0)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from(3.0).to_string(), "3");
        assert_eq!(Value::from(0.5).to_string(), "0.5");
        assert_eq!(Value::Number(-0.0).to_string(), "0");
        assert_eq!(Value::array([Value::from(1), Value::Null, Value::from("x")]).to_string(), "1,,x");
    }

    #[test]
    fn test_to_number() {
        assert_eq!(Value::from(" 42 ").to_number(), 42.0);
        assert_eq!(Value::from("").to_number(), 0.0);
        assert!(Value::from("abc").to_number().is_nan());
        assert!(Value::from("inf").to_number().is_nan());
        assert_eq!(Value::from("1e3").to_number(), 1000.0);
    }

    #[test]
    fn test_identity_key() {
        let object = Value::object([("a", Value::from(1))]);
        assert_eq!(object.identity_key(), object.clone().identity_key());
        assert_ne!(object.identity_key(), Value::object([("a", Value::from(1))]).identity_key());
        assert_eq!(Value::Number(-0.0).identity_key(), Value::Number(0.0).identity_key());
    }

    #[test]
    fn test_object_keeps_insertion_order() {
        let object = Object::new();
        object.set("b", Value::from(1));
        object.set("a", Value::from(2));
        object.remove("b");
        object.set("c", Value::from(3));
        let keys: Vec<String> = object.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }
}
