//! Built-in Members
//!
//! Methods available on arrays, strings and numbers. Each lookup returns a
//! native function bound to its receiver.

use crate::evaluator::EvalError;
use crate::value::{number_to_string, Array, Function, Value};
use std::rc::Rc;

/// Built-in property of a non-object value, `None` when there is none
pub fn member(receiver: &Value, key: &str) -> Option<Value> {
    match receiver {
        Value::Array(array) => array_member(array, key),
        Value::String(s) => string_member(s, key),
        Value::Number(n) => number_member(*n, key),
        Value::Function(f) if key == "name" => Some(Value::from(f.name())),
        _ => None,
    }
}

fn array_member(array: &Array, key: &str) -> Option<Value> {
    if key == "length" {
        return Some(Value::from(array.len()));
    }
    let array = array.clone();
    let method = match key {
        "push" => Function::native("push", move |args| {
            for arg in args {
                array.push(arg.clone());
            }
            Ok(Value::from(array.len()))
        }),
        "pop" => Function::native("pop", move |_| Ok(array.pop())),
        "indexOf" => Function::native("indexOf", move |args| {
            let needle = args.first().cloned().unwrap_or_default();
            let position = array.borrow().iter().position(|v| v.strict_equals(&needle));
            Ok(position.map(Value::from).unwrap_or(Value::Number(-1.0)))
        }),
        "includes" => Function::native("includes", move |args| {
            let needle = args.first().cloned().unwrap_or_default();
            Ok(Value::Bool(array.borrow().iter().any(|v| v.same_value(&needle))))
        }),
        "join" => Function::native("join", move |args| {
            let separator = match args.first() {
                None | Some(Value::Undefined) => ",".to_owned(),
                Some(other) => other.to_string(),
            };
            let parts: Vec<String> = array
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_string() })
                .collect();
            Ok(Value::from(parts.join(&separator)))
        }),
        "slice" => Function::native("slice", move |args| {
            let elements = array.borrow();
            let (start, end) = slice_bounds(args, elements.len());
            Ok(Value::array(elements[start..end.max(start)].iter().cloned()))
        }),
        _ => return None,
    };
    Some(Value::Function(method))
}

fn string_member(s: &Rc<str>, key: &str) -> Option<Value> {
    if key == "length" {
        return Some(Value::from(s.chars().count()));
    }
    if let Ok(index) = key.parse::<usize>() {
        return Some(s.chars().nth(index).map(|c| Value::from(c.to_string())).unwrap_or_default());
    }

    let s = s.clone();
    let method = match key {
        "toUpperCase" => Function::native("toUpperCase", move |_| Ok(Value::from(s.to_uppercase()))),
        "toLowerCase" => Function::native("toLowerCase", move |_| Ok(Value::from(s.to_lowercase()))),
        "trim" => Function::native("trim", move |_| Ok(Value::from(s.trim()))),
        "indexOf" => Function::native("indexOf", move |args| {
            let needle = args.first().map(Value::to_string).unwrap_or_else(|| "undefined".to_owned());
            let position = s.find(&needle).map(|byte| s[..byte].chars().count());
            Ok(position.map(Value::from).unwrap_or(Value::Number(-1.0)))
        }),
        "includes" => Function::native("includes", move |args| {
            let needle = args.first().map(Value::to_string).unwrap_or_else(|| "undefined".to_owned());
            Ok(Value::Bool(s.contains(&needle)))
        }),
        "split" => Function::native("split", move |args| {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::String(s.clone())],
                Some(separator) => {
                    let separator = separator.to_string();
                    if separator.is_empty() {
                        s.chars().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(separator.as_str()).map(Value::from).collect()
                    }
                }
            };
            Ok(Value::from(parts))
        }),
        _ => return None,
    };
    Some(Value::Function(method))
}

fn number_member(n: f64, key: &str) -> Option<Value> {
    match key {
        "toFixed" => Some(Value::Function(Function::native("toFixed", move |args| {
            let digits = args.first().map(Value::to_number).unwrap_or(0.0);
            if !(0.0..=100.0).contains(&digits) {
                return Err(EvalError::Range(format!("toFixed() digits out of range: {digits}")));
            }
            Ok(Value::from(format!("{:.*}", digits as usize, n)))
        }))),
        "toString" => Some(Value::Function(Function::native("toString", move |_| {
            Ok(Value::from(number_to_string(n)))
        }))),
        _ => None,
    }
}

/// `slice(start, end)` arguments clamped to `0..=len`
fn slice_bounds(args: &[Value], len: usize) -> (usize, usize) {
    let resolve = |arg: Option<&Value>, default: usize| -> usize {
        match arg {
            None | Some(Value::Undefined) => default,
            Some(value) => {
                let n = value.to_number();
                if n.is_nan() {
                    0
                } else if n < 0.0 {
                    (len as f64 + n.trunc()).max(0.0) as usize
                } else {
                    (n.trunc() as usize).min(len)
                }
            }
        }
    };
    (resolve(args.first(), 0), resolve(args.get(1), len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FunctionKind;

    fn call(receiver: &Value, key: &str, args: &[Value]) -> Value {
        let Some(Value::Function(f)) = member(receiver, key) else {
            panic!("{key} is not a method");
        };
        match f.kind() {
            FunctionKind::Native { call, .. } => call(args).unwrap(),
            FunctionKind::Closure(_) => panic!("expected a native method"),
        }
    }

    #[test]
    fn test_array_methods_share_receiver() {
        let array = Value::array([Value::from(1), Value::from(2)]);
        assert_eq!(call(&array, "push", &[Value::from(3)]), Value::from(3));
        assert_eq!(member(&array, "length"), Some(Value::from(3)));
        assert_eq!(call(&array, "join", &[Value::from("-")]), Value::from("1-2-3"));
        assert_eq!(call(&array, "indexOf", &[Value::from(2)]), Value::from(1));
        assert_eq!(call(&array, "slice", &[Value::from(-2)]), Value::array([Value::from(2), Value::from(3)]));
        assert_eq!(call(&array, "pop", &[]), Value::from(3));
    }

    #[test]
    fn test_string_methods() {
        let s = Value::from("  Hello ");
        assert_eq!(call(&s, "trim", &[]), Value::from("Hello"));
        assert_eq!(call(&s, "toUpperCase", &[]), Value::from("  HELLO "));
        assert_eq!(call(&Value::from("a,b"), "split", &[Value::from(",")]), Value::array([Value::from("a"), Value::from("b")]));
        assert_eq!(call(&Value::from("abc"), "indexOf", &[Value::from("c")]), Value::from(2));
        assert_eq!(member(&Value::from("abc"), "1"), Some(Value::from("b")));
    }

    #[test]
    fn test_to_fixed() {
        assert_eq!(call(&Value::from(1.005), "toFixed", &[Value::from(1)]), Value::from("1.0"));
    }

    #[test]
    fn test_unknown_member() {
        assert!(member(&Value::array([]), "map").is_none());
        assert!(member(&Value::Null, "x").is_none());
    }
}
