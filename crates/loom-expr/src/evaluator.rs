//! Sandboxed Evaluator
//!
//! Tree-walking interpreter over a parsed [`Program`]. The only names a
//! program can see are the variables handed to [`evaluate_program`]; there is
//! no global object, so touching anything else is a reference error.

use crate::ast::{
    AstNodeKind, BinaryOp, LiteralValue, LogicalOp, MemberProperty, NodeId, Program, UnaryOp, UpdateOp,
};
use crate::builtins;
use crate::parser::{parse_program, ParseError};
use crate::value::{Function, FunctionKind, Object, Value, MAX_ARRAY_LENGTH};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Variables visible to a program, by name
pub type Variables = IndexMap<String, Value>;

/// Evaluation error
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("RangeError: {0}")]
    Range(String),

    #[error("SyntaxError: {0}")]
    Syntax(#[from] ParseError),

    #[error("Maximum call depth of {0} exceeded")]
    CallDepthExceeded(usize),
}

/// Evaluation options
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Names declared as `undefined` when no variable provides them
    pub auto_instantiate: Vec<String>,
    /// Names whose final value is reported back in [`EvalOutcome::exports`]
    pub auto_export: Vec<String>,
    pub max_call_depth: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self { auto_instantiate: Vec::new(), auto_export: Vec::new(), max_call_depth: 256 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvalOutcome {
    pub result: Value,
    /// Auto-exported names that hold a value after the run
    pub exports: IndexMap<String, Value>,
}

/// Parse and run code
pub fn evaluate(code: &str, variables: &Variables, options: &EvalOptions) -> Result<EvalOutcome, EvalError> {
    let program = parse_program(code)?;
    evaluate_program(&program, variables, options)
}

/// Run a parsed program against `variables`
pub fn evaluate_program(
    program: &Program,
    variables: &Variables,
    options: &EvalOptions,
) -> Result<EvalOutcome, EvalError> {
    tracing::trace!("Evaluating program with {} variables", variables.len());

    let globals = Env::root();
    for (name, value) in variables {
        globals.declare(name, value.clone());
    }
    for name in &options.auto_instantiate {
        if !globals.has_own(name) {
            globals.declare(name, Value::Undefined);
        }
    }

    let env = Env::child(&globals);
    for name in program.hoisted() {
        env.declare(name, Value::Undefined);
    }

    let mut interpreter = Interpreter { depth: 0, max_depth: options.max_call_depth };
    let mut completion = Value::Undefined;
    for statement in program.body() {
        match interpreter.statement(program, *statement, &env)? {
            Completion::Return(value) => {
                completion = value;
                break;
            }
            Completion::Normal(Some(value)) => completion = value,
            Completion::Normal(None) => {}
        }
    }

    let exports = options
        .auto_export
        .iter()
        .filter_map(|name| env.lookup(name).filter(|value| !value.is_undefined()).map(|value| (name.clone(), value)))
        .collect();

    Ok(EvalOutcome { result: completion, exports })
}

/// Lexical environment frame
#[derive(Clone)]
pub(crate) struct Env(Rc<RefCell<Frame>>);

struct Frame {
    vars: HashMap<Box<str>, Value>,
    parent: Option<Env>,
}

impl Env {
    fn root() -> Self {
        Self(Rc::new(RefCell::new(Frame { vars: HashMap::new(), parent: None })))
    }

    fn child(parent: &Env) -> Self {
        Self(Rc::new(RefCell::new(Frame { vars: HashMap::new(), parent: Some(parent.clone()) })))
    }

    fn declare(&self, name: &str, value: Value) {
        self.0.borrow_mut().vars.insert(name.into(), value);
    }

    fn has_own(&self, name: &str) -> bool {
        self.0.borrow().vars.contains_key(name)
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        let frame = self.0.borrow();
        match frame.vars.get(name) {
            Some(value) => Some(value.clone()),
            None => frame.parent.as_ref().and_then(|parent| parent.lookup(name)),
        }
    }

    /// Store into the nearest frame declaring `name`
    fn assign(&self, name: &str, value: Value) -> Result<(), EvalError> {
        let mut frame = self.0.borrow_mut();
        if let Some(slot) = frame.vars.get_mut(name) {
            *slot = value;
            return Ok(());
        }
        match &frame.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(EvalError::Reference(name.to_owned())),
        }
    }
}

/// A function expression together with the environment it closes over
pub struct Closure {
    name: Option<Rc<str>>,
    program: Program,
    node: NodeId,
    env: Env,
}

impl Closure {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}

enum Completion {
    Normal(Option<Value>),
    Return(Value),
}

struct Interpreter {
    depth: usize,
    max_depth: usize,
}

impl Interpreter {
    fn statement(&mut self, program: &Program, id: NodeId, env: &Env) -> Result<Completion, EvalError> {
        let ast = program.ast();
        match &ast[id].kind {
            AstNodeKind::ExpressionStatement { expr } => {
                Ok(Completion::Normal(Some(self.expression(program, *expr, env)?)))
            }
            AstNodeKind::EmptyStatement => Ok(Completion::Normal(None)),
            AstNodeKind::ReturnStatement { argument } => {
                let value = match argument {
                    Some(argument) => self.expression(program, *argument, env)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            AstNodeKind::BlockStatement { body } => {
                let mut last = None;
                for statement in body {
                    match self.statement(program, *statement, env)? {
                        Completion::Normal(Some(value)) => last = Some(value),
                        Completion::Normal(None) => {}
                        ret @ Completion::Return(_) => return Ok(ret),
                    }
                }
                Ok(Completion::Normal(last))
            }
            AstNodeKind::IfStatement { test, consequent, alternate } => {
                if self.expression(program, *test, env)?.is_truthy() {
                    self.statement(program, *consequent, env)
                } else if let Some(alternate) = alternate {
                    self.statement(program, *alternate, env)
                } else {
                    Ok(Completion::Normal(None))
                }
            }
            AstNodeKind::VariableDeclaration { declarations } => {
                for declarator in declarations {
                    if let AstNodeKind::VariableDeclarator { name, init: Some(init) } = &ast[*declarator].kind {
                        let value = self.expression(program, *init, env)?;
                        env.assign(name, value)?;
                    }
                }
                Ok(Completion::Normal(None))
            }
            _ => Ok(Completion::Normal(Some(self.expression(program, id, env)?))),
        }
    }

    fn expression(&mut self, program: &Program, id: NodeId, env: &Env) -> Result<Value, EvalError> {
        let ast = program.ast();
        match &ast[id].kind {
            AstNodeKind::Literal { value } => Ok(match value {
                LiteralValue::Undefined => Value::Undefined,
                LiteralValue::Null => Value::Null,
                LiteralValue::Bool(b) => Value::Bool(*b),
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::String(s) => Value::String(s.clone()),
            }),
            AstNodeKind::Identifier { name } => env.lookup(name).ok_or_else(|| EvalError::Reference(name.to_string())),
            AstNodeKind::ArrayExpression { elements } => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.expression(program, *element, env)?);
                }
                Ok(Value::from(values))
            }
            AstNodeKind::ObjectExpression { properties } => {
                let object = Object::new();
                for property in properties {
                    if let AstNodeKind::Property { key, value } = &ast[*property].kind {
                        object.set(&**key, self.expression(program, *value, env)?);
                    }
                }
                Ok(Value::Object(object))
            }
            AstNodeKind::FunctionExpression { name, .. } => Ok(Value::Function(Function::closure(Closure {
                name: name.as_deref().map(Rc::from),
                program: program.clone(),
                node: id,
                env: env.clone(),
            }))),
            AstNodeKind::UnaryExpression { operator, argument } => self.unary(program, *operator, *argument, env),
            AstNodeKind::UpdateExpression { operator, argument, prefix } => {
                let old = self.expression(program, *argument, env)?.to_number();
                let new = match operator {
                    UpdateOp::Increment => old + 1.0,
                    UpdateOp::Decrement => old - 1.0,
                };
                self.store(program, *argument, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            AstNodeKind::BinaryExpression { operator, left, right } => {
                let left = self.expression(program, *left, env)?;
                let right = self.expression(program, *right, env)?;
                binary(*operator, &left, &right)
            }
            AstNodeKind::LogicalExpression { operator, left, right } => {
                let left_value = self.expression(program, *left, env)?;
                let short_circuit = match operator {
                    LogicalOp::And => !left_value.is_truthy(),
                    LogicalOp::Or => left_value.is_truthy(),
                    LogicalOp::NullishCoalescing => !left_value.is_nullish(),
                };
                if short_circuit { Ok(left_value) } else { self.expression(program, *right, env) }
            }
            AstNodeKind::AssignmentExpression { operator, target, value } => {
                let value = match operator.binary() {
                    None => self.expression(program, *value, env)?,
                    Some(op) => {
                        let current = self.expression(program, *target, env)?;
                        let operand = self.expression(program, *value, env)?;
                        binary(op, &current, &operand)?
                    }
                };
                self.store(program, *target, value.clone(), env)?;
                Ok(value)
            }
            AstNodeKind::ConditionalExpression { test, consequent, alternate } => {
                if self.expression(program, *test, env)?.is_truthy() {
                    self.expression(program, *consequent, env)
                } else {
                    self.expression(program, *alternate, env)
                }
            }
            AstNodeKind::MemberExpression { object, property } => {
                let object = self.expression(program, *object, env)?;
                let key = self.property_key(program, property, env)?;
                get_member(&object, &key)
            }
            AstNodeKind::CallExpression { callee, arguments } => {
                let function = self.expression(program, *callee, env)?;
                let mut args = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    args.push(self.expression(program, *argument, env)?);
                }
                match function {
                    Value::Function(function) => self.call(&function, &args),
                    other => Err(EvalError::Type(format!(
                        "{} is not a function (got {})",
                        describe(program, *callee),
                        other.type_of()
                    ))),
                }
            }
            other => Err(EvalError::Type(format!("Cannot evaluate {other:?} as an expression"))),
        }
    }

    fn property_key(&mut self, program: &Program, property: &MemberProperty, env: &Env) -> Result<Rc<str>, EvalError> {
        match property {
            MemberProperty::Static(name) => Ok(Rc::from(&**name)),
            MemberProperty::Computed(expr) => Ok(self.expression(program, *expr, env)?.to_property_key()),
        }
    }

    fn unary(&mut self, program: &Program, operator: UnaryOp, argument: NodeId, env: &Env) -> Result<Value, EvalError> {
        if operator == UnaryOp::Typeof {
            if let AstNodeKind::Identifier { name } = &program.ast()[argument].kind {
                return Ok(Value::from(env.lookup(name).map(|value| value.type_of()).unwrap_or("undefined")));
            }
        }
        let value = self.expression(program, argument, env)?;
        Ok(match operator {
            UnaryOp::Not => Value::Bool(!value.is_truthy()),
            UnaryOp::Minus => Value::Number(-value.to_number()),
            UnaryOp::Plus => Value::Number(value.to_number()),
            UnaryOp::Typeof => Value::from(value.type_of()),
            UnaryOp::Void => Value::Undefined,
        })
    }

    /// Assign to an identifier or member target
    fn store(&mut self, program: &Program, target: NodeId, value: Value, env: &Env) -> Result<(), EvalError> {
        match &program.ast()[target].kind {
            AstNodeKind::Identifier { name } => env.assign(name, value),
            AstNodeKind::MemberExpression { object, property } => {
                let object = self.expression(program, *object, env)?;
                let key = self.property_key(program, property, env)?;
                set_member(&object, &key, value)
            }
            _ => Err(EvalError::Type("Invalid assignment target".to_owned())),
        }
    }

    fn call(&mut self, function: &Function, args: &[Value]) -> Result<Value, EvalError> {
        if self.depth >= self.max_depth {
            return Err(EvalError::CallDepthExceeded(self.max_depth));
        }
        self.depth += 1;
        let result = match function.kind() {
            FunctionKind::Native { call, .. } => call(args),
            FunctionKind::Closure(closure) => self.call_closure(function, closure, args),
        };
        self.depth -= 1;
        result
    }

    fn call_closure(&mut self, function: &Function, closure: &Closure, args: &[Value]) -> Result<Value, EvalError> {
        let program = &closure.program;
        let AstNodeKind::FunctionExpression { name, params, body, locals } = &program.ast()[closure.node].kind else {
            return Err(EvalError::Type("Closure does not point at a function".to_owned()));
        };

        let env = Env::child(&closure.env);
        if let Some(name) = name {
            env.declare(name, Value::Function(function.clone()));
        }
        for local in locals {
            env.declare(local, Value::Undefined);
        }
        for (index, param) in params.iter().enumerate() {
            env.declare(param, args.get(index).cloned().unwrap_or_default());
        }

        match self.statement(program, *body, &env)? {
            Completion::Return(value) => Ok(value),
            Completion::Normal(_) => Ok(Value::Undefined),
        }
    }
}

/// Read `object[key]`
pub fn get_member(object: &Value, key: &str) -> Result<Value, EvalError> {
    match object {
        Value::Undefined | Value::Null => Err(EvalError::Type(format!(
            "Cannot read properties of {object} (reading '{key}')"
        ))),
        Value::Object(o) => Ok(o.get(key).unwrap_or_default()),
        Value::Array(a) => match key.parse::<usize>() {
            Ok(index) => Ok(a.get(index)),
            Err(_) => Ok(builtins::member(object, key).unwrap_or_default()),
        },
        _ => Ok(builtins::member(object, key).unwrap_or_default()),
    }
}

/// Write `object[key] = value`
pub fn set_member(object: &Value, key: &str, value: Value) -> Result<(), EvalError> {
    match object {
        Value::Object(o) => {
            o.set(key, value);
            Ok(())
        }
        Value::Array(a) => {
            if let Ok(index) = key.parse::<usize>() {
                a.set(index, value)
            } else if key == "length" {
                let len = value.to_number();
                if !(0.0..=MAX_ARRAY_LENGTH as f64).contains(&len) || len.fract() != 0.0 {
                    return Err(EvalError::Range("Invalid array length".to_owned()));
                }
                a.set_len(len as usize)
            } else {
                Err(EvalError::Type(format!("Cannot set property '{key}' of an array")))
            }
        }
        other => Err(EvalError::Type(format!("Cannot set properties of {other} (setting '{key}')"))),
    }
}

fn binary(operator: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let number = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
    Ok(match operator {
        BinaryOp::Add => {
            let concatenates = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_) | Value::Function(_));
            if concatenates(left) || concatenates(right) {
                Value::from(format!("{left}{right}"))
            } else {
                number(|a, b| a + b)
            }
        }
        BinaryOp::Sub => number(|a, b| a - b),
        BinaryOp::Mul => number(|a, b| a * b),
        BinaryOp::Div => number(|a, b| a / b),
        BinaryOp::Mod => number(|a, b| a % b),
        BinaryOp::LessThan => compare(left, right, |o| o.is_lt()),
        BinaryOp::LessThanEq => compare(left, right, |o| o.is_le()),
        BinaryOp::GreaterThan => compare(left, right, |o| o.is_gt()),
        BinaryOp::GreaterThanEq => compare(left, right, |o| o.is_ge()),
        BinaryOp::Equal => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEqual => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEqual => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEqual => Value::Bool(!left.strict_equals(right)),
        BinaryOp::In => {
            let key = left.to_property_key();
            match right {
                Value::Object(o) => Value::Bool(o.contains_key(&key)),
                Value::Array(a) => Value::Bool(
                    &*key == "length" || key.parse::<usize>().is_ok_and(|index| index < a.len()),
                ),
                other => {
                    return Err(EvalError::Type(format!("Cannot use 'in' to search for '{key}' in {other}")));
                }
            }
        }
    })
}

fn compare(left: &Value, right: &Value, accept: fn(std::cmp::Ordering) -> bool) -> Value {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    };
    Value::Bool(ordering.is_some_and(accept))
}

/// Source-like description of a callee, for error messages
fn describe(program: &Program, id: NodeId) -> String {
    match &program.ast()[id].kind {
        AstNodeKind::Identifier { name } => name.to_string(),
        AstNodeKind::MemberExpression { object, property: MemberProperty::Static(name) } => {
            format!("{}.{}", describe(program, *object), name)
        }
        AstNodeKind::MemberExpression { object, property: MemberProperty::Computed(_) } => {
            format!("{}[...]", describe(program, *object))
        }
        AstNodeKind::CallExpression { callee, .. } => format!("{}(...)", describe(program, *callee)),
        _ => "expression".to_owned(),
    }
}
