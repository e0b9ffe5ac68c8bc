//! Loom Expressions
//!
//! Compiles the small expressions embedded in templates and runs them in a
//! sandbox.
//!
//! # Pipeline
//! - [`Tokenizer`]: ordered regex rules, never fails
//! - [`compile`]: rewrites the token stream (filters, auto-`return`, `#`
//!   exports, root rewriting) and extracts [`Dependency`] paths
//! - [`parse_program`]: rewritten code to an arena AST
//! - [`evaluate_program`]: interprets the AST against an explicit variable map
//!
//! # Example
//! ```rust,ignore
//! use loom_expr::{compile, evaluate_program, CompileOptions, EvalOptions, Value, Variables};
//!
//! let compiled = compile("price * qty", &CompileOptions::default())?;
//! let mut variables = Variables::new();
//! variables.insert("price".into(), Value::from(3));
//! variables.insert("qty".into(), Value::from(2));
//! let outcome = evaluate_program(compiled.program(), &variables, &EvalOptions::default())?;
//! assert_eq!(outcome.result, Value::from(6));
//! ```

pub mod ast;
pub mod builtins;
mod compiler;
mod cursor;
mod evaluator;
mod parser;
mod token;
mod tokenizer;
mod value;

pub use ast::{Ast, NodeId, Program};
pub use compiler::{
    compile, CompileError, CompileOptions, CompiledExpression, Dependency, FilterArgument, FilterCall, PathKind,
    PathSegment, RootRewrite, DEFAULT_FILTER_TEMPLATE, FILTERS_VARIABLE,
};
pub use cursor::TokenCursor;
pub use evaluator::{
    evaluate, evaluate_program, get_member, set_member, Closure, EvalError, EvalOptions, EvalOutcome, Variables,
};
pub use parser::{parse_number_literal, parse_program, parse_string_literal, ParseError, Parser, MAX_NESTING_DEPTH};
pub use token::{is_keyword, Span, Token, TokenKind, TokenType, KEYWORDS};
pub use tokenizer::{expression_tokenizer, tokenize, TokenizeError, Tokenizer};
pub use value::{number_to_string, Array, Function, FunctionKind, IdentityKey, NativeFn, Object, Value, MAX_ARRAY_LENGTH};

// Re-exported so hosts can build root-rewrite exclusions without a direct dependency
pub use regex::Regex;
