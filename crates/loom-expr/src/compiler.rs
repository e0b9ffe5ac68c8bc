//! Expression Compiler
//!
//! Rewrites a binding expression into code the sandboxed evaluator runs, and
//! extracts its dependencies on the way.
//!
//! The source is walked token by token. Identifier runs (`a.b[c](d)`) become
//! dependencies, grouping tokens recurse into their inner span, `;` splits
//! statements and `|` splices in filter invocations. Statement starts are
//! tagged with a marker so that, once the whole expression is known, the last
//! statement can be turned into a `return`.

use crate::ast::Program;
use crate::cursor::TokenCursor;
use crate::parser::{parse_number_literal, parse_program, parse_string_literal, ParseError, MAX_NESTING_DEPTH};
use crate::token::{is_keyword, Token, TokenKind};
use crate::tokenizer::tokenize;
use crate::value::Value;
use regex::Regex;
use std::rc::Rc;

/// Filter invocation used when none is configured explicitly
pub const DEFAULT_FILTER_TEMPLATE: &str = "$filters.%name(%value%args)";

/// Variable the default filter template calls filters through
pub const FILTERS_VARIABLE: &str = "$filters";

const RETURN_MARKER: &str = "\u{1}return\u{1}";
const DEPENDENCY_MARKER: char = '\u{2}';
const LOCAL_PREFIX: &str = "__dep";

const ASSIGNMENT_OPERATORS: &[&str] = &["=", "+=", "-=", "*=", "/=", "%=", "++", "--"];

/// Compile error
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Unclosed '{bracket}' in expression '{expression}'")]
    Unbalanced { bracket: char, expression: String },

    #[error("Unexpected '{bracket}' in expression '{expression}'")]
    UnexpectedClose { bracket: char, expression: String },

    #[error("Missing filter name after '|' in expression '{expression}'")]
    MissingFilterName { expression: String },

    #[error("Nothing to filter before '|' in expression '{expression}'")]
    EmptyFilterInput { expression: String },

    #[error("Malformed argument for filter '{filter}' in expression '{expression}': {reason}")]
    MalformedFilterArgument { filter: String, expression: String, reason: String },

    #[error("'#' must directly precede a variable name in expression '{expression}'")]
    MisplacedExportSigil { expression: String },

    #[error("Expression '{expression}' nests deeper than {limit} levels")]
    TooDeep { limit: usize, expression: String },

    #[error("Invalid expression '{expression}': {error}")]
    Syntax {
        expression: String,
        #[source]
        error: ParseError,
    },
}

/// Redirects root identifiers, e.g. into a scope lookup
#[derive(Debug, Clone)]
pub struct RootRewrite {
    /// Code template; `%root` is replaced by the identifier
    pub template: String,
    /// Roots matching this pattern are left alone
    pub exclude: Option<Regex>,
}

impl RootRewrite {
    pub fn new(template: impl Into<String>) -> Self {
        Self { template: template.into(), exclude: None }
    }

    pub fn excluding(mut self, pattern: Regex) -> Self {
        self.exclude = Some(pattern);
        self
    }

    fn applies_to(&self, root: &str) -> bool {
        !self.exclude.as_ref().is_some_and(|exclude| exclude.is_match(root))
    }
}

/// Compile options
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub root_rewrite: Option<RootRewrite>,
    /// Whether `|` starts a filter
    pub allow_filters: bool,
    /// Filter invocation with `%name`, `%value` and `%args` placeholders.
    /// Filters stay disabled without one.
    pub filter_template: Option<String>,
    /// Turn the last statement into a `return`
    pub auto_return: bool,
    /// Wrap the code into an immediately invoked function
    pub auto_wrap: bool,
    /// Read every plain dependency once, into a local, before the body runs
    pub store_dependencies_locally: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            root_rewrite: None,
            allow_filters: true,
            filter_template: Some(DEFAULT_FILTER_TEMPLATE.to_owned()),
            auto_return: true,
            auto_wrap: false,
            store_dependencies_locally: false,
        }
    }
}

impl CompileOptions {
    fn filters_enabled(&self) -> bool {
        self.allow_filters && self.filter_template.is_some()
    }

    /// Options for sub-expressions compiled on their own (filter arguments,
    /// dependency paths)
    pub fn fragment(&self) -> Self {
        Self {
            allow_filters: false,
            auto_wrap: false,
            store_dependencies_locally: false,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    ArrayIndex,
    ObjectKey,
}

/// One step of a dependency's access path after the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    /// Member name, or the index expression as written
    pub value: String,
    pub kind: PathKind,
}

/// A root access path read by an expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    name: String,
    code: String,
    exportable: bool,
    is_call: bool,
    path: Vec<PathSegment>,
}

impl Dependency {
    /// Root identifier
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Access path as written, without the `#` sigil
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Marked with `#`: may be declared by the expression and flows back out
    pub fn is_exportable(&self) -> bool {
        self.exportable
    }

    /// Reading the dependency calls a function
    pub fn is_call(&self) -> bool {
        self.is_call
    }

    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub enum FilterArgument {
    Literal(Value),
    Expression(Rc<CompiledExpression>),
}

#[derive(Debug, Clone)]
pub struct FilterCall {
    pub name: String,
    pub arguments: Vec<FilterArgument>,
}

/// Result of compiling one source expression.
///
/// Carries no runtime values and can be shared between any number of
/// evaluations.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    code: String,
    dependencies: Vec<Dependency>,
    filters: Vec<FilterCall>,
    program: Program,
    multi_statement: bool,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Rewritten code, as run by the evaluator
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Dependencies in source order, deduplicated by their code
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Filters in the order they are applied
    pub fn filters(&self) -> &[FilterCall] {
        &self.filters
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn is_multi_statement(&self) -> bool {
        self.multi_statement
    }

    /// Roots of exportable dependencies
    pub fn exportable_names(&self) -> impl Iterator<Item = &str> {
        let mut seen: Vec<&str> = Vec::new();
        self.dependencies
            .iter()
            .filter(|dep| dep.exportable)
            .map(|dep| dep.name())
            .filter(move |name| {
                if seen.contains(name) {
                    false
                } else {
                    seen.push(*name);
                    true
                }
            })
    }
}

/// Compile a binding expression
pub fn compile(source: &str, options: &CompileOptions) -> Result<CompiledExpression, CompileError> {
    let tokens = tokenize(source);
    if bracket_depth(&tokens) > MAX_NESTING_DEPTH {
        return Err(CompileError::TooDeep { limit: MAX_NESTING_DEPTH, expression: source.to_owned() });
    }
    let mut compilation = Compilation::new(source, &tokens, options);

    let body = compilation.compile_span(
        0,
        tokens.len(),
        Context { top_level: true, filters: options.filters_enabled(), object_body: false },
    )?;
    let code = compilation.finalize(body);

    tracing::debug!(
        "Compiled '{}' ({} dependencies, {} filters)",
        source,
        compilation.entries.len(),
        compilation.filters.len()
    );

    let program = parse_program(&code).map_err(|error| {
        if error.is_too_deep() {
            CompileError::TooDeep { limit: MAX_NESTING_DEPTH, expression: source.to_owned() }
        } else {
            CompileError::Syntax { expression: source.to_owned(), error }
        }
    })?;

    let mut entries = compilation.entries;
    entries.sort_by_key(|entry| entry.start);

    Ok(CompiledExpression {
        source: source.to_owned(),
        code,
        dependencies: entries.into_iter().map(|entry| entry.dependency).collect(),
        filters: compilation.filters,
        program,
        multi_statement: compilation.multi_statement,
    })
}

/// Deepest bracket nesting; groups are compiled recursively
fn bracket_depth(tokens: &[Token]) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0;
    for token in tokens {
        if token.kind.is_open_bracket() {
            depth += 1;
            deepest = deepest.max(depth);
        } else if matches!(token.kind, TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace) {
            depth = depth.saturating_sub(1);
        }
    }
    deepest
}

#[derive(Debug, Clone, Copy)]
struct Context {
    top_level: bool,
    filters: bool,
    object_body: bool,
}

impl Context {
    fn nested(filters: bool, object_body: bool) -> Self {
        Self { top_level: false, filters, object_body }
    }
}

#[derive(Debug)]
struct Entry {
    dependency: Dependency,
    start: u32,
    /// Emitted code; holds markers of nested dependencies when they are
    /// stored locally
    text: String,
    assigned: bool,
}

impl Entry {
    fn is_local(&self) -> bool {
        !self.dependency.is_call && !self.dependency.exportable && !self.assigned
    }
}

struct Compilation<'t> {
    source: &'t str,
    tokens: &'t [Token],
    cursor: TokenCursor<'t>,
    options: &'t CompileOptions,
    entries: Vec<Entry>,
    filters: Vec<FilterCall>,
    declared: Vec<Box<str>>,
    multi_statement: bool,
    explicit_return: bool,
}

impl<'t> Compilation<'t> {
    fn new(source: &'t str, tokens: &'t [Token], options: &'t CompileOptions) -> Self {
        Self {
            source,
            tokens,
            cursor: TokenCursor::new(tokens),
            options,
            entries: Vec::new(),
            filters: Vec::new(),
            declared: Vec::new(),
            multi_statement: false,
            explicit_return: false,
        }
    }

    fn expression(&self) -> String {
        self.source.to_owned()
    }

    fn next_significant(&self, from: usize, end: usize) -> Option<usize> {
        self.cursor
            .find_from(from, Token::is_trivia)
            .map(|(index, _)| index)
            .filter(|index| *index < end)
    }

    fn source_between(&self, from: usize, to: usize) -> &'t str {
        let tokens = self.cursor.slice(from, to);
        match (tokens.first(), tokens.last()) {
            (Some(first), Some(last)) => &self.source[first.span.start as usize..last.span.end as usize],
            _ => "",
        }
    }

    fn matching_close(&self, open: usize, end: usize) -> Result<usize, CompileError> {
        let token = &self.tokens[open];
        let unbalanced = || CompileError::Unbalanced {
            bracket: token.value.chars().next().unwrap_or('('),
            expression: self.expression(),
        };
        let close = token.kind.closing().ok_or_else(unbalanced)?;
        self.cursor
            .find_matching(open, close)
            .filter(|index| *index < end)
            .ok_or_else(unbalanced)
    }

    /// Compile tokens `start..end` into code
    fn compile_span(&mut self, start: usize, end: usize, ctx: Context) -> Result<String, CompileError> {
        let tokens = self.tokens;
        let mut out = String::new();
        let mut statement_start = 0;
        let mut at_statement_start = true;
        let mut in_var = false;
        let mut previous: Option<usize> = None;
        let mut i = start;

        while i < end {
            let token = &tokens[i];
            if token.is_trivia() {
                out.push_str(&token.value);
                i += 1;
                continue;
            }

            if at_statement_start {
                if ctx.top_level {
                    out.push_str(RETURN_MARKER);
                }
                statement_start = out.len();
                at_statement_start = false;
            }

            let prev = previous.map(|index| &tokens[index]);
            let mut last = i;

            match token.kind {
                TokenKind::Semicolon => {
                    out.push(';');
                    in_var = false;
                    at_statement_start = true;
                    if ctx.top_level && self.next_significant(i + 1, end).is_some() {
                        self.multi_statement = true;
                    }
                    i += 1;
                }
                TokenKind::Comma => {
                    out.push(',');
                    if !ctx.top_level {
                        at_statement_start = true;
                    }
                    i += 1;
                }
                TokenKind::Hash => {
                    let target = tokens.get(i + 1).filter(|next| i + 1 < end && next.is(TokenKind::Identifier));
                    let after_dot = prev.is_some_and(|p| p.is(TokenKind::Dot));
                    match target {
                        Some(name) if !after_dot && !is_keyword(&name.value) => {
                            let (text, next) = self.compile_identifier_run(i + 1, end, true, false, prev)?;
                            out.push_str(&text);
                            last = next - 1;
                            i = next;
                        }
                        _ => return Err(CompileError::MisplacedExportSigil { expression: self.expression() }),
                    }
                }
                TokenKind::Identifier => {
                    let next_sig = self.next_significant(i + 1, end).map(|index| &tokens[index]);
                    let after_dot = prev.is_some_and(|p| p.is(TokenKind::Dot));
                    let key_position = ctx.object_body && prev.is_none_or(|p| p.is(TokenKind::Comma));

                    if after_dot {
                        out.push_str(&token.value);
                        i += 1;
                    } else if token.is_word("function") {
                        let close = self.function_literal_end(i, end)?;
                        out.push_str(self.source_between(i, close + 1));
                        last = close;
                        i = close + 1;
                    } else if is_keyword(&token.value) {
                        if token.is_word("var") {
                            in_var = true;
                        } else if token.is_word("return") && ctx.top_level {
                            self.explicit_return = true;
                        }
                        out.push_str(&token.value);
                        i += 1;
                    } else if key_position && next_sig.is_some_and(|n| n.is(TokenKind::Colon)) {
                        out.push_str(&token.value);
                        i += 1;
                    } else if in_var && prev.is_some_and(|p| p.is_word("var") || p.is(TokenKind::Comma)) {
                        if !self.declared.iter().any(|name| **name == *token.value) {
                            self.declared.push(token.value.clone());
                        }
                        out.push_str(&token.value);
                        i += 1;
                    } else {
                        let shorthand = key_position
                            && next_sig.is_none_or(|n| n.is(TokenKind::Comma) || n.is(TokenKind::RBrace));
                        let (text, next) = self.compile_identifier_run(i, end, false, shorthand, prev)?;
                        out.push_str(&text);
                        last = next - 1;
                        i = next;
                    }
                }
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                    let close = self.matching_close(i, end)?;
                    let block = prev.is_some_and(|p| p.is(TokenKind::RParen) || p.is_word("else"));
                    let inner_ctx = match token.kind {
                        TokenKind::LParen => Context::nested(self.options.filters_enabled(), false),
                        TokenKind::LBrace => Context::nested(false, !block),
                        _ => Context::nested(false, false),
                    };
                    let inner = self.compile_span(i + 1, close, inner_ctx)?;
                    out.push_str(&token.value);
                    out.push_str(&inner);
                    out.push_str(&tokens[close].value);
                    last = close;
                    i = close + 1;
                }
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    return Err(CompileError::UnexpectedClose {
                        bracket: token.value.chars().next().unwrap_or(')'),
                        expression: self.expression(),
                    });
                }
                TokenKind::Pipe if ctx.filters => {
                    let next = self.compile_filter(&mut out, statement_start, i, end, ctx)?;
                    last = next - 1;
                    i = next;
                }
                _ => {
                    out.push_str(&token.value);
                    i += 1;
                }
            }

            previous = Some(last);
        }

        Ok(out)
    }

    /// Index of the `}` closing a function literal starting at `start`
    fn function_literal_end(&self, start: usize, end: usize) -> Result<usize, CompileError> {
        let open_paren = (start + 1..end)
            .find(|index| self.tokens[*index].is(TokenKind::LParen))
            .ok_or_else(|| CompileError::Unbalanced { bracket: '(', expression: self.expression() })?;
        let close_paren = self.matching_close(open_paren, end)?;
        let open_brace = self
            .next_significant(close_paren + 1, end)
            .filter(|index| self.tokens[*index].is(TokenKind::LBrace))
            .ok_or_else(|| CompileError::Unbalanced { bracket: '{', expression: self.expression() })?;
        self.matching_close(open_brace, end)
    }

    /// Compile `name (.name | [..] | (..))*` starting at `start`.
    ///
    /// Returns the emitted code and the index after the run.
    fn compile_identifier_run(
        &mut self,
        start: usize,
        end: usize,
        exportable: bool,
        shorthand: bool,
        prev: Option<&Token>,
    ) -> Result<(String, usize), CompileError> {
        let tokens = self.tokens;
        let root = &*tokens[start].value;
        let local = self.declared.iter().any(|name| &**name == root);

        let mut text = match &self.options.root_rewrite {
            Some(rewrite) if !local && !exportable && rewrite.applies_to(root) => {
                fill_template(&rewrite.template, &[("%root", root)])
            }
            _ => root.to_owned(),
        };
        if shorthand && text != root {
            text = format!("{root}: {text}");
        }

        let mut path = Vec::new();
        let mut is_call = false;
        let mut j = start + 1;

        while j < end {
            let token = &tokens[j];
            match token.kind {
                TokenKind::Dot if tokens.get(j + 1).is_some_and(|t| j + 1 < end && t.is(TokenKind::Identifier)) => {
                    let member = &tokens[j + 1].value;
                    text.push('.');
                    text.push_str(member);
                    path.push(PathSegment { value: member.to_string(), kind: PathKind::ObjectKey });
                    j += 2;
                }
                TokenKind::LBracket => {
                    let close = self.matching_close(j, end)?;
                    let inner = self.compile_span(j + 1, close, Context::nested(false, false))?;
                    text.push('[');
                    text.push_str(&inner);
                    text.push(']');
                    path.push(PathSegment {
                        value: self.source_between(j + 1, close).trim().to_owned(),
                        kind: PathKind::ArrayIndex,
                    });
                    j = close + 1;
                }
                TokenKind::LParen => {
                    let close = self.matching_close(j, end)?;
                    let inner = self.compile_span(j + 1, close, Context::nested(self.options.filters_enabled(), false))?;
                    text.push('(');
                    text.push_str(&inner);
                    text.push(')');
                    is_call = true;
                    j = close + 1;
                }
                _ => break,
            }
        }

        if local {
            return Ok((text, j));
        }

        let assigned = prev.is_some_and(|p| p.is_operator("++") || p.is_operator("--"))
            || self
                .next_significant(j, end)
                .is_some_and(|index| ASSIGNMENT_OPERATORS.iter().any(|op| tokens[index].is_operator(op)));
        let code = self.source_between(start, j);
        let id = self.register(Entry {
            dependency: Dependency {
                name: root.to_owned(),
                code: code.to_owned(),
                exportable,
                is_call,
                path,
            },
            start: tokens[start].span.start,
            text: text.clone(),
            assigned,
        });

        if self.options.store_dependencies_locally {
            Ok((format!("{DEPENDENCY_MARKER}{id}{DEPENDENCY_MARKER}"), j))
        } else {
            Ok((text, j))
        }
    }

    fn register(&mut self, entry: Entry) -> usize {
        if let Some(id) = self.entries.iter().position(|e| e.dependency.code == entry.dependency.code) {
            let existing = &mut self.entries[id];
            existing.assigned |= entry.assigned;
            existing.dependency.exportable |= entry.dependency.exportable;
            return id;
        }
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Compile `| name(:arg)*` at `pipe`, replacing the statement so far
    fn compile_filter(
        &mut self,
        out: &mut String,
        statement_start: usize,
        pipe: usize,
        end: usize,
        ctx: Context,
    ) -> Result<usize, CompileError> {
        let tokens = self.tokens;
        let statement = &out[statement_start..];
        let value = statement.trim().to_owned();
        if value.is_empty() {
            return Err(CompileError::EmptyFilterInput { expression: self.expression() });
        }
        let leading = statement.len() - statement.trim_start().len();

        let name_index = self
            .next_significant(pipe + 1, end)
            .filter(|index| {
                let token = &tokens[*index];
                token.is(TokenKind::Identifier) && !is_keyword(&token.value)
            })
            .ok_or_else(|| CompileError::MissingFilterName { expression: self.expression() })?;
        let name = tokens[name_index].value.to_string();

        let mut arguments = Vec::new();
        let mut argument_code = String::new();
        let mut next = name_index + 1;

        while let Some(colon) = self.next_significant(next, end).filter(|index| tokens[*index].is(TokenKind::Colon)) {
            let arg_end = self.filter_argument_end(colon + 1, end, &name, ctx)?;
            let Some(first) = self.next_significant(colon + 1, arg_end) else {
                return Err(CompileError::MalformedFilterArgument {
                    filter: name,
                    expression: self.expression(),
                    reason: "empty argument".to_owned(),
                });
            };

            let code = self.compile_span(colon + 1, arg_end, Context::nested(false, false))?;
            argument_code.push_str(", ");
            argument_code.push_str(code.trim());

            let single = self.next_significant(first + 1, arg_end).is_none();
            let literal = if single { literal_value(&tokens[first]) } else { None };
            let argument = match literal {
                Some(value) => FilterArgument::Literal(value),
                None => {
                    let fragment = compile(self.source_between(colon + 1, arg_end).trim(), &self.options.fragment())?;
                    FilterArgument::Expression(Rc::new(fragment))
                }
            };
            arguments.push(argument);
            next = arg_end;
        }

        let template = self.options.filter_template.as_deref().unwrap_or(DEFAULT_FILTER_TEMPLATE);
        let invocation = fill_template(
            template,
            &[("%name", &name), ("%value", &value), ("%args", &argument_code)],
        );

        out.truncate(statement_start + leading);
        out.push_str(&invocation);
        self.filters.push(FilterCall { name, arguments });
        Ok(next)
    }

    /// End (exclusive) of a filter argument starting at `from`
    fn filter_argument_end(&self, from: usize, end: usize, filter: &str, ctx: Context) -> Result<usize, CompileError> {
        let mut depth = 0usize;
        let mut pending_conditionals = 0usize;

        for index in from..end {
            let token = &self.tokens[index];
            if token.kind.is_open_bracket() {
                depth += 1;
                continue;
            }
            if token.kind.is_close_bracket() {
                if depth == 0 {
                    return Err(CompileError::MalformedFilterArgument {
                        filter: filter.to_owned(),
                        expression: self.expression(),
                        reason: format!("unexpected '{}'", token.value),
                    });
                }
                depth -= 1;
                continue;
            }
            if depth > 0 {
                continue;
            }
            match token.kind {
                TokenKind::Question => pending_conditionals += 1,
                TokenKind::Colon if pending_conditionals > 0 => pending_conditionals -= 1,
                TokenKind::Colon | TokenKind::Pipe | TokenKind::Semicolon => return Ok(index),
                TokenKind::Comma if !ctx.top_level => return Ok(index),
                _ => {}
            }
        }
        Ok(end)
    }

    fn finalize(&mut self, body: String) -> String {
        let has_content = self.tokens.iter().any(|token| !token.is_trivia());
        let mut code = if !has_content {
            if self.options.auto_return { "return undefined".to_owned() } else { "undefined".to_owned() }
        } else {
            let body = if self.options.store_dependencies_locally {
                self.expand_markers(&body)
            } else {
                body
            };
            let mut code = self.local_prelude();
            code.push_str(&self.place_return(body));
            code
        };

        if self.options.auto_wrap {
            code = format!("(function () {{ {code} }})()");
        }
        code
    }

    /// Rewrite the last statement marker to `return`, strip the others
    fn place_return(&self, mut body: String) -> String {
        if self.options.auto_return && !self.explicit_return {
            if let Some(position) = body.rfind(RETURN_MARKER) {
                let rest = &body[position + RETURN_MARKER.len()..];
                let first_word: String = rest
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
                    .collect();
                let keyword = if matches!(first_word.as_str(), "var" | "if" | "return") { "" } else { "return " };
                body.replace_range(position..position + RETURN_MARKER.len(), keyword);
            }
        }
        body.replace(RETURN_MARKER, "")
    }

    fn local_prelude(&self) -> String {
        if !self.options.store_dependencies_locally {
            return String::new();
        }
        let locals: Vec<String> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_local())
            .map(|(id, entry)| format!("{}={}", local_name(id), self.expand_markers(&entry.text)))
            .collect();
        if locals.is_empty() {
            String::new()
        } else {
            format!("var {}; ", locals.join(", "))
        }
    }

    /// Replace dependency markers by local names or the dependency's code
    fn expand_markers(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut parts = text.split(DEPENDENCY_MARKER);
        if let Some(head) = parts.next() {
            out.push_str(head);
        }
        while let (Some(id), Some(tail)) = (parts.next(), parts.next()) {
            match id.parse::<usize>().ok().and_then(|id| self.entries.get(id).map(|entry| (id, entry))) {
                Some((id, entry)) if entry.is_local() => out.push_str(&local_name(id)),
                Some((_, entry)) => out.push_str(&self.expand_markers(&entry.text)),
                None => out.push_str(id),
            }
            out.push_str(tail);
        }
        out
    }
}

fn local_name(id: usize) -> String {
    format!("{LOCAL_PREFIX}{id}__")
}

fn literal_value(token: &Token) -> Option<Value> {
    match token.kind {
        TokenKind::Number => parse_number_literal(&token.value).map(Value::Number),
        TokenKind::String => parse_string_literal(&token.value).ok().map(Value::from),
        _ => None,
    }
}

/// Substitute `%placeholder`s in one pass; substituted text is never rescanned
fn fill_template(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    'scan: while let Some(position) = rest.find('%') {
        out.push_str(&rest[..position]);
        let candidate = &rest[position..];
        for (placeholder, value) in substitutions {
            if candidate.starts_with(placeholder) {
                out.push_str(value);
                rest = &candidate[placeholder.len()..];
                continue 'scan;
            }
        }
        out.push('%');
        rest = &candidate[1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(source: &str) -> String {
        compile(source, &CompileOptions::default()).unwrap().code().to_owned()
    }

    fn names(source: &str) -> Vec<String> {
        compile(source, &CompileOptions::default())
            .unwrap()
            .dependencies()
            .iter()
            .map(|dep| dep.code().to_owned())
            .collect()
    }

    #[test]
    fn test_single_statement_returns() {
        assert_eq!(code("a + b"), "return a + b");
        assert_eq!(names("a + b"), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(code(""), "return undefined");
        assert_eq!(code("   "), "return undefined");
        let options = CompileOptions { auto_return: false, ..Default::default() };
        assert_eq!(compile("", &options).unwrap().code(), "undefined");
    }

    #[test]
    fn test_member_names_are_not_dependencies() {
        assert_eq!(names("user.name.first"), vec!["user.name.first"]);
        assert_eq!(names("(user).name"), vec!["user"]);
        assert_eq!(names("'abc'.length"), Vec::<String>::new());
    }

    #[test]
    fn test_nested_dependencies() {
        let compiled = compile("items[index].label", &CompileOptions::default()).unwrap();
        let deps = compiled.dependencies();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].code(), "items[index].label");
        assert_eq!(deps[1].code(), "index");
        assert_eq!(
            deps[0].path(),
            &[
                PathSegment { value: "index".into(), kind: PathKind::ArrayIndex },
                PathSegment { value: "label".into(), kind: PathKind::ObjectKey },
            ]
        );
    }

    #[test]
    fn test_call_dependency() {
        let compiled = compile("format(date, 'short')", &CompileOptions::default()).unwrap();
        let deps = compiled.dependencies();
        assert_eq!(deps[0].code(), "format(date, 'short')");
        assert!(deps[0].is_call());
        assert_eq!(deps[1].code(), "date");
        assert!(!deps[1].is_call());
    }

    #[test]
    fn test_object_keys_are_skipped() {
        assert_eq!(names("{active: isActive, 'x-y': other}"), vec!["isActive", "other"]);
        assert_eq!(code("{active: isActive}"), "return {active: isActive}");
    }

    #[test]
    fn test_deduplicates_by_source_text() {
        assert_eq!(names("a.b + a.b * a"), vec!["a.b", "a"]);
    }

    #[test]
    fn test_keywords_pass_through() {
        assert_eq!(names("typeof x === 'undefined' ? null : true"), vec!["x"]);
    }

    #[test]
    fn test_auto_return_placement() {
        assert_eq!(code("a; b; c"), "a; b; return c");
        assert_eq!(code("a; b; c;"), "a; b; return c;");
        assert!(compile("a; b", &CompileOptions::default()).unwrap().is_multi_statement());
        assert!(!compile("a;", &CompileOptions::default()).unwrap().is_multi_statement());
    }

    #[test]
    fn test_explicit_return_is_kept() {
        assert_eq!(code("a; return b; c"), "a; return b; c");
    }

    #[test]
    fn test_no_return_before_declaration() {
        assert_eq!(code("var x = a"), "var x = a");
        assert_eq!(names("var x = a; x + 1"), vec!["a"]);
    }

    #[test]
    fn test_exportable() {
        let compiled = compile("#b = a", &CompileOptions::default()).unwrap();
        assert_eq!(compiled.code(), "return b = a");
        assert!(compiled.dependencies()[0].is_exportable());
        assert_eq!(compiled.exportable_names().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_misplaced_sigil() {
        let err = compile("a.#b", &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::MisplacedExportSigil { .. }));
        assert!(compile("# b", &CompileOptions::default()).is_err());
    }

    #[test]
    fn test_unbalanced() {
        match compile("f(a[1)", &CompileOptions::default()) {
            Err(CompileError::Unbalanced { bracket, .. }) => assert_eq!(bracket, '['),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            compile("a)", &CompileOptions::default()),
            Err(CompileError::UnexpectedClose { bracket: ')', .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let options = CompileOptions::default();
        let deep = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        assert!(matches!(compile(&deep, &options), Err(CompileError::TooDeep { .. })));

        let negations = format!("{}x", "!".repeat(20_000));
        assert!(matches!(compile(&negations, &options), Err(CompileError::TooDeep { .. })));

        let chain = format!("a{}", " + a".repeat(1_000));
        assert!(matches!(compile(&chain, &options), Err(CompileError::TooDeep { .. })));

        let fine = format!("{}a{}", "[".repeat(40), "]".repeat(40));
        assert!(compile(&fine, &options).is_ok());
    }

    #[test]
    fn test_filters() {
        assert_eq!(code("name | uppercase"), "return $filters.uppercase(name)");
        assert_eq!(
            code("items | join:', ' | uppercase"),
            "return $filters.uppercase($filters.join(items, ', '))"
        );

        let compiled = compile("value | default:fallback.text", &CompileOptions::default()).unwrap();
        assert_eq!(compiled.code(), "return $filters.default(value, fallback.text)");
        assert_eq!(compiled.filters().len(), 1);
        assert!(matches!(compiled.filters()[0].arguments[0], FilterArgument::Expression(_)));
        assert_eq!(compiled.dependencies().len(), 2);
    }

    #[test]
    fn test_filter_argument_with_conditional() {
        assert_eq!(
            code("a | default:b ? 1 : 2"),
            "return $filters.default(a, b ? 1 : 2)"
        );
    }

    #[test]
    fn test_filter_inside_call_arguments() {
        assert_eq!(code("f(x, a | trim)"), "return f(x, $filters.trim(a))");
    }

    #[test]
    fn test_filter_errors() {
        let options = CompileOptions::default();
        assert!(matches!(compile("a | ", &options), Err(CompileError::MissingFilterName { .. })));
        assert!(matches!(compile("| upper", &options), Err(CompileError::EmptyFilterInput { .. })));
        assert!(matches!(
            compile("a | default:", &options),
            Err(CompileError::MalformedFilterArgument { .. })
        ));
    }

    #[test]
    fn test_filters_not_allowed_in_brackets() {
        let err = compile("a[b | c]", &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }

    #[test]
    fn test_root_rewrite() {
        let options = CompileOptions {
            root_rewrite: Some(RootRewrite::new("$scope.%root").excluding(Regex::new("^\\$").unwrap())),
            ..Default::default()
        };
        let compiled = compile("a.b + $c + {a}", &options).unwrap();
        assert_eq!(compiled.code(), "return $scope.a.b + $c + {a: $scope.a}");
        assert_eq!(compiled.dependencies()[0].name(), "a");
    }

    #[test]
    fn test_store_locally() {
        let options = CompileOptions { store_dependencies_locally: true, ..Default::default() };
        let compiled = compile("a.b + a.b + f(c)", &options).unwrap();
        assert_eq!(compiled.code(), "var __dep0__=a.b, __dep1__=c; return __dep0__ + __dep0__ + f(__dep1__)");

        let assigned = compile("a = a + 1", &options).unwrap();
        assert_eq!(assigned.code(), "return a = a + 1");
    }

    #[test]
    fn test_auto_wrap() {
        let options = CompileOptions { auto_wrap: true, ..Default::default() };
        assert_eq!(compile("a", &options).unwrap().code(), "(function () { return a })()");
    }

    #[test]
    fn test_function_literal_is_verbatim() {
        assert_eq!(names("apply(function (x) { return x + y })"), vec!["apply(function (x) { return x + y })"]);
    }

    #[test]
    fn test_fill_template_single_pass() {
        assert_eq!(fill_template("%a-%b-%c", &[("%a", "%b"), ("%b", "2")]), "%b-2-%c");
    }
}
