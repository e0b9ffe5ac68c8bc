//! Statement and Expression Parser
//!
//! Recursive descent over the significant tokens of compiled code, producing
//! the arena AST the evaluator walks. Binary levels use one function per
//! precedence tier, lowest first.

use crate::ast::{
    children, AssignOp, Ast, AstNode, AstNodeKind, BinaryOp, LiteralValue, LogicalOp, MemberProperty, NodeId, Program,
    UnaryOp, UpdateOp,
};
use crate::cursor::TokenCursor;
use crate::token::{Span, Token, TokenKind};
use crate::tokenizer::tokenize;

/// Deepest nesting accepted, both of recursive constructs while parsing and
/// of the resulting tree
pub const MAX_NESTING_DEPTH: usize = 128;

const TOO_DEEP: &str = "Expression nested too deeply";

/// Parser error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} at {}..{}", .span.start, .span.end)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self { message: message.into(), span }
    }

    /// Whether parsing stopped at [`MAX_NESTING_DEPTH`]
    pub fn is_too_deep(&self) -> bool {
        self.message == TOO_DEEP
    }
}

/// Parse code into a program
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens: Vec<Token> = tokenize(source).into_iter().filter(|token| !token.is_trivia()).collect();
    let end = Span::new(source.len() as u32, source.len() as u32);
    Parser::new(&tokens, end).parse()
}

/// Parse a numeric literal as written in source
pub fn parse_number_literal(text: &str) -> Option<f64> {
    text.parse::<f64>().ok()
}

/// Unquote a string literal, resolving escapes
pub fn parse_string_literal(raw: &str) -> Result<String, String> {
    let mut chars = raw.chars();
    let quote = chars.next().filter(|c| *c == '"' || *c == '\'').ok_or("missing opening quote")?;
    let body = chars.as_str().strip_suffix(quote).ok_or("missing closing quote")?;

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('x') => out.push(hex_escape(&mut chars, 2)?),
            Some('u') => out.push(hex_escape(&mut chars, 4)?),
            Some(other) => out.push(other),
            None => return Err("dangling escape".to_owned()),
        }
    }
    Ok(out)
}

fn hex_escape(chars: &mut std::str::Chars<'_>, digits: usize) -> Result<char, String> {
    let hex: String = chars.by_ref().take(digits).collect();
    u32::from_str_radix(&hex, 16)
        .ok()
        .filter(|_| hex.len() == digits)
        .and_then(char::from_u32)
        .ok_or_else(|| format!("invalid escape '{hex}'"))
}

/// Parser over significant tokens
pub struct Parser<'t> {
    cursor: TokenCursor<'t>,
    end: Span,
    ast: Ast,
    /// `var` names per function level, innermost last
    hoisted: Vec<Vec<Box<str>>>,
    depth: usize,
    /// Height of every node's subtree, indexed like the arena
    heights: Vec<usize>,
    too_deep: Option<Span>,
}

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Token], end: Span) -> Self {
        Self {
            cursor: TokenCursor::new(tokens),
            end,
            ast: Ast::new(),
            hoisted: vec![Vec::new()],
            depth: 0,
            heights: Vec::new(),
            too_deep: None,
        }
    }

    fn current_span(&self) -> Span {
        self.cursor.current().map(|token| token.span).unwrap_or(self.end)
    }

    fn previous_span(&self) -> Span {
        self.cursor
            .position()
            .checked_sub(1)
            .and_then(|index| self.cursor.tokens().get(index))
            .map(|token| token.span)
            .unwrap_or(self.end)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.cursor.current().is_some_and(|token| token.is(kind))
    }

    fn check_operator(&self, op: &str) -> bool {
        self.cursor.current().is_some_and(|token| token.is_operator(op))
    }

    fn check_word(&self, word: &str) -> bool {
        self.cursor.current().is_some_and(|token| token.is_word(word))
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        let matched = self.check(kind);
        if matched {
            self.cursor.advance();
        }
        matched
    }

    fn consume(&mut self, kind: TokenKind, what: &str) -> Result<&'t Token, ParseError> {
        match self.cursor.current() {
            Some(token) if token.is(kind) => {
                self.cursor.advance();
                Ok(token)
            }
            Some(token) => Err(ParseError::new(format!("Expected {what}, got '{}'", token.value), token.span)),
            None => Err(ParseError::new(format!("Expected {what}, got end of input"), self.end)),
        }
    }

    fn unexpected(&self) -> ParseError {
        match self.cursor.current() {
            Some(token) => ParseError::new(format!("Unexpected token '{}'", token.value), token.span),
            None => ParseError::new("Unexpected end of input", self.end),
        }
    }

    fn span_of(&self, id: NodeId) -> Span {
        self.ast[id].span
    }

    fn add(&mut self, kind: AstNodeKind, span: Span) -> NodeId {
        let height = 1 + children(&kind)
            .iter()
            .filter_map(|child| self.heights.get(child.0 as usize))
            .max()
            .copied()
            .unwrap_or(0);
        if height > MAX_NESTING_DEPTH && self.too_deep.is_none() {
            self.too_deep = Some(span);
        }
        self.heights.push(height);
        self.ast.add_node(AstNode::new(kind, span))
    }

    /// Run `parse` one recursion level deeper
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, ParseError>) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ParseError::new(TOO_DEEP, self.current_span()));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Parse a complete program
    pub fn parse(mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !self.cursor.is_at_end() {
            body.push(self.parse_statement()?);
        }

        let span = match (body.first(), body.last()) {
            (Some(first), Some(last)) => self.span_of(*first).merge(self.span_of(*last)),
            _ => Span::new(0, 0),
        };
        let root = self.add(AstNodeKind::Program { body }, span);
        if let Some(span) = self.too_deep {
            return Err(ParseError::new(TOO_DEEP, span));
        }
        let hoisted = self.hoisted.pop().unwrap_or_default();
        Ok(Program::new(self.ast, root, hoisted))
    }

    fn parse_statement(&mut self) -> Result<NodeId, ParseError> {
        self.nested(Self::statement)
    }

    fn statement(&mut self) -> Result<NodeId, ParseError> {
        if self.check(TokenKind::LBrace) {
            return self.parse_block();
        }
        if self.check(TokenKind::Semicolon) {
            let span = self.current_span();
            self.cursor.advance();
            return Ok(self.add(AstNodeKind::EmptyStatement, span));
        }
        if self.check_word("var") {
            return self.parse_variable_declaration();
        }
        if self.check_word("return") {
            return self.parse_return();
        }
        if self.check_word("if") {
            return self.parse_if();
        }
        self.parse_expression_statement()
    }

    /// Statements end at `;`, before `}` or at the end of input
    fn end_statement(&mut self) -> Result<(), ParseError> {
        if self.eat(TokenKind::Semicolon) || self.check(TokenKind::RBrace) || self.cursor.is_at_end() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_block(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        self.consume(TokenKind::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.cursor.is_at_end() {
                return Err(ParseError::new("Unclosed block", start));
            }
            body.push(self.parse_statement()?);
        }
        self.cursor.advance();
        Ok(self.add(AstNodeKind::BlockStatement { body }, start.merge(self.previous_span())))
    }

    fn parse_variable_declaration(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        self.cursor.advance(); // var

        let mut declarations = Vec::new();
        loop {
            let name_token = self.consume(TokenKind::Identifier, "variable name")?;
            if crate::token::is_keyword(&name_token.value) {
                return Err(ParseError::new(format!("'{}' is reserved", name_token.value), name_token.span));
            }
            let init = if self.check_operator("=") {
                self.cursor.advance();
                Some(self.parse_assignment()?)
            } else {
                None
            };

            let name = name_token.value.clone();
            if let Some(frame) = self.hoisted.last_mut() {
                if !frame.contains(&name) {
                    frame.push(name.clone());
                }
            }
            let span = name_token.span.merge(self.previous_span());
            declarations.push(self.add(AstNodeKind::VariableDeclarator { name, init }, span));

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.end_statement()?;
        Ok(self.add(AstNodeKind::VariableDeclaration { declarations }, start.merge(self.previous_span())))
    }

    fn parse_return(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        self.cursor.advance(); // return
        let argument = if self.check(TokenKind::Semicolon) || self.check(TokenKind::RBrace) || self.cursor.is_at_end() {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.end_statement()?;
        Ok(self.add(AstNodeKind::ReturnStatement { argument }, start.merge(self.previous_span())))
    }

    fn parse_if(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        self.cursor.advance(); // if
        self.consume(TokenKind::LParen, "'(' after 'if'")?;
        let test = self.parse_expression()?;
        self.consume(TokenKind::RParen, "')'")?;
        let consequent = self.parse_statement()?;
        let alternate = if self.check_word("else") {
            self.cursor.advance();
            Some(self.parse_statement()?)
        } else {
            None
        };
        Ok(self.add(
            AstNodeKind::IfStatement { test, consequent, alternate },
            start.merge(self.previous_span()),
        ))
    }

    fn parse_expression_statement(&mut self) -> Result<NodeId, ParseError> {
        let expr = self.parse_expression()?;
        self.end_statement()?;
        let span = self.span_of(expr);
        Ok(self.add(AstNodeKind::ExpressionStatement { expr }, span))
    }

    pub fn parse_expression(&mut self) -> Result<NodeId, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<NodeId, ParseError> {
        self.nested(Self::assignment)
    }

    fn assignment(&mut self) -> Result<NodeId, ParseError> {
        let target = self.parse_conditional()?;

        let operator = match self.cursor.current() {
            Some(token) if token.is(TokenKind::Operator) => match &*token.value {
                "=" => AssignOp::Assign,
                "+=" => AssignOp::AddAssign,
                "-=" => AssignOp::SubAssign,
                "*=" => AssignOp::MulAssign,
                "/=" => AssignOp::DivAssign,
                "%=" => AssignOp::ModAssign,
                _ => return Ok(target),
            },
            _ => return Ok(target),
        };

        if !self.ast[target].kind.is_assignable() {
            return Err(ParseError::new("Invalid assignment target", self.span_of(target)));
        }
        self.cursor.advance();
        let value = self.parse_assignment()?;
        let span = self.span_of(target).merge(self.span_of(value));
        Ok(self.add(AstNodeKind::AssignmentExpression { operator, target, value }, span))
    }

    fn parse_conditional(&mut self) -> Result<NodeId, ParseError> {
        let test = self.parse_nullish()?;
        if !self.eat(TokenKind::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.consume(TokenKind::Colon, "':' in conditional")?;
        let alternate = self.parse_assignment()?;
        let span = self.span_of(test).merge(self.span_of(alternate));
        Ok(self.add(AstNodeKind::ConditionalExpression { test, consequent, alternate }, span))
    }

    fn logical(&mut self, left: NodeId, operator: LogicalOp, right: NodeId) -> NodeId {
        let span = self.span_of(left).merge(self.span_of(right));
        self.add(AstNodeKind::LogicalExpression { operator, left, right }, span)
    }

    fn binary(&mut self, left: NodeId, operator: BinaryOp, right: NodeId) -> NodeId {
        let span = self.span_of(left).merge(self.span_of(right));
        self.add(AstNodeKind::BinaryExpression { operator, left, right }, span)
    }

    fn parse_nullish(&mut self) -> Result<NodeId, ParseError> {
        let mut left = self.parse_logical_or()?;
        while self.check_operator("??") {
            self.cursor.advance();
            let right = self.parse_logical_or()?;
            left = self.logical(left, LogicalOp::NullishCoalescing, right);
        }
        Ok(left)
    }

    fn parse_logical_or(&mut self) -> Result<NodeId, ParseError> {
        let mut left = self.parse_logical_and()?;
        while self.check_operator("||") {
            self.cursor.advance();
            let right = self.parse_logical_and()?;
            left = self.logical(left, LogicalOp::Or, right);
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<NodeId, ParseError> {
        let mut left = self.parse_equality()?;
        while self.check_operator("&&") {
            self.cursor.advance();
            let right = self.parse_equality()?;
            left = self.logical(left, LogicalOp::And, right);
        }
        Ok(left)
    }

    fn binary_operator(&self, table: &[(&str, BinaryOp)]) -> Option<BinaryOp> {
        let token = self.cursor.current()?;
        if token.is_word("in") {
            return table.iter().find(|(text, _)| *text == "in").map(|(_, op)| *op);
        }
        if !token.is(TokenKind::Operator) {
            return None;
        }
        table.iter().find(|(text, _)| *text == &*token.value).map(|(_, op)| *op)
    }

    fn parse_binary_level(
        &mut self,
        table: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<NodeId, ParseError>,
    ) -> Result<NodeId, ParseError> {
        let mut left = next(self)?;
        while let Some(operator) = self.binary_operator(table) {
            self.cursor.advance();
            let right = next(self)?;
            left = self.binary(left, operator, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<NodeId, ParseError> {
        self.parse_binary_level(
            &[
                ("===", BinaryOp::StrictEqual),
                ("!==", BinaryOp::StrictNotEqual),
                ("==", BinaryOp::Equal),
                ("!=", BinaryOp::NotEqual),
            ],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Result<NodeId, ParseError> {
        self.parse_binary_level(
            &[
                ("<", BinaryOp::LessThan),
                ("<=", BinaryOp::LessThanEq),
                (">", BinaryOp::GreaterThan),
                (">=", BinaryOp::GreaterThanEq),
                ("in", BinaryOp::In),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<NodeId, ParseError> {
        self.parse_binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<NodeId, ParseError> {
        self.parse_binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Mod)],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        let Some(token) = self.cursor.current() else {
            return Err(self.unexpected());
        };

        let operator = if token.is_operator("!") {
            Some(UnaryOp::Not)
        } else if token.is_operator("-") {
            Some(UnaryOp::Minus)
        } else if token.is_operator("+") {
            Some(UnaryOp::Plus)
        } else if token.is_word("typeof") {
            Some(UnaryOp::Typeof)
        } else if token.is_word("void") {
            Some(UnaryOp::Void)
        } else {
            None
        };
        if let Some(operator) = operator {
            self.cursor.advance();
            let argument = self.nested(Self::parse_unary)?;
            let span = start.merge(self.span_of(argument));
            return Ok(self.add(AstNodeKind::UnaryExpression { operator, argument }, span));
        }

        let update = if token.is_operator("++") {
            Some(UpdateOp::Increment)
        } else if token.is_operator("--") {
            Some(UpdateOp::Decrement)
        } else {
            None
        };
        if let Some(operator) = update {
            self.cursor.advance();
            let argument = self.nested(Self::parse_unary)?;
            if !self.ast[argument].kind.is_assignable() {
                return Err(ParseError::new("Invalid update target", self.span_of(argument)));
            }
            let span = start.merge(self.span_of(argument));
            return Ok(self.add(AstNodeKind::UpdateExpression { operator, argument, prefix: true }, span));
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<NodeId, ParseError> {
        let argument = self.parse_call()?;
        let operator = if self.check_operator("++") {
            UpdateOp::Increment
        } else if self.check_operator("--") {
            UpdateOp::Decrement
        } else {
            return Ok(argument);
        };
        if !self.ast[argument].kind.is_assignable() {
            return Err(ParseError::new("Invalid update target", self.span_of(argument)));
        }
        self.cursor.advance();
        let span = self.span_of(argument).merge(self.previous_span());
        Ok(self.add(AstNodeKind::UpdateExpression { operator, argument, prefix: false }, span))
    }

    fn parse_call(&mut self) -> Result<NodeId, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.eat(TokenKind::Dot) {
                let name = self.consume(TokenKind::Identifier, "property name")?;
                let span = self.span_of(expr).merge(name.span);
                expr = self.add(
                    AstNodeKind::MemberExpression { object: expr, property: MemberProperty::Static(name.value.clone()) },
                    span,
                );
            } else if self.eat(TokenKind::LBracket) {
                let property = self.parse_expression()?;
                self.consume(TokenKind::RBracket, "']'")?;
                let span = self.span_of(expr).merge(self.previous_span());
                expr = self.add(
                    AstNodeKind::MemberExpression { object: expr, property: MemberProperty::Computed(property) },
                    span,
                );
            } else if self.eat(TokenKind::LParen) {
                let arguments = self.parse_arguments(TokenKind::RParen)?;
                let span = self.span_of(expr).merge(self.previous_span());
                expr = self.add(AstNodeKind::CallExpression { callee: expr, arguments }, span);
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Comma separated expressions up to `close` (consumed); allows a trailing comma
    fn parse_arguments(&mut self, close: TokenKind) -> Result<Vec<NodeId>, ParseError> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.parse_assignment()?);
            if !self.eat(TokenKind::Comma) {
                self.consume(close, "',' or closing bracket")?;
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<NodeId, ParseError> {
        let Some(token) = self.cursor.current() else {
            return Err(self.unexpected());
        };
        let span = token.span;

        match token.kind {
            TokenKind::Number => {
                let value = parse_number_literal(&token.value)
                    .ok_or_else(|| ParseError::new(format!("Invalid number '{}'", token.value), span))?;
                self.cursor.advance();
                Ok(self.add(AstNodeKind::Literal { value: LiteralValue::Number(value) }, span))
            }
            TokenKind::String => {
                let value = parse_string_literal(&token.value).map_err(|reason| ParseError::new(reason, span))?;
                self.cursor.advance();
                Ok(self.add(AstNodeKind::Literal { value: LiteralValue::String(value.into()) }, span))
            }
            TokenKind::Identifier => self.parse_word(token),
            TokenKind::LParen => {
                self.cursor.advance();
                let expr = self.parse_expression()?;
                self.consume(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.cursor.advance();
                let elements = self.parse_arguments(TokenKind::RBracket)?;
                Ok(self.add(AstNodeKind::ArrayExpression { elements }, span.merge(self.previous_span())))
            }
            TokenKind::LBrace => self.parse_object(),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_word(&mut self, token: &'t Token) -> Result<NodeId, ParseError> {
        let span = token.span;
        let literal = match &*token.value {
            "true" => Some(LiteralValue::Bool(true)),
            "false" => Some(LiteralValue::Bool(false)),
            "null" => Some(LiteralValue::Null),
            "undefined" => Some(LiteralValue::Undefined),
            "NaN" => Some(LiteralValue::Number(f64::NAN)),
            "Infinity" => Some(LiteralValue::Number(f64::INFINITY)),
            "function" => return self.parse_function(),
            word if crate::token::is_keyword(word) => {
                return Err(ParseError::new(format!("'{word}' is not supported here"), span));
            }
            _ => None,
        };

        self.cursor.advance();
        let kind = match literal {
            Some(value) => AstNodeKind::Literal { value },
            None => AstNodeKind::Identifier { name: token.value.clone() },
        };
        Ok(self.add(kind, span))
    }

    fn parse_object(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        self.consume(TokenKind::LBrace, "'{'")?;

        let mut properties = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            let Some(key_token) = self.cursor.current() else {
                return Err(ParseError::new("Unclosed object literal", start));
            };
            let key: Box<str> = match key_token.kind {
                TokenKind::Identifier => key_token.value.clone(),
                TokenKind::String => parse_string_literal(&key_token.value)
                    .map_err(|reason| ParseError::new(reason, key_token.span))?
                    .into(),
                TokenKind::Number => {
                    let number = parse_number_literal(&key_token.value)
                        .ok_or_else(|| ParseError::new("Invalid numeric key", key_token.span))?;
                    crate::value::number_to_string(number).into()
                }
                _ => return Err(self.unexpected()),
            };
            self.cursor.advance();

            let value = if self.eat(TokenKind::Colon) {
                self.parse_assignment()?
            } else if key_token.is(TokenKind::Identifier) && !crate::token::is_keyword(&key_token.value) {
                self.add(AstNodeKind::Identifier { name: key.clone() }, key_token.span)
            } else {
                return Err(self.unexpected());
            };
            let span = key_token.span.merge(self.span_of(value));
            properties.push(self.add(AstNodeKind::Property { key, value }, span));

            if !self.eat(TokenKind::Comma) {
                self.consume(TokenKind::RBrace, "',' or '}'")?;
                break;
            }
        }

        Ok(self.add(AstNodeKind::ObjectExpression { properties }, start.merge(self.previous_span())))
    }

    fn parse_function(&mut self) -> Result<NodeId, ParseError> {
        let start = self.current_span();
        self.cursor.advance(); // function

        let name = if self.check(TokenKind::Identifier) {
            self.cursor.advance().map(|token| token.value.clone())
        } else {
            None
        };

        self.consume(TokenKind::LParen, "'(' after 'function'")?;
        let mut params = Vec::new();
        while !self.eat(TokenKind::RParen) {
            params.push(self.consume(TokenKind::Identifier, "parameter name")?.value.clone());
            if !self.eat(TokenKind::Comma) {
                self.consume(TokenKind::RParen, "',' or ')'")?;
                break;
            }
        }

        self.hoisted.push(Vec::new());
        let body = self.parse_block();
        let locals = self.hoisted.pop().unwrap_or_default();
        let body = body?;

        Ok(self.add(
            AstNodeKind::FunctionExpression { name, params, body, locals },
            start.merge(self.previous_span()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_kind(source: &str) -> AstNodeKind {
        let program = parse_program(source).unwrap();
        let first = program.body()[0];
        program.ast()[first].kind.clone()
    }

    #[test]
    fn test_precedence() {
        let program = parse_program("a + b * c").unwrap();
        let AstNodeKind::ExpressionStatement { expr } = program.ast()[program.body()[0]].kind else {
            panic!("expected expression statement");
        };
        match &program.ast()[expr].kind {
            AstNodeKind::BinaryExpression { operator: BinaryOp::Add, right, .. } => {
                assert!(matches!(
                    program.ast()[*right].kind,
                    AstNodeKind::BinaryExpression { operator: BinaryOp::Mul, .. }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_statements() {
        let program = parse_program("var x = 1, y; if (x) { y = 2 } else y = 3; return y").unwrap();
        assert_eq!(program.body().len(), 3);
        let hoisted: Vec<&str> = program.hoisted().iter().map(|n| &**n).collect();
        assert_eq!(hoisted, vec!["x", "y"]);
        assert!(program.free_names().is_empty());
    }

    #[test]
    fn test_free_names_in_order() {
        let program = parse_program("b + a.c + b + f(d)").unwrap();
        let names: Vec<&str> = program.free_names().iter().map(|n| &**n).collect();
        assert_eq!(names, vec!["b", "a", "f", "d"]);
    }

    #[test]
    fn test_function_locals() {
        let kind = root_kind("(function (a) { var b = a; return b })");
        match kind {
            AstNodeKind::ExpressionStatement { .. } => {}
            other => panic!("unexpected {other:?}"),
        }
        let program = parse_program("(function (a) { var b = a; return b + c })()").unwrap();
        assert!(program.hoisted().is_empty());
        assert!(program.references("c"));
        assert_eq!(program.free_names().len(), 1);
    }

    #[test]
    fn test_parameters_only_bind_inside_their_function() {
        let program = parse_program("(function (x) { var y = x; return y })(x) + y").unwrap();
        let names: Vec<&str> = program.free_names().iter().map(|n| &**n).collect();
        assert_eq!(names, vec!["x", "y"]);

        let program = parse_program("var x = 1; (function () { return x + z })()").unwrap();
        let names: Vec<&str> = program.free_names().iter().map(|n| &**n).collect();
        assert_eq!(names, vec!["z"]);
    }

    #[test]
    fn test_object_literal() {
        let program = parse_program("return {a: 1, 'b': x, c}").unwrap();
        let names: Vec<&str> = program.free_names().iter().map(|n| &**n).collect();
        assert_eq!(names, vec!["x", "c"]);
    }

    #[test]
    fn test_invalid_assignment() {
        let err = parse_program("a + 1 = 2").unwrap_err();
        assert!(err.message.contains("assignment"));
    }

    #[test]
    fn test_rejects_unsupported() {
        assert!(parse_program("a | b").is_err());
        assert!(parse_program("new Foo()").is_err());
        assert!(parse_program("this.x").is_err());
        assert!(parse_program("a b").is_err());
        assert!(parse_program("a @ b").is_err());
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(parse_string_literal(r#""a\n\"bA""#).unwrap(), "a\n\"bA");
        assert_eq!(parse_string_literal("'it\\'s'").unwrap(), "it's");
        assert!(parse_string_literal("'open").is_err());
    }
}
