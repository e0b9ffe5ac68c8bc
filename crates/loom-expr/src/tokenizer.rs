//! Rule-driven Tokenizer
//!
//! Rules are regex patterns registered in priority order. The input is split
//! by one composite alternation of all rules plus a catch-all, and every match
//! is then classified by re-testing the rules in order, so the first
//! registered rule wins even when a later one would match the same text.
//!
//! Tokenizing never fails: input no rule recognizes becomes `UNKNOWN` tokens,
//! and runs of them are coalesced. Rejecting them is up to the parser.

use crate::token::{Span, Token, TokenKind, TokenType};
use regex::Regex;
use std::sync::LazyLock;

/// Rule registration error
#[derive(Debug, thiserror::Error)]
pub enum TokenizeError {
    #[error("Invalid token pattern '{pattern}': {error}")]
    InvalidPattern {
        pattern: String,
        #[source]
        error: regex::Error,
    },

    #[error("Token pattern '{pattern}' matches the empty string")]
    EmptyMatch { pattern: String },
}

/// Catch-all alternative: any single character
const CATCH_ALL: &str = "(?s:.)";

#[derive(Debug, Clone)]
struct Rule<K> {
    kind: K,
    pattern: String,
    exact: Regex,
}

/// Ordered set of tokenizing rules
#[derive(Debug, Clone)]
pub struct Tokenizer<K: TokenType = TokenKind> {
    rules: Vec<Rule<K>>,
    combined: Option<Regex>,
}

impl<K: TokenType> Default for Tokenizer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TokenType> Tokenizer<K> {
    /// Create a tokenizer without rules (everything is `UNKNOWN`)
    pub fn new() -> Self {
        Self { rules: Vec::new(), combined: None }
    }

    /// Build a tokenizer from rules in priority order
    pub fn from_rules(rules: &[(K, &str)]) -> Result<Self, TokenizeError> {
        let mut tokenizer = Self::new();
        for (kind, pattern) in rules {
            tokenizer.add_rule(*kind, pattern)?;
        }
        Ok(tokenizer)
    }

    /// Register a rule after all previously registered ones
    pub fn add_rule(&mut self, kind: K, pattern: &str) -> Result<&mut Self, TokenizeError> {
        let exact = Regex::new(&format!("^(?:{pattern})$")).map_err(|error| {
            TokenizeError::InvalidPattern { pattern: pattern.to_owned(), error }
        })?;
        if exact.is_match("") {
            return Err(TokenizeError::EmptyMatch { pattern: pattern.to_owned() });
        }

        self.rules.push(Rule { kind, pattern: pattern.to_owned(), exact });
        self.combined = Some(self.build_combined()?);
        Ok(self)
    }

    /// Number of registered rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Registered `(kind, pattern)` pairs in priority order
    pub fn rules(&self) -> impl Iterator<Item = (K, &str)> {
        self.rules.iter().map(|rule| (rule.kind, rule.pattern.as_str()))
    }

    fn build_combined(&self) -> Result<Regex, TokenizeError> {
        let mut alternatives: Vec<String> = self
            .rules
            .iter()
            .map(|rule| format!("(?:{})", rule.pattern))
            .collect();
        alternatives.push(CATCH_ALL.to_owned());

        let pattern = alternatives.join("|");
        Regex::new(&pattern).map_err(|error| TokenizeError::InvalidPattern { pattern, error })
    }

    /// Type of a matched piece of text: the first rule matching all of it
    pub fn classify(&self, text: &str) -> K {
        self.rules
            .iter()
            .find(|rule| rule.exact.is_match(text))
            .map(|rule| rule.kind)
            .unwrap_or(K::UNKNOWN)
    }

    /// Split input into tokens
    pub fn tokenize(&self, input: &str) -> Vec<Token<K>> {
        let mut tokens: Vec<Token<K>> = Vec::new();
        let mut pos = 0;

        while pos < input.len() {
            let end = self
                .combined
                .as_ref()
                .and_then(|combined| combined.find_at(input, pos))
                .filter(|m| m.start() == pos && m.end() > pos)
                .map(|m| m.end())
                .unwrap_or_else(|| next_char_boundary(input, pos));

            let text = &input[pos..end];
            let kind = self.classify(text);
            let span = Span::new(pos as u32, end as u32);

            match tokens.last_mut() {
                Some(last) if kind == K::UNKNOWN && last.kind == K::UNKNOWN && last.span.end == span.start => {
                    let mut value = String::from(std::mem::take(&mut last.value));
                    value.push_str(text);
                    last.value = value.into();
                    last.span = last.span.merge(span);
                }
                _ => tokens.push(Token::new(kind, text, span)),
            }

            pos = end;
        }

        tokens
    }
}

fn next_char_boundary(input: &str, pos: usize) -> usize {
    input[pos..]
        .chars()
        .next()
        .map(|c| pos + c.len_utf8())
        .unwrap_or(input.len())
}

/// Rules for binding expressions, in priority order
const EXPRESSION_RULES: &[(TokenKind, &str)] = &[
    (TokenKind::Whitespace, r"\s+"),
    (TokenKind::Number, r"(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?"),
    (TokenKind::String, r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#),
    (TokenKind::Identifier, r"[A-Za-z_$][A-Za-z0-9_$]*"),
    (TokenKind::Operator, r"===|!==|==|!=|<=|>=|&&|\|\||\?\?|\+\+|--|[-+*/%]="),
    (TokenKind::Pipe, r"\|"),
    (TokenKind::Hash, r"#"),
    (TokenKind::Dot, r"\."),
    (TokenKind::Comma, r","),
    (TokenKind::Colon, r":"),
    (TokenKind::Semicolon, r";"),
    (TokenKind::Question, r"\?"),
    (TokenKind::LParen, r"\("),
    (TokenKind::RParen, r"\)"),
    (TokenKind::LBracket, r"\["),
    (TokenKind::RBracket, r"\]"),
    (TokenKind::LBrace, r"\{"),
    (TokenKind::RBrace, r"\}"),
    (TokenKind::Operator, r"[-+*/%<>=!]"),
];

static EXPRESSION_TOKENIZER: LazyLock<Tokenizer> = LazyLock::new(|| {
    Tokenizer::from_rules(EXPRESSION_RULES).expect("built-in expression token rules are valid")
});

/// Shared tokenizer for binding expressions
pub fn expression_tokenizer() -> &'static Tokenizer {
    &EXPRESSION_TOKENIZER
}

/// Tokenize a binding expression
pub fn tokenize(input: &str) -> Vec<Token> {
    expression_tokenizer().tokenize(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_member_path() {
        use TokenKind::*;
        assert_eq!(kinds("a.b[0]"), vec![Identifier, Dot, Identifier, LBracket, Number, RBracket]);
    }

    #[test]
    fn test_operator_priority() {
        let tokens = tokenize("a || b | c");
        assert!(tokens[2].is_operator("||"));
        assert_eq!(tokens[6].kind, TokenKind::Pipe);
    }

    #[test]
    fn test_unknown_is_coalesced() {
        let tokens = tokenize("a @@~ b");
        assert_eq!(tokens[2].kind, TokenKind::Unknown);
        assert_eq!(&*tokens[2].value, "@@~");
        assert_eq!(tokens[2].span, Span::new(2, 5));
    }

    #[test]
    fn test_unterminated_string() {
        let tokens = tokenize("'abc");
        assert_eq!(tokens[0].kind, TokenKind::Unknown);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_custom_rules_first_wins() {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum Kind { Keyword, Word, Other }
        impl TokenType for Kind { const UNKNOWN: Self = Kind::Other; }

        let mut tokenizer = Tokenizer::new();
        tokenizer.add_rule(Kind::Keyword, "if|else").unwrap();
        tokenizer.add_rule(Kind::Word, "[a-z]+").unwrap();

        let tokens = tokenizer.tokenize("if x");
        assert_eq!(tokens[0].kind, Kind::Keyword);
        assert_eq!(tokens[1].kind, Kind::Other);
        assert_eq!(tokens[2].kind, Kind::Word);
    }

    #[test]
    fn test_rejects_empty_pattern() {
        let mut tokenizer: Tokenizer = Tokenizer::new();
        let err = tokenizer.add_rule(TokenKind::Number, "[0-9]*").unwrap_err();
        assert!(matches!(err, TokenizeError::EmptyMatch { .. }));
        assert!(tokenizer.is_empty());
    }

    #[test]
    fn test_no_rules() {
        let tokenizer: Tokenizer = Tokenizer::new();
        let tokens = tokenizer.tokenize("abc");
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].is_unknown());
    }
}
