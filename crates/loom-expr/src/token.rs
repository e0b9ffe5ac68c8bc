//! Token Types
//!
//! Tokens produced by the rule-driven tokenizer. A token is immutable once
//! produced: its kind, the exact text it matched and where it matched.

use std::fmt;

/// Source span (byte offsets)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A token type usable with [`Tokenizer`](crate::Tokenizer).
///
/// Every type set has a distinguished fallback for input no rule recognizes.
pub trait TokenType: Copy + Eq + fmt::Debug {
    const UNKNOWN: Self;
}

/// Token with kind, matched text and span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<K = TokenKind> {
    pub kind: K,
    pub value: Box<str>,
    pub span: Span,
}

impl<K: TokenType> Token<K> {
    pub fn new(kind: K, value: impl Into<Box<str>>, span: Span) -> Self {
        Self { kind, value: value.into(), span }
    }

    pub fn is(&self, kind: K) -> bool {
        self.kind == kind
    }

    pub fn is_unknown(&self) -> bool {
        self.kind == K::UNKNOWN
    }
}

impl Token<TokenKind> {
    /// Whitespace carries no meaning for any parser
    pub fn is_trivia(&self) -> bool {
        self.kind == TokenKind::Whitespace
    }

    /// Operator token with exactly this text
    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && &*self.value == op
    }

    /// Identifier token with exactly this text (used for keywords)
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Identifier && &*self.value == word
    }
}

/// Token kinds for binding expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Whitespace,
    Number,
    String,
    /// Names and keywords alike; keywords are told apart by text
    Identifier,
    /// Arithmetic, comparison, logical and assignment operators
    Operator,
    /// Single `|`, the filter separator
    Pipe,
    /// `#`, marks an exportable binding
    Hash,
    Dot,
    Comma,
    Colon,
    Semicolon,
    Question,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Unknown,
}

impl TokenType for TokenKind {
    const UNKNOWN: Self = TokenKind::Unknown;
}

impl TokenKind {
    /// Closing counterpart of an opening bracket
    pub fn closing(self) -> Option<TokenKind> {
        match self {
            TokenKind::LParen => Some(TokenKind::RParen),
            TokenKind::LBracket => Some(TokenKind::RBracket),
            TokenKind::LBrace => Some(TokenKind::RBrace),
            _ => None,
        }
    }

    pub fn is_open_bracket(self) -> bool {
        self.closing().is_some()
    }

    pub fn is_close_bracket(self) -> bool {
        matches!(self, TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace)
    }
}

/// Words that are never dependencies and never root-rewritten
pub const KEYWORDS: &[&str] = &[
    "true", "false", "null", "undefined", "NaN", "Infinity",
    "var", "return", "if", "else", "function", "typeof", "void", "in",
    "this", "new", "delete", "instanceof",
];

/// Check if a word is reserved
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge() {
        let span = Span::new(4, 6).merge(Span::new(1, 5));
        assert_eq!(span, Span::new(1, 6));
        assert_eq!(span.len(), 5);
    }

    #[test]
    fn test_closing_brackets() {
        assert_eq!(TokenKind::LBrace.closing(), Some(TokenKind::RBrace));
        assert_eq!(TokenKind::Dot.closing(), None);
        assert!(TokenKind::RParen.is_close_bracket());
    }

    #[test]
    fn test_keywords() {
        assert!(is_keyword("typeof"));
        assert!(!is_keyword("items"));
    }
}
