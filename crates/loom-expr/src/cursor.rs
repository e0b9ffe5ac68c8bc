//! Token Cursor
//!
//! Pull-based cursor over a token slice: current/lookahead access, unbounded
//! peek-ahead that can be reset, and positional jumps.

use crate::token::{Token, TokenKind, TokenType};

#[derive(Debug, Clone)]
pub struct TokenCursor<'t, K: TokenType = TokenKind> {
    tokens: &'t [Token<K>],
    position: usize,
    peeked: usize,
}

impl<'t, K: TokenType> TokenCursor<'t, K> {
    pub fn new(tokens: &'t [Token<K>]) -> Self {
        Self { tokens, position: 0, peeked: 0 }
    }

    /// The underlying tokens
    pub fn tokens(&self) -> &'t [Token<K>] {
        self.tokens
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    pub fn current(&self) -> Option<&'t Token<K>> {
        self.tokens.get(self.position)
    }

    /// Token right after the current one
    pub fn lookahead(&self) -> Option<&'t Token<K>> {
        self.tokens.get(self.position + 1)
    }

    /// Token `n` places after the current one (`nth(0)` is current)
    pub fn nth(&self, n: usize) -> Option<&'t Token<K>> {
        self.tokens.get(self.position + n)
    }

    /// Return the current token and move past it
    pub fn advance(&mut self) -> Option<&'t Token<K>> {
        let token = self.current();
        if token.is_some() {
            self.position += 1;
        }
        self.peeked = 0;
        token
    }

    /// Next token of the peek window. Successive calls walk further ahead
    /// without moving the cursor; [`reset_peek`](Self::reset_peek) rewinds.
    pub fn peek(&mut self) -> Option<&'t Token<K>> {
        self.peeked += 1;
        self.tokens.get(self.position + self.peeked)
    }

    pub fn reset_peek(&mut self) {
        self.peeked = 0;
    }

    /// Move to an absolute position (clamped to the end)
    pub fn jump_to(&mut self, position: usize) {
        self.position = position.min(self.tokens.len());
        self.peeked = 0;
    }

    /// Advance while the predicate holds
    pub fn skip_while(&mut self, predicate: impl Fn(&Token<K>) -> bool) {
        while self.current().is_some_and(&predicate) {
            self.position += 1;
        }
        self.peeked = 0;
    }

    /// First token at or after `from` not matching `skip`, with its index
    pub fn find_from(&self, from: usize, skip: impl Fn(&Token<K>) -> bool) -> Option<(usize, &'t Token<K>)> {
        self.tokens
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, token)| !skip(token))
    }

    /// Index of the token closing the group opened at `open_index`.
    ///
    /// Only tokens of the same bracket type are counted.
    pub fn find_matching(&self, open_index: usize, close: K) -> Option<usize> {
        let open = self.tokens.get(open_index)?.kind;
        let mut depth = 0usize;
        for (index, token) in self.tokens.iter().enumerate().skip(open_index) {
            if token.kind == open {
                depth += 1;
            } else if token.kind == close {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
        }
        None
    }

    pub fn slice(&self, from: usize, to: usize) -> &'t [Token<K>] {
        let to = to.min(self.tokens.len());
        &self.tokens[from.min(to)..to]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    #[test]
    fn test_advance_and_lookahead() {
        let tokens = tokenize("a.b");
        let mut cursor = TokenCursor::new(&tokens);
        assert_eq!(cursor.lookahead().map(|t| t.kind), Some(TokenKind::Dot));
        assert_eq!(cursor.advance().map(|t| &*t.value), Some("a"));
        assert_eq!(cursor.current().map(|t| &*t.value), Some("."));
        cursor.advance();
        cursor.advance();
        assert!(cursor.is_at_end());
        assert!(cursor.advance().is_none());
    }

    #[test]
    fn test_peek_and_reset() {
        let tokens = tokenize("a b c");
        let mut cursor = TokenCursor::new(&tokens);
        assert_eq!(cursor.peek().map(|t| t.kind), Some(TokenKind::Whitespace));
        assert_eq!(cursor.peek().map(|t| &*t.value), Some("b"));
        assert_eq!(cursor.peek().map(|t| t.kind), Some(TokenKind::Whitespace));
        cursor.reset_peek();
        assert_eq!(cursor.peek().map(|t| t.kind), Some(TokenKind::Whitespace));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_find_matching_counts_same_type_only() {
        let tokens = tokenize("(a[(b)])");
        let cursor = TokenCursor::new(&tokens);
        assert_eq!(cursor.find_matching(0, TokenKind::RParen), Some(7));
        assert_eq!(cursor.find_matching(2, TokenKind::RBracket), Some(6));
        let unclosed = tokenize("(a");
        assert_eq!(TokenCursor::new(&unclosed).find_matching(0, TokenKind::RParen), None);
    }

    #[test]
    fn test_jump_is_clamped() {
        let tokens = tokenize("a");
        let mut cursor = TokenCursor::new(&tokens);
        cursor.jump_to(10);
        assert!(cursor.is_at_end());
    }
}
