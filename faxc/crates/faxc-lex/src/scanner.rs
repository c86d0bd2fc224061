//! Lazy UTF-8 tokenizer.
//!
//! Mirrors the single-pass, single-lookahead scanner the compiler expects:
//! no token buffer, no backtracking beyond one character of peek. Operates
//! on bytes (source is required to be UTF-8, but every recognized token
//! kind — punctuation, operators, digits, `"` — is pure ASCII, so byte
//! indexing never splits a multi-byte code point; identifiers and string
//! bodies pass non-ASCII bytes through untouched).

use crate::token::{Token, TokenKind};

pub struct Scanner<'src> {
    source: &'src str,
    bytes: &'src [u8],
    start: usize,
    current: usize,
    line: u32,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    /// Scan and return the next token. Returns a `TokenKind::Eof` token
    /// forever once the source is exhausted.
    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();

        if is_alpha(c) {
            return self.identifier();
        }
        if is_digit(c) {
            return self.number();
        }

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b';' => self.make_token(TokenKind::Semicolon),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b'-' => self.make_token(TokenKind::Minus),
            b'+' => self.make_token(TokenKind::Plus),
            b'/' => self.make_token(TokenKind::Slash),
            b'*' => self.make_token(TokenKind::Star),
            b'!' => {
                let kind = if self.matches(b'=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.matches(b'=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.matches(b'=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.make_token(kind)
            }
            b'>' => {
                let kind = if self.matches(b'=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.make_token(kind)
            }
            b'"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn advance(&mut self) -> u8 {
        let c = self.bytes[self.current];
        self.current += 1;
        c
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.bytes[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.bytes.len() {
            0
        } else {
            self.bytes[self.current + 1]
        }
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.bytes[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        Token::new(kind, &self.source[self.start..self.current], self.line)
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token::new(TokenKind::Error, message, self.line)
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.advance();
                }
                b'\n' => {
                    self.line += 1;
                    self.advance();
                }
                b'/' => {
                    if self.peek_next() == b'/' {
                        while self.peek() != b'\n' && !self.is_at_end() {
                            self.advance();
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }

        // The closing quote.
        self.advance();
        self.make_token(TokenKind::String)
    }

    fn number(&mut self) -> Token<'src> {
        while is_digit(self.peek()) {
            self.advance();
        }

        if self.peek() == b'.' && is_digit(self.peek_next()) {
            // Consume the '.'.
            self.advance();
            while is_digit(self.peek()) {
                self.advance();
            }
        }

        self.make_token(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha(self.peek()) || is_digit(self.peek()) {
            self.advance();
        }
        let kind = self.identifier_kind();
        self.make_token(kind)
    }

    /// Hand-coded trie keyed on the first one or two characters, matching
    /// the rest of the candidate keyword by exact-length comparison.
    fn identifier_kind(&self) -> TokenKind {
        let text = &self.source[self.start..self.current];
        let bytes = text.as_bytes();
        match bytes.first() {
            Some(b'a') => self.check_keyword(1, "nd", TokenKind::And),
            Some(b'c') => self.check_keyword(1, "lass", TokenKind::Class),
            Some(b'e') => self.check_keyword(1, "lse", TokenKind::Else),
            Some(b'f') if bytes.len() > 1 => match bytes[1] {
                b'a' => self.check_keyword(2, "lse", TokenKind::False),
                b'o' => self.check_keyword(2, "r", TokenKind::For),
                b'u' => self.check_keyword(2, "n", TokenKind::Fun),
                _ => TokenKind::Identifier,
            },
            Some(b'i') => self.check_keyword(1, "f", TokenKind::If),
            Some(b'n') => self.check_keyword(1, "il", TokenKind::Nil),
            Some(b'o') => self.check_keyword(1, "r", TokenKind::Or),
            Some(b'p') => self.check_keyword(1, "rint", TokenKind::Print),
            Some(b'r') => self.check_keyword(1, "eturn", TokenKind::Return),
            Some(b's') => self.check_keyword(1, "uper", TokenKind::Super),
            Some(b't') if bytes.len() > 1 => match bytes[1] {
                b'h' => self.check_keyword(2, "is", TokenKind::This),
                b'r' => self.check_keyword(2, "ue", TokenKind::True),
                _ => TokenKind::Identifier,
            },
            Some(b'v') => self.check_keyword(1, "ar", TokenKind::Var),
            Some(b'w') => self.check_keyword(1, "hile", TokenKind::While),
            _ => TokenKind::Identifier,
        }
    }

    fn check_keyword(&self, start: usize, rest: &str, kind: TokenKind) -> TokenKind {
        let text = &self.source[self.start..self.current];
        if text.len() == start + rest.len() && &text[start..] == rest {
            kind
        } else {
            TokenKind::Identifier
        }
    }
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(src);
        let mut out = Vec::new();
        loop {
            let tok = scanner.scan_token();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn punctuation_and_operators() {
        assert_eq!(
            kinds("(){};,.+-*/ ! != = == > >= < <="),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::Semicolon,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn all_keywords_recognized() {
        let src = "and class else false for fun if nil or print return super this true var while";
        let kinds = kinds(src);
        assert_eq!(
            kinds,
            vec![
                TokenKind::And,
                TokenKind::Class,
                TokenKind::Else,
                TokenKind::False,
                TokenKind::For,
                TokenKind::Fun,
                TokenKind::If,
                TokenKind::Nil,
                TokenKind::Or,
                TokenKind::Print,
                TokenKind::Return,
                TokenKind::Super,
                TokenKind::This,
                TokenKind::True,
                TokenKind::Var,
                TokenKind::While,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keyword_prefix_is_an_identifier() {
        assert_eq!(kinds("forest"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(kinds("thistle"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(kinds("f"), vec![TokenKind::Identifier, TokenKind::Eof]);
    }

    #[test]
    fn number_with_fraction() {
        let mut scanner = Scanner::new("123.45");
        let tok = scanner.scan_token();
        assert_eq!(tok.kind, TokenKind::Number);
        assert_eq!(tok.lexeme, "123.45");
    }

    #[test]
    fn number_without_fraction_leaves_dot_separate() {
        // No digit after '.', so the number stops before it.
        let kinds = kinds("1.");
        assert_eq!(kinds, vec![TokenKind::Number, TokenKind::Dot, TokenKind::Eof]);
    }

    #[test]
    fn string_literal() {
        let mut scanner = Scanner::new("\"hello world\"");
        let tok = scanner.scan_token();
        assert_eq!(tok.kind, TokenKind::String);
        assert_eq!(tok.lexeme, "\"hello world\"");
    }

    #[test]
    fn string_can_span_lines_and_tracks_line_number() {
        let mut scanner = Scanner::new("\"a\nb\" x");
        let s = scanner.scan_token();
        assert_eq!(s.kind, TokenKind::String);
        let x = scanner.scan_token();
        assert_eq!(x.line, 2);
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let mut scanner = Scanner::new("\"abc");
        let tok = scanner.scan_token();
        assert_eq!(tok.kind, TokenKind::Error);
        assert_eq!(tok.lexeme, "Unterminated string.");
    }

    #[test]
    fn unexpected_character_is_an_error_token() {
        let mut scanner = Scanner::new("@");
        let tok = scanner.scan_token();
        assert_eq!(tok.kind, TokenKind::Error);
    }

    #[test]
    fn line_comments_are_skipped() {
        let kinds = kinds("// comment\nvar");
        assert_eq!(kinds, vec![TokenKind::Var, TokenKind::Eof]);
    }

    #[test]
    fn bare_slash_is_not_a_comment() {
        let kinds = kinds("1 / 2");
        assert_eq!(kinds, vec![TokenKind::Number, TokenKind::Slash, TokenKind::Number, TokenKind::Eof]);
    }

    #[test]
    fn eof_is_sticky() {
        let mut scanner = Scanner::new("");
        assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
        assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
    }

    #[quickcheck_macros::quickcheck]
    fn scanning_any_utf8_input_terminates_with_a_sticky_eof(src: String) -> bool {
        let mut scanner = Scanner::new(&src);
        for _ in 0..src.len() + 1 {
            if scanner.scan_token().kind == TokenKind::Eof {
                return scanner.scan_token().kind == TokenKind::Eof;
            }
        }
        false
    }

    #[quickcheck_macros::quickcheck]
    fn scanning_the_same_input_twice_yields_the_same_tokens(src: String) -> bool {
        kinds(&src) == kinds(&src)
    }
}
