//! Tokenizer for AQL query text.
//!
//! Positions are character offsets so error messages line up with what a
//! user sees, regardless of multi-byte characters in string literals.

use std::fmt;

use crate::error::{AqlError, Result};

/// Token categories.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    /// Bare word: domain or method name.
    Ident(String),
    /// Double-quoted string with escapes resolved.
    Str(String),
    /// Integral number literal.
    Int(i64),
    /// Number literal with a fraction or exponent.
    Float(f64),
    /// `true`
    True,
    /// `false`
    False,
    /// `.`
    Dot,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `:`
    Colon,
    /// `,`
    Comma,
    /// End of input.
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(s) => write!(f, "'{s}'"),
            TokenKind::Str(s) => write!(f, "\"{s}\""),
            TokenKind::Int(v) => write!(f, "{v}"),
            TokenKind::Float(v) => write!(f, "{v}"),
            TokenKind::True => write!(f, "true"),
            TokenKind::False => write!(f, "false"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}

/// Token with the character offset where it starts.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// Category and payload.
    pub kind: TokenKind,
    /// Character offset of the first character.
    pub position: usize,
    /// Source text of the token, exactly as written.
    pub lexeme: String,
}

/// Character-level scanner.
pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    /// Creates a lexer over `input`.
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    /// Scans the whole input, ending with [`TokenKind::Eof`].
    pub fn tokenize(input: &str) -> Result<Vec<Token>> {
        let mut lexer = Self::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.position += 1;
        }
        ch
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.position += 1;
        }
    }

    /// Returns the next token.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();
        let start = self.position;
        let Some(ch) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position: start,
                lexeme: String::new(),
            });
        };
        let kind = match ch {
            '.' => self.single(TokenKind::Dot),
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '{' => self.single(TokenKind::LBrace),
            '}' => self.single(TokenKind::RBrace),
            '[' => self.single(TokenKind::LBracket),
            ']' => self.single(TokenKind::RBracket),
            ':' => self.single(TokenKind::Colon),
            ',' => self.single(TokenKind::Comma),
            '"' => TokenKind::Str(self.read_string()?),
            '-' | '0'..='9' => self.read_number()?,
            c if c.is_alphabetic() || c == '_' => {
                let word = self.read_identifier();
                match word.as_str() {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    _ => TokenKind::Ident(word),
                }
            }
            other => {
                return Err(AqlError::syntax(
                    start,
                    format!("unexpected character '{other}'"),
                ))
            }
        };
        Ok(Token {
            kind,
            position: start,
            lexeme: self.input[start..self.position].iter().collect(),
        })
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.position += 1;
        kind
    }

    fn read_identifier(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
                self.position += 1;
            } else {
                break;
            }
        }
        word
    }

    fn read_string(&mut self) -> Result<String> {
        let start = self.position;
        self.advance();
        let mut out = String::new();
        loop {
            match self.advance() {
                Some('"') => return Ok(out),
                Some('\\') => {
                    let escape_at = self.position - 1;
                    match self.advance() {
                        Some('"') => out.push('"'),
                        Some('\\') => out.push('\\'),
                        Some('/') => out.push('/'),
                        Some('b') => out.push('\u{8}'),
                        Some('f') => out.push('\u{c}'),
                        Some('n') => out.push('\n'),
                        Some('r') => out.push('\r'),
                        Some('t') => out.push('\t'),
                        Some('u') => out.push(self.read_unicode_escape(escape_at)?),
                        Some(other) => {
                            return Err(AqlError::syntax(
                                escape_at,
                                format!("invalid escape sequence '\\{other}'"),
                            ))
                        }
                        None => {
                            return Err(AqlError::syntax(start, "unterminated string literal"))
                        }
                    }
                }
                Some(ch) => out.push(ch),
                None => return Err(AqlError::syntax(start, "unterminated string literal")),
            }
        }
    }

    fn read_unicode_escape(&mut self, escape_at: usize) -> Result<char> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .advance()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| AqlError::syntax(escape_at, "invalid unicode escape"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| AqlError::syntax(escape_at, "invalid unicode escape"))
    }

    fn read_number(&mut self) -> Result<TokenKind> {
        let start = self.position;
        let mut text = String::new();
        if self.peek() == Some('-') {
            text.push('-');
            self.position += 1;
        }
        let digits_start = text.len();
        self.take_digits(&mut text);
        if text.len() == digits_start {
            return Err(AqlError::syntax(start, "expected digits in number literal"));
        }
        let mut is_float = false;
        if self.peek() == Some('.')
            && self
                .input
                .get(self.position + 1)
                .is_some_and(char::is_ascii_digit)
        {
            is_float = true;
            text.push('.');
            self.position += 1;
            self.take_digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            text.push('e');
            self.position += 1;
            if let Some(sign @ ('+' | '-')) = self.peek() {
                text.push(sign);
                self.position += 1;
            }
            let exp_start = text.len();
            self.take_digits(&mut text);
            if text.len() == exp_start {
                return Err(AqlError::syntax(start, "expected digits in exponent"));
            }
        }
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| AqlError::syntax(start, format!("invalid number '{text}'")))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| AqlError::syntax(start, format!("number '{text}' is out of range")))
        }
    }

    fn take_digits(&mut self, text: &mut String) {
        while let Some(ch) = self.peek().filter(char::is_ascii_digit) {
            text.push(ch);
            self.position += 1;
        }
    }
}
