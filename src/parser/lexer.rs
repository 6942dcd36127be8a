//! Hand-written scanner producing positioned tokens
//!
//! Tokens are produced on demand so the parser can switch into raw mode for
//! command bodies, which are never tokenized: only their interpolation
//! markers are cut out.

use crate::ir::{CommandStyle, Span};

use super::SyntaxError;

type LexResult<T> = std::result::Result<T, SyntaxError>;

/// An interpolation marker cut out of a string or command body
#[derive(Debug, Clone, PartialEq)]
pub struct RawMarker {
    /// Text between the braces
    pub source: String,
    /// Marker exactly as written, delimiters included
    pub raw: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawPart {
    Text(String),
    Marker(RawMarker),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(Vec<RawPart>),
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    EqEq,
    NotEq,
    Not,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    /// `<<<`
    HeredocOpen,
    Eof,
}

impl TokenKind {
    /// Short human form used in "expected X, found Y" messages
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("'{}'", name),
            TokenKind::Int(i) => format!("number {}", i),
            TokenKind::Float(x) => format!("number {}", x),
            TokenKind::Str(_) => "string".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Colon => ":",
            TokenKind::Question => "?",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Assign => "=",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Not => "!",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::HeredocOpen => "<<<",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self::with_origin(src, Span::new(1, 1))
    }

    /// Lexer over a fragment that starts at `origin` in the enclosing file
    pub fn with_origin(src: &'a str, origin: Span) -> Self {
        Self {
            src,
            pos: 0,
            line: origin.line,
            column: origin.column,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn bump_str(&mut self, s: &str) {
        for _ in s.chars() {
            self.bump();
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.bump();
            } else if ch == '#' {
                while let Some(c) = self.peek_char() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    /// Raw text up to the end of the current line, trimmed
    pub fn rest_of_line(&mut self) -> String {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if ch == '\n' || ch == '#' {
                break;
            }
            self.bump();
        }
        self.src[start..self.pos].trim().to_string()
    }

    pub fn next_token(&mut self) -> LexResult<Token> {
        self.skip_trivia();
        let span = self.span();
        let Some(ch) = self.peek_char() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                span,
            });
        };

        let kind = match ch {
            c if c.is_ascii_alphabetic() || c == '_' => self.ident(),
            c if c.is_ascii_digit() => self.number(span)?,
            '"' | '\'' => TokenKind::Str(self.string(span)?),
            _ => self.punct(span)?,
        };
        Ok(Token { kind, span })
    }

    fn ident(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        TokenKind::Ident(self.src[start..self.pos].to_string())
    }

    fn number(&mut self, span: Span) -> LexResult<TokenKind> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() {
                self.bump();
            } else if ch == '.' && !is_float && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.bump();
            } else if (ch == 'e' || ch == 'E')
                && self
                    .peek_nth(1)
                    .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+')
            {
                is_float = true;
                self.bump();
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        let invalid = || SyntaxError::new(span, format!("invalid number '{}'", text));
        if is_float {
            text.parse().map(TokenKind::Float).map_err(|_| invalid())
        } else {
            text.parse().map(TokenKind::Int).map_err(|_| invalid())
        }
    }

    fn punct(&mut self, span: Span) -> LexResult<TokenKind> {
        if self.starts_with("<<<") {
            self.bump_str("<<<");
            return Ok(TokenKind::HeredocOpen);
        }
        let two = match self.src[self.pos..].get(..2) {
            Some("==") => Some(TokenKind::EqEq),
            Some("!=") => Some(TokenKind::NotEq),
            Some("<=") => Some(TokenKind::Le),
            Some(">=") => Some(TokenKind::Ge),
            Some("&&") => Some(TokenKind::AndAnd),
            Some("||") => Some(TokenKind::OrOr),
            _ => None,
        };
        if let Some(kind) = two {
            self.bump();
            self.bump();
            return Ok(kind);
        }

        let ch = self.bump().unwrap_or('?');
        let kind = match ch {
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            '?' => TokenKind::Question,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => TokenKind::Assign,
            '!' => TokenKind::Not,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            other => {
                return Err(SyntaxError::new(
                    span,
                    format!("unexpected character '{}'", other),
                ))
            }
        };
        Ok(kind)
    }

    /// Quoted string, split into text and interpolation markers
    fn string(&mut self, span: Span) -> LexResult<Vec<RawPart>> {
        let quote = self.bump().unwrap_or('"');
        let mut parts = Vec::new();
        let mut text = String::new();

        loop {
            let Some(ch) = self.peek_char() else {
                return Err(SyntaxError::new(span, "unterminated string"));
            };
            match ch {
                c if c == quote => {
                    self.bump();
                    break;
                }
                '\n' => return Err(SyntaxError::new(span, "unterminated string")),
                '\\' => {
                    self.bump();
                    match self.bump() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('\\') => text.push('\\'),
                        Some('"') => text.push('"'),
                        Some('\'') => text.push('\''),
                        Some('~') => text.push('~'),
                        Some('$') => text.push('$'),
                        Some(other) => {
                            text.push('\\');
                            text.push(other);
                        }
                        None => return Err(SyntaxError::new(span, "unterminated string")),
                    }
                }
                '~' | '$' if self.peek_nth(1) == Some('{') => {
                    if !text.is_empty() {
                        parts.push(RawPart::Text(std::mem::take(&mut text)));
                    }
                    parts.push(RawPart::Marker(self.marker()?));
                }
                _ => {
                    text.push(ch);
                    self.bump();
                }
            }
        }

        if !text.is_empty() || parts.is_empty() {
            parts.push(RawPart::Text(text));
        }
        Ok(parts)
    }

    /// `~{...}` or `${...}` starting at the current position
    ///
    /// The closing brace is found by counting nested braces outside quotes.
    fn marker(&mut self) -> LexResult<RawMarker> {
        let span = self.span();
        let start = self.pos;
        self.bump();
        self.bump();
        let body_start = self.pos;
        let mut depth = 1usize;
        let mut quote: Option<char> = None;

        loop {
            let Some(ch) = self.bump() else {
                return Err(SyntaxError::new(span, "unterminated interpolation marker"));
            };
            match (quote, ch) {
                (Some(_), '\\') => {
                    self.bump();
                }
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '"') | (None, '\'') => quote = Some(ch),
                (None, '{') => depth += 1,
                (None, '}') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }

        let end = self.pos;
        Ok(RawMarker {
            source: self.src[body_start..end - 1].to_string(),
            raw: self.src[start..end].to_string(),
            span,
        })
    }

    /// Command body after the `command` keyword, captured in raw mode
    pub fn command_body(&mut self) -> LexResult<(CommandStyle, Vec<RawPart>)> {
        self.skip_trivia();
        let span = self.span();
        let style = if self.starts_with("<<<") {
            self.bump_str("<<<");
            CommandStyle::Heredoc
        } else if self.starts_with("{") {
            self.bump();
            CommandStyle::Braces
        } else {
            return Err(SyntaxError::new(span, "expected '<<<' or '{' after 'command'"));
        };

        let mut parts = Vec::new();
        let mut text = String::new();
        let mut depth = 1usize;

        loop {
            if style == CommandStyle::Heredoc && self.starts_with(">>>") {
                self.bump_str(">>>");
                break;
            }
            let Some(ch) = self.peek_char() else {
                return Err(SyntaxError::new(span, "unterminated command body"));
            };
            let opens_marker = self.peek_nth(1) == Some('{')
                && (ch == '~' || (ch == '$' && style == CommandStyle::Braces));
            if opens_marker {
                if !text.is_empty() {
                    parts.push(RawPart::Text(std::mem::take(&mut text)));
                }
                parts.push(RawPart::Marker(self.marker()?));
                continue;
            }
            if style == CommandStyle::Braces {
                match ch {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            self.bump();
                            break;
                        }
                    }
                    _ => {}
                }
            }
            text.push(ch);
            self.bump();
        }

        if !text.is_empty() {
            parts.push(RawPart::Text(text));
        }
        Ok((style, parts))
    }
}
