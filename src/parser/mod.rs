//! Recursive-descent parser for WDL documents
//!
//! `parse_document` turns one source file into an IR `Document`. Imports are
//! recorded, not followed; `namespace::load` resolves them.

mod document;
mod expr;
pub mod lexer;
mod runtime;

use std::path::Path;

use crate::error::{ConvertError, Location, Result};
use crate::ir::{Document, Span};

use lexer::{Lexer, Token, TokenKind};

/// Positioned failure raised while scanning or parsing
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub span: Span,
    pub reason: String,
}

impl SyntaxError {
    pub fn new(span: Span, reason: impl Into<String>) -> Self {
        Self {
            span,
            reason: reason.into(),
        }
    }

    fn into_error(self, source: &str, path: &Path) -> ConvertError {
        let snippet = source
            .lines()
            .nth(self.span.line.saturating_sub(1))
            .map(|l| l.trim().to_string())
            .unwrap_or_default();
        ConvertError::Parse {
            location: Location::new(path, self.span),
            reason: self.reason,
            snippet,
        }
    }
}

type PResult<T> = std::result::Result<T, SyntaxError>;

/// Nesting limit for expressions and blocks
const MAX_DEPTH: usize = 64;

/// Parse one WDL source file
pub fn parse_document(source: &str, path: &Path) -> Result<Document> {
    let mut parser = Parser::new(Lexer::new(source));
    let mut document = parser
        .document(path)
        .map_err(|e| e.into_error(source, path))?;
    document.path = path.to_path_buf();
    Ok(document)
}

pub(crate) struct Parser<'a> {
    lexer: Lexer<'a>,
    peeked: Option<Token>,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(lexer: Lexer<'a>) -> Self {
        Self {
            lexer,
            peeked: None,
            depth: 0,
        }
    }

    fn peek(&mut self) -> PResult<&Token> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token()?);
        }
        match &self.peeked {
            Some(token) => Ok(token),
            None => Err(SyntaxError::new(self.lexer.span(), "unexpected end of input")),
        }
    }

    fn peek_kind(&mut self) -> PResult<&TokenKind> {
        Ok(&self.peek()?.kind)
    }

    fn bump(&mut self) -> PResult<Token> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.lexer.next_token(),
        }
    }

    fn at(&mut self, kind: &TokenKind) -> PResult<bool> {
        Ok(self.peek_kind()? == kind)
    }

    fn at_keyword(&mut self, keyword: &str) -> PResult<bool> {
        Ok(matches!(self.peek_kind()?, TokenKind::Ident(name) if name == keyword))
    }

    fn eat(&mut self, kind: &TokenKind) -> PResult<bool> {
        if self.at(kind)? {
            self.bump()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect(&mut self, kind: &TokenKind) -> PResult<Token> {
        let token = self.bump()?;
        if &token.kind != kind {
            return Err(SyntaxError::new(
                token.span,
                format!("expected {}, found {}", kind.describe(), token.kind.describe()),
            ));
        }
        Ok(token)
    }

    fn expect_ident(&mut self, what: &str) -> PResult<(String, Span)> {
        let token = self.bump()?;
        match token.kind {
            TokenKind::Ident(name) => Ok((name, token.span)),
            other => Err(SyntaxError::new(
                token.span,
                format!("expected {}, found {}", what, other.describe()),
            )),
        }
    }

    /// Skip a balanced `{ ... }` region (meta sections, unknown constructs)
    fn skip_block(&mut self) -> PResult<()> {
        let open = self.expect(&TokenKind::LBrace)?;
        let mut depth = 1usize;
        while depth > 0 {
            let token = self.bump()?;
            match token.kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => depth -= 1,
                TokenKind::Eof => return Err(SyntaxError::new(open.span, "unclosed '{'")),
                _ => {}
            }
        }
        Ok(())
    }

    fn enter(&mut self, span: Span) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(SyntaxError::new(span, "nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Lexer for raw-mode reads; only valid when nothing is buffered
    fn raw_lexer(&mut self) -> PResult<&mut Lexer<'a>> {
        if let Some(token) = &self.peeked {
            return Err(SyntaxError::new(token.span, "unexpected token"));
        }
        Ok(&mut self.lexer)
    }
}
