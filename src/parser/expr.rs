use once_cell::sync::Lazy;
use regex::Regex;

use crate::ir::{
    BinaryOp, Expr, Literal, Placeholder, PlaceholderOptions, Span, StringPart, UnaryOp,
};

use super::lexer::{Lexer, RawMarker, RawPart, TokenKind};
use super::{PResult, Parser, SyntaxError};

/// One `name="value"` option at the head of a placeholder
static PLACEHOLDER_OPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(sep|default|true|false)\s*=\s*("(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')\s*,?"#)
        .unwrap()
});

impl<'a> Parser<'a> {
    pub(super) fn expr(&mut self) -> PResult<Expr> {
        let span = self.peek()?.span;
        self.enter(span)?;
        let result = self.if_then_else();
        self.leave();
        result
    }

    fn if_then_else(&mut self) -> PResult<Expr> {
        if !self.at_keyword("if")? {
            return self.binary(0);
        }
        self.bump()?;
        let cond = self.expr()?;
        self.expect_keyword("then")?;
        let then = self.expr()?;
        self.expect_keyword("else")?;
        let otherwise = self.expr()?;
        Ok(Expr::IfThenElse {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    pub(super) fn expect_keyword(&mut self, keyword: &str) -> PResult<()> {
        let (name, span) = self.expect_ident(&format!("'{}'", keyword))?;
        if name != keyword {
            return Err(SyntaxError::new(
                span,
                format!("expected '{}', found '{}'", keyword, name),
            ));
        }
        Ok(())
    }

    /// Precedence climbing over the binary operator table
    fn binary(&mut self, min_level: u8) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let Some((op, level)) = binary_op(self.peek_kind()?) else {
                break;
            };
            if level < min_level {
                break;
            }
            self.bump()?;
            let rhs = self.binary(level + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match self.peek_kind()? {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        let span = self.bump()?.span;
        self.enter(span)?;
        let operand = self.unary();
        self.leave();
        Ok(Expr::Unary {
            op,
            expr: Box::new(operand?),
        })
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek_kind()? {
                TokenKind::Dot => {
                    let dot = self.bump()?;
                    let (member, _) = self.expect_ident("member name")?;
                    match &mut expr {
                        Expr::Ref(path) => path.push(member),
                        _ => {
                            return Err(SyntaxError::new(
                                dot.span,
                                format!("member access '.{}' on a non-reference value", member),
                            ))
                        }
                    }
                }
                TokenKind::LBracket => {
                    self.bump()?;
                    let index = self.expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::LParen => {
                    let open = self.bump()?;
                    let Some(func) = expr.as_ident().map(str::to_string) else {
                        return Err(SyntaxError::new(open.span, "call of a non-function value"));
                    };
                    let args = self.list(&TokenKind::RParen)?;
                    expr = apply(func, args);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.bump()?;
        let expr = match token.kind {
            TokenKind::Int(i) => Expr::Literal(Literal::Int(i)),
            TokenKind::Float(x) => Expr::Literal(Literal::Float(x)),
            TokenKind::Str(parts) => self.string(parts)?,
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Expr::Literal(Literal::Boolean(true)),
                "false" => Expr::Literal(Literal::Boolean(false)),
                "None" => Expr::Literal(Literal::None),
                _ => Expr::Ref(vec![name]),
            },
            TokenKind::LBracket => Expr::Array(self.list(&TokenKind::RBracket)?),
            TokenKind::LParen => {
                let inner = self.expr()?;
                if self.at(&TokenKind::Comma)? {
                    return Err(SyntaxError::new(token.span, "pair literals are not supported"));
                }
                self.expect(&TokenKind::RParen)?;
                inner
            }
            TokenKind::LBrace => {
                return Err(SyntaxError::new(
                    token.span,
                    "map and object literals are not supported",
                ))
            }
            other => {
                return Err(SyntaxError::new(
                    token.span,
                    format!("expected an expression, found {}", other.describe()),
                ))
            }
        };
        Ok(expr)
    }

    /// Comma-separated expressions up to `close` (trailing comma allowed)
    fn list(&mut self, close: &TokenKind) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.at(close)? {
            items.push(self.expr()?);
            if !self.eat(&TokenKind::Comma)? {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn string(&mut self, parts: Vec<RawPart>) -> PResult<Expr> {
        if parts.iter().all(|p| matches!(p, RawPart::Text(_))) {
            let text: String = parts
                .into_iter()
                .map(|p| match p {
                    RawPart::Text(t) => t,
                    RawPart::Marker(m) => m.raw,
                })
                .collect();
            return Ok(Expr::Literal(Literal::String(text)));
        }

        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                RawPart::Text(t) => out.push(StringPart::Text(t)),
                RawPart::Marker(marker) => {
                    out.push(StringPart::Placeholder(self.placeholder(&marker)?))
                }
            }
        }
        Ok(Expr::Interpolation(out))
    }

    /// Parse the contents of an interpolation marker
    pub(super) fn placeholder(&mut self, marker: &RawMarker) -> PResult<Placeholder> {
        let mut options = PlaceholderOptions::default();
        let mut rest = marker.source.as_str();
        // `~{` or `${` precedes the contents
        let mut origin = advance(marker.span, "~{");

        while let Some(caps) = PLACEHOLDER_OPTION.captures(rest) {
            let value = unquote(&caps[2]);
            match &caps[1] {
                "sep" => options.sep = Some(value),
                "default" => options.default = Some(value),
                "true" => options.true_value = Some(value),
                _ => options.false_value = Some(value),
            }
            let consumed = caps.get(0).map(|m| m.end()).unwrap_or(0);
            origin = advance(origin, &rest[..consumed]);
            rest = &rest[consumed..];
        }

        if options.true_value.is_some() != options.false_value.is_some() {
            return Err(SyntaxError::new(
                marker.span,
                format!("'{}' needs both true= and false=", marker.raw),
            ));
        }

        let mut inner = Parser::new(Lexer::with_origin(rest, origin));
        inner.depth = self.depth;
        let expr = inner.expr()?;
        let trailing = inner.bump()?;
        if trailing.kind != TokenKind::Eof {
            return Err(SyntaxError::new(
                trailing.span,
                format!("unexpected {} in '{}'", trailing.kind.describe(), marker.raw),
            ));
        }

        Ok(Placeholder {
            expr,
            options,
            raw: marker.raw.clone(),
            span: marker.span,
        })
    }
}

fn binary_op(kind: &TokenKind) -> Option<(BinaryOp, u8)> {
    let entry = match kind {
        TokenKind::OrOr => (BinaryOp::Or, 1),
        TokenKind::AndAnd => (BinaryOp::And, 2),
        TokenKind::EqEq => (BinaryOp::Eq, 3),
        TokenKind::NotEq => (BinaryOp::Ne, 3),
        TokenKind::Lt => (BinaryOp::Lt, 3),
        TokenKind::Le => (BinaryOp::Le, 3),
        TokenKind::Gt => (BinaryOp::Gt, 3),
        TokenKind::Ge => (BinaryOp::Ge, 3),
        TokenKind::Plus => (BinaryOp::Add, 4),
        TokenKind::Minus => (BinaryOp::Sub, 4),
        TokenKind::Star => (BinaryOp::Mul, 5),
        TokenKind::Slash => (BinaryOp::Div, 5),
        TokenKind::Percent => (BinaryOp::Rem, 5),
        _ => return None,
    };
    Some(entry)
}

/// `select_first([a, b])` becomes `FirstDefined`; other calls stay generic
fn apply(func: String, mut args: Vec<Expr>) -> Expr {
    if func == "select_first" && matches!(args.as_slice(), [Expr::Array(_)]) {
        if let Some(Expr::Array(items)) = args.pop() {
            return Expr::FirstDefined(items);
        }
    }
    Expr::Apply { func, args }
}

fn unquote(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Position reached after reading `text` from `span`
fn advance(span: Span, text: &str) -> Span {
    text.chars().fold(span, |pos, ch| {
        if ch == '\n' {
            Span::new(pos.line + 1, 1)
        } else {
            Span::new(pos.line, pos.column + 1)
        }
    })
}
