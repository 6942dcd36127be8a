use std::fmt;

use super::Span;

/// Constant value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Literal>),
}

impl Literal {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Int(i) => Some(*i as f64),
            Literal::Float(f) => Some(*f),
            Literal::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::None => f.write_str("None"),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// `sep=`, `default=`, `true=`/`false=` prefixes of an interpolation marker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceholderOptions {
    pub sep: Option<String>,
    pub default: Option<String>,
    pub true_value: Option<String>,
    pub false_value: Option<String>,
}

impl PlaceholderOptions {
    pub fn is_empty(&self) -> bool {
        self.sep.is_none()
            && self.default.is_none()
            && self.true_value.is_none()
            && self.false_value.is_none()
    }
}

/// An interpolation marker (`~{...}` or `${...}`)
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub expr: Expr,
    pub options: PlaceholderOptions,
    /// Marker exactly as written, delimiters included
    pub raw: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Text(String),
    Placeholder(Placeholder),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

/// Source value expression, stored unevaluated
///
/// The parser builds every form below; only literals, references,
/// interpolations and `FirstDefined` are translatable (plus `!`/`defined()`
/// in guards). Everything else is rejected by the translator.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Identifier or member path: `x`, `Call.out`
    Ref(Vec<String>),
    Interpolation(Vec<StringPart>),
    /// `select_first([a, b, ...])`: first value that is defined
    FirstDefined(Vec<Expr>),
    Array(Vec<Expr>),
    Apply {
        func: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    IfThenElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
}

impl Expr {
    pub fn ident(name: &str) -> Self {
        Expr::Ref(vec![name.to_string()])
    }

    pub fn string(s: &str) -> Self {
        Expr::Literal(Literal::String(s.to_string()))
    }

    /// Short name of the expression form, used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Literal(_) => "literal",
            Expr::Ref(_) => "reference",
            Expr::Interpolation(_) => "interpolation",
            Expr::FirstDefined(_) => "select_first",
            Expr::Array(_) => "array",
            Expr::Apply { .. } => "function call",
            Expr::Unary { .. } => "unary operator",
            Expr::Binary { .. } => "binary operator",
            Expr::IfThenElse { .. } => "if-then-else",
            Expr::Index { .. } => "index",
        }
    }

    /// Single-segment reference name
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ref(path) if path.len() == 1 => Some(&path[0]),
            _ => None,
        }
    }

    /// Constant value, folding arrays of constants and negated numbers
    pub fn literal_value(&self) -> Option<Literal> {
        match self {
            Expr::Literal(lit) => Some(lit.clone()),
            Expr::Array(items) => items
                .iter()
                .map(Expr::literal_value)
                .collect::<Option<Vec<_>>>()
                .map(Literal::Array),
            Expr::Unary {
                op: UnaryOp::Neg,
                expr,
            } => match expr.literal_value()? {
                Literal::Int(i) => Some(Literal::Int(-i)),
                Literal::Float(f) => Some(Literal::Float(-f)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Every reference path in evaluation order, duplicates removed
    pub fn references(&self) -> Vec<&[String]> {
        let mut refs: Vec<&[String]> = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a [String]>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ref(path) => {
                if !out.iter().any(|p| *p == path.as_slice()) {
                    out.push(path);
                }
            }
            Expr::Interpolation(parts) => {
                for part in parts {
                    if let StringPart::Placeholder(ph) = part {
                        ph.expr.collect_refs(out);
                    }
                }
            }
            Expr::FirstDefined(items) | Expr::Array(items) => {
                for item in items {
                    item.collect_refs(out);
                }
            }
            Expr::Apply { args, .. } => {
                for arg in args {
                    arg.collect_refs(out);
                }
            }
            Expr::Unary { expr, .. } => expr.collect_refs(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_refs(out);
                rhs.collect_refs(out);
            }
            Expr::IfThenElse {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_refs(out);
                then.collect_refs(out);
                otherwise.collect_refs(out);
            }
            Expr::Index { target, index } => {
                target.collect_refs(out);
                index.collect_refs(out);
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Ref(path) => f.write_str(&path.join(".")),
            Expr::Interpolation(parts) => {
                f.write_str("\"")?;
                for part in parts {
                    match part {
                        StringPart::Text(t) => f.write_str(t)?,
                        StringPart::Placeholder(ph) => f.write_str(&ph.raw)?,
                    }
                }
                f.write_str("\"")
            }
            Expr::FirstDefined(items) => {
                f.write_str("select_first([")?;
                write_list(f, items)?;
                f.write_str("])")
            }
            Expr::Array(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Apply { func, args } => {
                write!(f, "{}(", func)?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "!{}", expr),
                UnaryOp::Neg => write!(f, "-{}", expr),
            },
            Expr::Binary { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op.symbol(), rhs),
            Expr::IfThenElse {
                cond,
                then,
                otherwise,
            } => write!(f, "if {} then {} else {}", cond, then, otherwise),
            Expr::Index { target, index } => write!(f, "{}[{}]", target, index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholder(expr: Expr, raw: &str) -> StringPart {
        StringPart::Placeholder(Placeholder {
            expr,
            options: PlaceholderOptions::default(),
            raw: raw.to_string(),
            span: Span::default(),
        })
    }

    #[test]
    fn test_references_are_ordered_and_unique() {
        let expr = Expr::Interpolation(vec![
            placeholder(Expr::ident("b"), "~{b}"),
            StringPart::Text("-".to_string()),
            placeholder(Expr::ident("a"), "~{a}"),
            placeholder(Expr::ident("b"), "~{b}"),
        ]);
        let refs: Vec<String> = expr.references().iter().map(|p| p.join(".")).collect();
        assert_eq!(refs, vec!["b", "a"]);
    }

    #[test]
    fn test_literal_value_folds_arrays_and_negation() {
        let expr = Expr::Array(vec![
            Expr::Literal(Literal::Int(1)),
            Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(Expr::Literal(Literal::Int(2))),
            },
        ]);
        assert_eq!(
            expr.literal_value(),
            Some(Literal::Array(vec![Literal::Int(1), Literal::Int(-2)]))
        );
        assert_eq!(Expr::ident("x").literal_value(), None);
    }

    #[test]
    fn test_display_select_first() {
        let expr = Expr::FirstDefined(vec![Expr::ident("cpu"), Expr::Literal(Literal::Int(1))]);
        assert_eq!(expr.to_string(), "select_first([cpu, 1])");
        assert_eq!(expr.kind(), "select_first");
    }
}
