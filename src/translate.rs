//! Expression translation into CWL parameter references and JavaScript
//!
//! Only a closed set of expression kinds is accepted: literals, references,
//! string interpolation and `select_first`; guards may also use `!` and
//! `defined()`. Anything else is an `UnsupportedExpression`, never a guess.
//!
//! How a name is reachable depends on where the expression lands (`inputs.x`
//! in a tool, `self[0]` in a step `valueFrom`, an inlined declaration), so the
//! caller supplies that knowledge through a [`RefResolver`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ConvertError, Location, Result};
use crate::ir::{
    CommandPart, Expr, Literal, Placeholder, PlaceholderOptions, StringPart, UnaryOp, WdlType,
};

/// Deepest chain of inlined declarations and nested forms
const MAX_DEPTH: usize = 32;

/// CWL parameter reference: usable without InlineJavascriptRequirement
static PARAM_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(inputs|self|runtime)(\.[A-Za-z_]\w*|\[\d+\])*$").unwrap());

/// How a reference path is reachable in the current CWL context
#[derive(Debug, Clone, PartialEq)]
pub enum Binding<'a> {
    /// Directly addressable value
    Value { js: String, ty: WdlType },
    /// Nullable value whose source default could not be written as a literal
    Fallback {
        js: String,
        default: &'a Expr,
        ty: WdlType,
    },
    /// Private declaration, translated in place
    Inline(&'a Expr),
}

pub trait RefResolver {
    fn resolve(&self, path: &[String]) -> Option<Binding<'_>>;
}

/// A JavaScript expression and its source type, when known
#[derive(Debug, Clone, PartialEq)]
pub struct Js {
    pub code: String,
    pub ty: Option<WdlType>,
}

/// Text for a CWL string field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rendered {
    pub text: String,
    /// Whether InlineJavascriptRequirement is needed
    pub needs_js: bool,
}

pub fn is_param_ref(code: &str) -> bool {
    PARAM_REF.is_match(code)
}

/// JSON string literal, valid JavaScript
pub fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

pub fn js_literal(lit: &Literal) -> String {
    match lit {
        Literal::None => "null".to_string(),
        Literal::Boolean(b) => b.to_string(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(x) => format!("{:?}", x),
        Literal::String(s) => js_string(s),
        Literal::Array(items) => {
            let items: Vec<String> = items.iter().map(js_literal).collect();
            format!("[{}]", items.join(", "))
        }
    }
}

fn literal_type(lit: &Literal) -> Option<WdlType> {
    match lit {
        Literal::Boolean(_) => Some(WdlType::Boolean),
        Literal::Int(_) => Some(WdlType::Int),
        Literal::Float(_) => Some(WdlType::Float),
        Literal::String(_) => Some(WdlType::String),
        Literal::None | Literal::Array(_) => None,
    }
}

/// Escape CWL interpolation syntax in literal text
fn escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace("$(", "\\$(")
        .replace("${", "\\${")
}

enum Piece {
    Text(String),
    Expr(String),
}

/// Accumulates a CWL string; literal text is escaped only when the final
/// string will be interpolated
#[derive(Default)]
struct TemplateBuilder {
    pieces: Vec<Piece>,
    needs_js: bool,
}

impl TemplateBuilder {
    fn text(&mut self, text: &str) {
        self.pieces.push(Piece::Text(text.to_string()));
    }

    fn expr(&mut self, code: String, needs_js: bool) {
        self.pieces.push(Piece::Expr(format!("$({})", code)));
        self.needs_js |= needs_js;
    }

    fn finish(self) -> Rendered {
        let interpolated = self.pieces.iter().any(|p| match p {
            Piece::Expr(_) => true,
            Piece::Text(t) => t.contains("$(") || t.contains("${"),
        });
        let text = self
            .pieces
            .into_iter()
            .map(|p| match p {
                Piece::Text(t) if interpolated => escape(&t),
                Piece::Text(t) | Piece::Expr(t) => t,
            })
            .collect();
        Rendered {
            text,
            needs_js: self.needs_js,
        }
    }
}

pub struct ExprTranslator<'r> {
    resolver: &'r dyn RefResolver,
    location: Location,
    context: String,
}

impl<'r> ExprTranslator<'r> {
    pub fn new(resolver: &'r dyn RefResolver, location: Location, context: impl Into<String>) -> Self {
        Self {
            resolver,
            location,
            context: context.into(),
        }
    }

    fn unsupported(&self, expr: &Expr) -> ConvertError {
        ConvertError::UnsupportedExpression {
            location: self.location.clone(),
            kind: expr.kind().to_string(),
            expr: expr.to_string(),
            context: self.context.clone(),
        }
    }

    pub fn js(&self, expr: &Expr) -> Result<Js> {
        self.js_at(expr, 0, false)
    }

    /// Whole-value field: `$(...)`
    pub fn value(&self, expr: &Expr) -> Result<Rendered> {
        let js = self.js(expr)?;
        Ok(wrap_value(js.code))
    }

    /// Boolean guard for `when:`; also accepts `!` and `defined()`
    pub fn guard(&self, expr: &Expr) -> Result<Rendered> {
        let js = self.js_at(expr, 0, true)?;
        Ok(wrap_value(js.code))
    }

    /// String field with embedded references
    pub fn template(&self, expr: &Expr) -> Result<Rendered> {
        let mut builder = TemplateBuilder::default();
        self.template_into(expr, &mut builder, 0)?;
        Ok(builder.finish())
    }

    /// Command body: text kept verbatim, markers substituted
    pub fn command(&self, parts: &[CommandPart]) -> Result<Rendered> {
        let mut builder = TemplateBuilder::default();
        for part in parts {
            match part {
                CommandPart::Text(text) => builder.text(text),
                CommandPart::Placeholder(ph) => self.placeholder_into(ph, &mut builder, 0)?,
            }
        }
        Ok(builder.finish())
    }

    fn template_into(&self, expr: &Expr, builder: &mut TemplateBuilder, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(self.unsupported(expr));
        }
        match expr {
            Expr::Literal(Literal::String(s)) => builder.text(s),
            Expr::Literal(lit @ (Literal::Int(_) | Literal::Float(_) | Literal::Boolean(_))) => {
                builder.text(&js_literal(lit))
            }
            Expr::Interpolation(parts) => {
                for part in parts {
                    match part {
                        StringPart::Text(text) => builder.text(text),
                        StringPart::Placeholder(ph) => self.placeholder_into(ph, builder, depth)?,
                    }
                }
            }
            Expr::Ref(path) => {
                if let Some(Binding::Inline(inner)) = self.resolver.resolve(path) {
                    return self.template_into(inner, builder, depth + 1);
                }
                self.value_into(expr, &PlaceholderOptions::default(), builder, depth)?;
            }
            Expr::FirstDefined(_) => {
                self.value_into(expr, &PlaceholderOptions::default(), builder, depth)?;
            }
            other => return Err(self.unsupported(other)),
        }
        Ok(())
    }

    fn placeholder_into(&self, ph: &Placeholder, builder: &mut TemplateBuilder, depth: usize) -> Result<()> {
        if ph.options.is_empty() {
            if let Expr::Ref(path) = &ph.expr {
                if let Some(Binding::Inline(inner)) = self.resolver.resolve(path) {
                    return self.template_into(inner, builder, depth + 1);
                }
            }
        }
        self.value_into(&ph.expr, &ph.options, builder, depth)
    }

    /// A value rendered as text; plain parameter references stay expression-free
    fn value_into(
        &self,
        expr: &Expr,
        options: &PlaceholderOptions,
        builder: &mut TemplateBuilder,
        depth: usize,
    ) -> Result<()> {
        let base = self.js_at(expr, depth, false)?;
        let optional = base.ty.as_ref().is_some_and(WdlType::is_optional);
        if options.is_empty() && !optional && is_param_ref(&base.code) {
            let is_file = base.ty.as_ref().is_some_and(WdlType::is_file);
            let code = if is_file {
                format!("{}.path", base.code)
            } else {
                base.code
            };
            builder.expr(code, false);
            return Ok(());
        }
        builder.expr(render_string(base, options), true);
        Ok(())
    }

    fn js_at(&self, expr: &Expr, depth: usize, guard: bool) -> Result<Js> {
        if depth > MAX_DEPTH {
            return Err(self.unsupported(expr));
        }
        let js = match expr {
            Expr::Literal(lit) => Js {
                code: js_literal(lit),
                ty: literal_type(lit),
            },
            Expr::Ref(path) => self.reference(path, depth, guard)?,
            Expr::Interpolation(parts) => {
                let mut pieces = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        StringPart::Text(text) => pieces.push(js_string(text)),
                        StringPart::Placeholder(ph) => {
                            let base = self.js_at(&ph.expr, depth + 1, false)?;
                            pieces.push(render_string(base, &ph.options));
                        }
                    }
                }
                let code = match pieces.len() {
                    0 => js_string(""),
                    1 => pieces.remove(0),
                    _ => format!("({})", pieces.join(" + ")),
                };
                Js {
                    code,
                    ty: Some(WdlType::String),
                }
            }
            Expr::FirstDefined(items) => {
                let Some((last, rest)) = items.split_last() else {
                    return Err(self.unsupported(expr));
                };
                let mut acc = self.js_at(last, depth + 1, guard)?;
                for item in rest.iter().rev() {
                    let head = self.js_at(item, depth + 1, guard)?;
                    acc = Js {
                        code: format!("({0} != null ? {0} : {1})", head.code, acc.code),
                        ty: head.ty.map(|t| t.required().clone()).or(acc.ty),
                    };
                }
                acc
            }
            Expr::Unary {
                op: UnaryOp::Not,
                expr: inner,
            } if guard => {
                let inner = self.js_at(inner, depth + 1, guard)?;
                Js {
                    code: format!("(!{})", inner.code),
                    ty: Some(WdlType::Boolean),
                }
            }
            Expr::Apply { func, args } if guard && func == "defined" && args.len() == 1 => {
                let inner = self.js_at(&args[0], depth + 1, guard)?;
                Js {
                    code: format!("({} != null)", inner.code),
                    ty: Some(WdlType::Boolean),
                }
            }
            other => return Err(self.unsupported(other)),
        };
        Ok(js)
    }

    fn reference(&self, path: &[String], depth: usize, guard: bool) -> Result<Js> {
        let binding = self
            .resolver
            .resolve(path)
            .ok_or_else(|| ConvertError::UnresolvedReference {
                location: self.location.clone(),
                name: path.join("."),
                context: self.context.clone(),
            })?;

        let js = match binding {
            Binding::Value { js, ty } => Js { code: js, ty: Some(ty) },
            Binding::Fallback { js, default, ty } => {
                let default = self.js_at(default, depth + 1, guard)?;
                Js {
                    code: format!("({0} != null ? {0} : {1})", js, default.code),
                    ty: Some(ty.required().clone()),
                }
            }
            Binding::Inline(inner) => self.js_at(inner, depth + 1, guard)?,
        };
        Ok(js)
    }
}

fn wrap_value(code: String) -> Rendered {
    let needs_js = !is_param_ref(&code);
    Rendered {
        text: format!("$({})", code),
        needs_js,
    }
}

/// String form of a placeholder value with its options applied
fn render_string(base: Js, options: &PlaceholderOptions) -> String {
    let ty = base.ty.unwrap_or(WdlType::String);
    let value = &base.code;

    let shown = if let Some(sep) = &options.sep {
        let items = if ty.item().is_some_and(WdlType::is_file) {
            format!("{}.map(function(f) {{ return f.path; }})", value)
        } else {
            value.clone()
        };
        format!("{}.join({})", items, js_string(sep))
    } else if let (Some(t), Some(f)) = (&options.true_value, &options.false_value) {
        format!("({} ? {} : {})", value, js_string(t), js_string(f))
    } else if ty.is_file() {
        format!("{}.path", value)
    } else {
        value.clone()
    };

    match &options.default {
        Some(default) => format!("({} != null ? {} : {})", value, shown, js_string(default)),
        None if ty.is_optional() => format!("({} != null ? {} : \"\")", value, shown),
        None => shown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Span;
    use std::collections::BTreeMap;

    /// Resolves every single name to `inputs.<name>` with a fixed type table
    struct Inputs {
        types: BTreeMap<String, WdlType>,
        inline: BTreeMap<String, Expr>,
        fallback: BTreeMap<String, Expr>,
    }

    impl Inputs {
        fn new(types: &[(&str, WdlType)]) -> Self {
            Self {
                types: types.iter().map(|(n, t)| (n.to_string(), t.clone())).collect(),
                inline: BTreeMap::new(),
                fallback: BTreeMap::new(),
            }
        }
    }

    impl RefResolver for Inputs {
        fn resolve(&self, path: &[String]) -> Option<Binding<'_>> {
            let [name] = path else { return None };
            if let Some(expr) = self.inline.get(name) {
                return Some(Binding::Inline(expr));
            }
            let ty = self.types.get(name)?.clone();
            let js = format!("inputs.{}", name);
            match self.fallback.get(name) {
                Some(default) => Some(Binding::Fallback { js, default, ty }),
                None => Some(Binding::Value { js, ty }),
            }
        }
    }

    fn translator(inputs: &Inputs) -> ExprTranslator<'_> {
        ExprTranslator::new(inputs, Location::new("t.wdl", Span::new(1, 1)), "test")
    }

    fn placeholder(expr: Expr, options: PlaceholderOptions) -> Placeholder {
        Placeholder {
            expr,
            options,
            raw: "~{..}".to_string(),
            span: Span::default(),
        }
    }

    #[test]
    fn test_plain_reference_needs_no_js() {
        let inputs = Inputs::new(&[("name", WdlType::String), ("reads", WdlType::File)]);
        let cmd = vec![
            CommandPart::Text("echo ".into()),
            CommandPart::Placeholder(placeholder(Expr::ident("name"), PlaceholderOptions::default())),
            CommandPart::Text(" < ".into()),
            CommandPart::Placeholder(placeholder(Expr::ident("reads"), PlaceholderOptions::default())),
        ];
        let rendered = translator(&inputs).command(&cmd).unwrap();
        assert_eq!(rendered.text, "echo $(inputs.name) < $(inputs.reads.path)");
        assert!(!rendered.needs_js);
    }

    #[test]
    fn test_shell_syntax_escaped_only_when_interpolated() {
        let inputs = Inputs::new(&[("n", WdlType::Int)]);
        let plain = translator(&inputs)
            .command(&[CommandPart::Text("echo ${HOME} \\n".into())])
            .unwrap();
        assert_eq!(plain.text, "echo \\${HOME} \\\\n");

        let untouched = translator(&inputs)
            .command(&[CommandPart::Text("echo $HOME \\n".into())])
            .unwrap();
        assert_eq!(untouched.text, "echo $HOME \\n");

        let mixed = translator(&inputs)
            .command(&[
                CommandPart::Text("for i in $(seq ".into()),
                CommandPart::Placeholder(placeholder(Expr::ident("n"), PlaceholderOptions::default())),
                CommandPart::Text("); do :; done".into()),
            ])
            .unwrap();
        assert_eq!(mixed.text, "for i in \\$(seq $(inputs.n)); do :; done");
    }

    #[test]
    fn test_optional_renders_empty_when_unset() {
        let inputs = Inputs::new(&[("tag", WdlType::optional(WdlType::String))]);
        let rendered = translator(&inputs)
            .template(&Expr::Interpolation(vec![
                StringPart::Text("-t ".into()),
                StringPart::Placeholder(placeholder(Expr::ident("tag"), PlaceholderOptions::default())),
            ]))
            .unwrap();
        assert_eq!(rendered.text, "-t $((inputs.tag != null ? inputs.tag : \"\"))");
        assert!(rendered.needs_js);
    }

    #[test]
    fn test_placeholder_options() {
        let inputs = Inputs::new(&[
            ("files", WdlType::array(WdlType::File)),
            ("fast", WdlType::Boolean),
            ("label", WdlType::optional(WdlType::String)),
        ]);
        let t = translator(&inputs);

        let sep = PlaceholderOptions {
            sep: Some(",".into()),
            ..Default::default()
        };
        let js = render_string(t.js(&Expr::ident("files")).unwrap(), &sep);
        assert_eq!(js, "inputs.files.map(function(f) { return f.path; }).join(\",\")");

        let flag = PlaceholderOptions {
            true_value: Some("--fast".into()),
            false_value: Some("".into()),
            ..Default::default()
        };
        let js = render_string(t.js(&Expr::ident("fast")).unwrap(), &flag);
        assert_eq!(js, "(inputs.fast ? \"--fast\" : \"\")");

        let default = PlaceholderOptions {
            default: Some("none".into()),
            ..Default::default()
        };
        let js = render_string(t.js(&Expr::ident("label")).unwrap(), &default);
        assert_eq!(js, "(inputs.label != null ? inputs.label : \"none\")");
    }

    #[test]
    fn test_first_defined_fallback() {
        let inputs = Inputs::new(&[("cpu", WdlType::optional(WdlType::Int))]);
        let expr = Expr::FirstDefined(vec![Expr::ident("cpu"), Expr::Literal(Literal::Int(1))]);
        let rendered = translator(&inputs).value(&expr).unwrap();
        assert_eq!(rendered.text, "$((inputs.cpu != null ? inputs.cpu : 1))");
        assert!(rendered.needs_js);
    }

    #[test]
    fn test_inline_declaration_and_fallback_default() {
        let mut inputs = Inputs::new(&[("sample", WdlType::String), ("prefix", WdlType::optional(WdlType::String))]);
        inputs.inline.insert(
            "out_name".into(),
            Expr::Interpolation(vec![
                StringPart::Placeholder(placeholder(Expr::ident("sample"), PlaceholderOptions::default())),
                StringPart::Text(".txt".into()),
            ]),
        );
        inputs.fallback.insert("prefix".into(), Expr::ident("sample"));
        let t = translator(&inputs);

        let rendered = t.template(&Expr::ident("out_name")).unwrap();
        assert_eq!(rendered.text, "$(inputs.sample).txt");
        assert!(!rendered.needs_js);

        let js = t.js(&Expr::ident("prefix")).unwrap();
        assert_eq!(js.code, "(inputs.prefix != null ? inputs.prefix : inputs.sample)");
        assert_eq!(js.ty, Some(WdlType::String));
    }

    #[test]
    fn test_unsupported_kinds_are_named() {
        let inputs = Inputs::new(&[("x", WdlType::Int)]);
        let expr = Expr::Apply {
            func: "length".into(),
            args: vec![Expr::ident("x")],
        };
        let err = translator(&inputs).value(&expr).unwrap_err();
        match err {
            ConvertError::UnsupportedExpression { kind, expr, .. } => {
                assert_eq!(kind, "function call");
                assert_eq!(expr, "length(x)");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_guard_forms() {
        let inputs = Inputs::new(&[("x", WdlType::optional(WdlType::File)), ("flag", WdlType::Boolean)]);
        let t = translator(&inputs);
        let guard = Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(Expr::Apply {
                func: "defined".into(),
                args: vec![Expr::ident("x")],
            }),
        };
        assert_eq!(t.guard(&guard).unwrap().text, "$((!(inputs.x != null)))");

        let plain = t.guard(&Expr::ident("flag")).unwrap();
        assert_eq!(plain.text, "$(inputs.flag)");
        assert!(!plain.needs_js);

        assert!(t.value(&guard).is_err());
    }

    #[test]
    fn test_unknown_reference() {
        let inputs = Inputs::new(&[]);
        let err = translator(&inputs).js(&Expr::ident("ghost")).unwrap_err();
        assert!(err.to_string().contains("'ghost'"));
    }

    #[test]
    fn test_self_referencing_declaration_is_bounded() {
        let mut inputs = Inputs::new(&[]);
        inputs.inline.insert("a".into(), Expr::ident("a"));
        let err = translator(&inputs).js(&Expr::ident("a")).unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedExpression { .. }));
    }
}
