use std::collections::BTreeMap;

use super::{Expr, Literal, Placeholder, Span, WdlType};

/// Input parameter; an optional type without default means "unset"
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: WdlType,
    pub default: Option<Expr>,
    pub span: Span,
}

impl Parameter {
    pub fn is_unset_optional(&self) -> bool {
        self.ty.is_optional() && self.default.is_none()
    }

    /// Must be supplied by the caller
    pub fn is_required(&self) -> bool {
        !self.ty.is_optional() && self.default.is_none()
    }
}

/// Bound declaration: task outputs, private task/workflow values
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub ty: WdlType,
    pub expr: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStyle {
    /// `command <<< ... >>>`, only `~{}` markers
    Heredoc,
    /// `command { ... }`, `~{}` and `${}` markers
    Braces,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandPart {
    Text(String),
    Placeholder(Placeholder),
}

/// Command body: verbatim text segments and interpolation markers
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub style: CommandStyle,
    pub parts: Vec<CommandPart>,
    pub span: Span,
}

impl Command {
    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.parts.iter().filter_map(|part| match part {
            CommandPart::Placeholder(ph) => Some(ph),
            CommandPart::Text(_) => None,
        })
    }

    /// Body as written in the source
    pub fn source_text(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                CommandPart::Text(t) => t.as_str(),
                CommandPart::Placeholder(ph) => ph.raw.as_str(),
            })
            .collect()
    }
}

/// Size unit of a memory or disk quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    Bytes,
    KB,
    MB,
    GB,
    TB,
    KiB,
    MiB,
    GiB,
    TiB,
}

impl SizeUnit {
    pub fn parse(unit: &str) -> Option<Self> {
        match unit {
            "" | "B" => Some(SizeUnit::Bytes),
            "K" | "KB" => Some(SizeUnit::KB),
            "M" | "MB" => Some(SizeUnit::MB),
            "G" | "GB" => Some(SizeUnit::GB),
            "T" | "TB" => Some(SizeUnit::TB),
            "Ki" | "KiB" => Some(SizeUnit::KiB),
            "Mi" | "MiB" => Some(SizeUnit::MiB),
            "Gi" | "GiB" => Some(SizeUnit::GiB),
            "Ti" | "TiB" => Some(SizeUnit::TiB),
            _ => None,
        }
    }

    /// Amount and unit of size text such as `4 GiB` or `512`; the unit is
    /// `None` when the text carries none
    pub fn split(text: &str) -> Option<(f64, Option<SizeUnit>)> {
        let text = text.trim();
        let at = text
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(text.len());
        let amount = text[..at].trim().parse::<f64>().ok()?;
        let unit = match text[at..].trim() {
            "" => None,
            unit => Some(SizeUnit::parse(unit)?),
        };
        Some((amount, unit))
    }

    pub fn bytes(self) -> f64 {
        match self {
            SizeUnit::Bytes => 1.0,
            SizeUnit::KB => 1e3,
            SizeUnit::MB => 1e6,
            SizeUnit::GB => 1e9,
            SizeUnit::TB => 1e12,
            SizeUnit::KiB => 1024.0,
            SizeUnit::MiB => 1024.0 * 1024.0,
            SizeUnit::GiB => 1024.0 * 1024.0 * 1024.0,
            SizeUnit::TiB => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        }
    }

    /// Multiplier from this unit to mebibytes
    pub fn mib_factor(self) -> f64 {
        self.bytes() / SizeUnit::MiB.bytes()
    }
}

/// Value of one runtime field
///
/// `Override` is the explicit two-arm node for `select_first([param, default])`:
/// the bound parameter wins, the literal default applies otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    Fixed(Expr),
    Override { param: String, default: Literal },
}

impl RuntimeValue {
    /// Evaluate against caller bindings; `None` when nothing is known
    pub fn resolve(&self, bindings: &BTreeMap<String, Literal>) -> Option<Literal> {
        match self {
            RuntimeValue::Override { param, default } => match bindings.get(param) {
                Some(Literal::None) | None => Some(default.clone()),
                Some(bound) => Some(bound.clone()),
            },
            RuntimeValue::Fixed(expr) => match expr.as_ident() {
                Some(name) => bindings.get(name).cloned(),
                None => expr.literal_value(),
            },
        }
    }

    /// Parameter this value reads, if any
    pub fn param(&self) -> Option<&str> {
        match self {
            RuntimeValue::Override { param, .. } => Some(param),
            RuntimeValue::Fixed(expr) => expr.as_ident(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub amount: RuntimeValue,
    pub unit: SizeUnit,
}

impl Quantity {
    /// Whole mebibytes, rounded up; size text such as `"8 GiB"` brings its own unit
    pub fn resolve_mib(&self, bindings: &BTreeMap<String, Literal>) -> Option<u64> {
        let (amount, unit) = match self.amount.resolve(bindings)? {
            Literal::String(text) => {
                let (amount, unit) = SizeUnit::split(&text)?;
                (amount, unit.unwrap_or(self.unit))
            }
            other => (other.as_f64()?, self.unit),
        };
        Some((amount * unit.mib_factor()).ceil() as u64)
    }
}

/// Resource and container needs of a task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeRequirement {
    pub container: Option<RuntimeValue>,
    pub cpu: Option<RuntimeValue>,
    pub memory: Option<Quantity>,
    pub disk: Option<Quantity>,
    /// Attributes with no target counterpart (preemptible, maxRetries, ...)
    pub ignored: Vec<(String, Expr)>,
    /// Supported attributes whose value could not be structured
    pub unsupported: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub name: String,
    pub inputs: Vec<Parameter>,
    /// Private declarations, inlined wherever referenced
    pub declarations: Vec<Declaration>,
    pub outputs: Vec<Declaration>,
    pub runtime: RuntimeRequirement,
    pub command: Command,
    pub span: Span,
}

impl Task {
    pub fn input(&self, name: &str) -> Option<&Parameter> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.declarations.iter().find(|d| d.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Declaration> {
        self.outputs.iter().find(|d| d.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_override() -> RuntimeValue {
        RuntimeValue::Override {
            param: "cpu".to_string(),
            default: Literal::Int(1),
        }
    }

    #[test]
    fn test_override_bound_wins() {
        let mut bindings = BTreeMap::new();
        bindings.insert("cpu".to_string(), Literal::Int(8));
        assert_eq!(cpu_override().resolve(&bindings), Some(Literal::Int(8)));
    }

    #[test]
    fn test_override_absent_uses_default() {
        assert_eq!(cpu_override().resolve(&BTreeMap::new()), Some(Literal::Int(1)));

        let mut bindings = BTreeMap::new();
        bindings.insert("cpu".to_string(), Literal::None);
        assert_eq!(cpu_override().resolve(&bindings), Some(Literal::Int(1)));
    }

    #[test]
    fn test_quantity_rounds_up_to_mib() {
        let q = Quantity {
            amount: RuntimeValue::Fixed(Expr::Literal(Literal::Float(3.75))),
            unit: SizeUnit::GiB,
        };
        assert_eq!(q.resolve_mib(&BTreeMap::new()), Some(3840));

        let q = Quantity {
            amount: RuntimeValue::Fixed(Expr::Literal(Literal::Int(1))),
            unit: SizeUnit::GB,
        };
        assert_eq!(q.resolve_mib(&BTreeMap::new()), Some(954));
    }

    #[test]
    fn test_size_text_override_resolves_with_its_unit() {
        let q = Quantity {
            amount: RuntimeValue::Override {
                param: "mem".to_string(),
                default: Literal::String("4 GiB".to_string()),
            },
            unit: SizeUnit::Bytes,
        };
        assert_eq!(q.resolve_mib(&BTreeMap::new()), Some(4096));

        let mut bindings = BTreeMap::new();
        bindings.insert("mem".to_string(), Literal::String("512 MiB".to_string()));
        assert_eq!(q.resolve_mib(&bindings), Some(512));
    }

    #[test]
    fn test_size_split() {
        assert_eq!(SizeUnit::split("4 GiB"), Some((4.0, Some(SizeUnit::GiB))));
        assert_eq!(SizeUnit::split("2.5G"), Some((2.5, Some(SizeUnit::GB))));
        assert_eq!(SizeUnit::split("100"), Some((100.0, None)));
        assert_eq!(SizeUnit::split("lots"), None);
        assert_eq!(SizeUnit::split("4 parsecs"), None);
    }

    #[test]
    fn test_size_unit_parse() {
        assert_eq!(SizeUnit::parse("G"), Some(SizeUnit::GB));
        assert_eq!(SizeUnit::parse("GiB"), Some(SizeUnit::GiB));
        assert_eq!(SizeUnit::parse("parsecs"), None);
    }
}
