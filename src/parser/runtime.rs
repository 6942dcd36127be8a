//! Runtime section → `RuntimeRequirement`

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ir::{
    BinaryOp, Expr, Literal, Quantity, RuntimeRequirement, RuntimeValue, SizeUnit, StringPart,
};

/// `4 GiB`, `512M`, `2.5 GB`
static SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*([A-Za-z]*)\s*$").unwrap());

/// `local-disk 100 HDD`, `/mnt 20 SSD`
static DISKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\S+\s+)?(\d+(?:\.\d+)?)(?:\s+(?:HDD|SSD|LOCAL))?\s*$").unwrap()
});

static DISK_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:\S+\s+)?$").unwrap());
static DISK_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:HDD|SSD|LOCAL)?\s*$").unwrap());

pub(super) fn requirement(entries: Vec<(String, Expr)>) -> RuntimeRequirement {
    let mut runtime = RuntimeRequirement::default();

    for (key, expr) in entries {
        match key.as_str() {
            "docker" | "container" => {
                // a container list names fallbacks; the first one is used
                let image = match expr {
                    Expr::Array(mut items) if !items.is_empty() => items.swap_remove(0),
                    other => other,
                };
                runtime.container = Some(runtime_value(image));
            }
            "cpu" => runtime.cpu = Some(runtime_value(expr)),
            "memory" => match memory(&expr) {
                Some(q) => runtime.memory = Some(q),
                None => runtime.unsupported.push((key, expr)),
            },
            "disks" | "disk" => match disk(&expr) {
                Some(q) => runtime.disk = Some(q),
                None => runtime.unsupported.push((key, expr)),
            },
            _ => runtime.ignored.push((key, expr)),
        }
    }

    runtime
}

/// `select_first([param, literal])` becomes the explicit override node
fn runtime_value(expr: Expr) -> RuntimeValue {
    if let Expr::FirstDefined(items) = &expr {
        if let [first, second] = items.as_slice() {
            if let (Some(param), Some(default)) = (first.as_ident(), second.literal_value()) {
                return RuntimeValue::Override {
                    param: param.to_string(),
                    default,
                };
            }
        }
    }
    RuntimeValue::Fixed(expr)
}

fn number(text: &str) -> Literal {
    match text.parse::<i64>() {
        Ok(i) => Literal::Int(i),
        Err(_) => Literal::Float(text.parse().unwrap_or(0.0)),
    }
}

fn fixed_amount(text: &str) -> RuntimeValue {
    RuntimeValue::Fixed(Expr::Literal(number(text)))
}

fn memory(expr: &Expr) -> Option<Quantity> {
    match expr {
        Expr::Literal(Literal::String(text)) => {
            let caps = SIZE.captures(text)?;
            Some(Quantity {
                amount: fixed_amount(&caps[1]),
                unit: SizeUnit::parse(&caps[2])?,
            })
        }
        Expr::Interpolation(parts) => {
            let (before, amount, after) = single_placeholder(parts)?;
            if !before.trim().is_empty() {
                return None;
            }
            Some(Quantity {
                amount,
                unit: SizeUnit::parse(after.trim())?,
            })
        }
        Expr::Binary {
            op: BinaryOp::Add,
            lhs,
            rhs,
        } => {
            let Expr::Literal(Literal::String(unit)) = rhs.as_ref() else {
                return None;
            };
            Some(Quantity {
                amount: runtime_value(lhs.as_ref().clone()),
                unit: SizeUnit::parse(unit.trim())?,
            })
        }
        other => sized_value(other, SizeUnit::Bytes),
    }
}

/// Disk sizes without a unit are GiB
fn disk(expr: &Expr) -> Option<Quantity> {
    match expr {
        Expr::Literal(Literal::String(text)) => {
            if let Some(caps) = DISKS.captures(text) {
                return Some(Quantity {
                    amount: fixed_amount(&caps[1]),
                    unit: SizeUnit::GiB,
                });
            }
            let caps = SIZE.captures(text)?;
            Some(Quantity {
                amount: fixed_amount(&caps[1]),
                unit: SizeUnit::parse(&caps[2])?,
            })
        }
        Expr::Interpolation(parts) => {
            let (before, amount, after) = single_placeholder(parts)?;
            if !DISK_PREFIX.is_match(&before) {
                return None;
            }
            let unit = if DISK_SUFFIX.is_match(&after) {
                SizeUnit::GiB
            } else {
                SizeUnit::parse(after.trim())?
            };
            Some(Quantity { amount, unit })
        }
        Expr::Binary { .. } => memory(expr),
        other => sized_value(other, SizeUnit::GiB),
    }
}

/// `unit` applies when the value carries none; a literal fallback must be size text
fn sized_value(expr: &Expr, unit: SizeUnit) -> Option<Quantity> {
    let amount = runtime_value(expr.clone());
    if let RuntimeValue::Override {
        default: Literal::String(text),
        ..
    } = &amount
    {
        SizeUnit::split(text)?;
    }
    Some(Quantity { amount, unit })
}

/// Text before, value of, and text after the only placeholder of a string
fn single_placeholder(parts: &[StringPart]) -> Option<(String, RuntimeValue, String)> {
    let mut before = String::new();
    let mut after = String::new();
    let mut amount = None;

    for part in parts {
        match part {
            StringPart::Text(text) if amount.is_none() => before.push_str(text),
            StringPart::Text(text) => after.push_str(text),
            StringPart::Placeholder(ph) => {
                if amount.is_some() || !ph.options.is_empty() {
                    return None;
                }
                amount = Some(runtime_value(ph.expr.clone()));
            }
        }
    }
    Some((before, amount?, after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Placeholder, PlaceholderOptions, Span};

    fn interpolation(before: &str, param: &str, after: &str) -> Expr {
        Expr::Interpolation(vec![
            StringPart::Text(before.to_string()),
            StringPart::Placeholder(Placeholder {
                expr: Expr::ident(param),
                options: PlaceholderOptions::default(),
                raw: format!("~{{{}}}", param),
                span: Span::default(),
            }),
            StringPart::Text(after.to_string()),
        ])
    }

    #[test]
    fn test_literal_memory() {
        let rt = requirement(vec![("memory".into(), Expr::string("3.5 GiB"))]);
        let mem = rt.memory.unwrap();
        assert_eq!(mem.unit, SizeUnit::GiB);
        assert_eq!(mem.amount, RuntimeValue::Fixed(Expr::Literal(Literal::Float(3.5))));
    }

    #[test]
    fn test_interpolated_memory_keeps_param() {
        let rt = requirement(vec![("memory".into(), interpolation("", "mem_gb", " GB"))]);
        let mem = rt.memory.unwrap();
        assert_eq!(mem.unit, SizeUnit::GB);
        assert_eq!(mem.amount.param(), Some("mem_gb"));
    }

    #[test]
    fn test_local_disk_forms() {
        let rt = requirement(vec![("disks".into(), Expr::string("local-disk 100 HDD"))]);
        let disk = rt.disk.unwrap();
        assert_eq!(disk.unit, SizeUnit::GiB);
        assert_eq!(disk.amount, RuntimeValue::Fixed(Expr::Literal(Literal::Int(100))));

        let rt = requirement(vec![(
            "disks".into(),
            interpolation("local-disk ", "disk_size", " SSD"),
        )]);
        assert_eq!(rt.disk.unwrap().amount.param(), Some("disk_size"));
    }

    #[test]
    fn test_unknown_keys_are_ignored_not_lost() {
        let rt = requirement(vec![
            ("maxRetries".into(), Expr::Literal(Literal::Int(2))),
            ("memory".into(), Expr::string("lots")),
        ]);
        assert_eq!(rt.ignored.len(), 1);
        assert_eq!(rt.unsupported.len(), 1);
        assert!(rt.memory.is_none());
    }

    #[test]
    fn test_container_list_uses_first() {
        let rt = requirement(vec![(
            "container".into(),
            Expr::Array(vec![Expr::string("ubuntu:22.04"), Expr::string("debian:12")]),
        )]);
        assert_eq!(
            rt.container,
            Some(RuntimeValue::Fixed(Expr::string("ubuntu:22.04")))
        );
    }

    #[test]
    fn test_memory_override_with_size_text() {
        let expr = Expr::FirstDefined(vec![Expr::ident("mem"), Expr::string("4 GiB")]);
        let rt = requirement(vec![("memory".into(), expr)]);
        let mem = rt.memory.unwrap();
        assert_eq!(mem.amount.param(), Some("mem"));
        assert_eq!(mem.resolve_mib(&Default::default()), Some(4096));

        let expr = Expr::FirstDefined(vec![Expr::ident("mem"), Expr::string("plenty")]);
        let rt = requirement(vec![("memory".into(), expr)]);
        assert!(rt.memory.is_none());
        assert_eq!(rt.unsupported.len(), 1);
    }
}
