//! CWL v1.2 emission
//!
//! Documents are built as `serde_yaml::Value` trees. Mappings keep insertion
//! order, so the same IR always serializes to the same bytes.

pub mod tool;
pub mod workflow;

use std::collections::BTreeSet;

use serde_yaml::{Mapping, Number, Value};

use crate::error::{ConvertError, Diagnostic, Result};
use crate::ir::{Expr, Literal, RuntimeValue, Task, WdlType, Workflow, WorkflowElement};
use crate::namespace::{Callable, Namespace};

pub use tool::write_tool;
pub use workflow::write_workflow;

pub const CWL_VERSION: &str = "v1.2";

const SHEBANG: &str = "#!/usr/bin/env cwl-runner\n\n";

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Directory, relative to the workflow file, holding tool documents
    pub tools_dir: String,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            tools_dir: "tools".to_string(),
        }
    }
}

/// One emitted CWL document
#[derive(Debug, Clone)]
pub struct CwlDocument {
    pub name: String,
    pub yaml: String,
    pub warnings: Vec<Diagnostic>,
}

pub(crate) fn string(s: impl Into<String>) -> Value {
    Value::String(s.into())
}

/// Ordered mapping from `(key, value)` pairs
pub(crate) fn mapping<I>(entries: I) -> Value
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    let mut map = Mapping::new();
    for (key, value) in entries {
        map.insert(string(key), value);
    }
    Value::Mapping(map)
}

pub(crate) fn insert(map: &mut Mapping, key: impl Into<String>, value: Value) {
    map.insert(string(key), value);
}

/// Source type → CWL type, shorthand where CWL allows it
pub fn cwl_type(ty: &WdlType) -> Value {
    match ty {
        WdlType::File => string("File"),
        WdlType::String => string("string"),
        WdlType::Int => string("int"),
        WdlType::Float => string("float"),
        WdlType::Boolean => string("boolean"),
        WdlType::Array(item) => match cwl_type(item) {
            Value::String(name) if !name.ends_with('?') && !name.ends_with(']') => {
                string(format!("{}[]", name))
            }
            items => mapping([("type", string("array")), ("items", items)]),
        },
        WdlType::Optional(inner) => match cwl_type(inner) {
            Value::String(name) if !name.ends_with('?') => string(format!("{}?", name)),
            other => Value::Sequence(vec![string("null"), other]),
        },
    }
}

pub fn cwl_literal(lit: &Literal) -> Value {
    match lit {
        Literal::None => Value::Null,
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Number(Number::from(*i)),
        Literal::Float(x) => Value::Number(Number::from(*x)),
        Literal::String(s) => string(s.clone()),
        Literal::Array(items) => Value::Sequence(items.iter().map(cwl_literal).collect()),
    }
}

/// Literal default of a File input, written as a File object
pub(crate) fn cwl_default(lit: &Literal, ty: &WdlType) -> Value {
    match (lit, ty.required()) {
        (Literal::String(path), WdlType::File) => mapping([
            ("class", string("File")),
            ("location", string(path.clone())),
        ]),
        (Literal::Array(items), WdlType::Array(item)) => {
            Value::Sequence(items.iter().map(|lit| cwl_default(lit, item)).collect())
        }
        _ => cwl_literal(lit),
    }
}

/// Render a document, shebang first
pub(crate) fn to_yaml(unit: &str, document: &Value) -> Result<String> {
    let body = serde_yaml::to_string(document).map_err(|e| ConvertError::Write {
        unit: unit.to_string(),
        reason: e.to_string(),
    })?;
    Ok(format!("{}{}", SHEBANG, body))
}

/// Input a task's container image is read from
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInput {
    pub param: String,
    /// Literal image, or the fallback of `select_first([param, image])`;
    /// becomes the input's default
    pub image: Option<String>,
}

pub fn container_param(task: &Task) -> Option<ContainerInput> {
    let existing = |name: &str| {
        task.input(name).map(|_| ContainerInput {
            param: name.to_string(),
            image: None,
        })
    };

    match task.runtime.container.as_ref()? {
        RuntimeValue::Override {
            param,
            default: Literal::String(image),
        } => task.input(param).map(|_| ContainerInput {
            param: param.clone(),
            image: Some(image.clone()),
        }),
        RuntimeValue::Override { param, .. } => existing(param),
        RuntimeValue::Fixed(Expr::Ref(path)) if path.len() == 1 => existing(&path[0]),
        RuntimeValue::Fixed(Expr::Literal(Literal::String(image))) => {
            let param = if task.input("docker").is_none() {
                "docker"
            } else {
                "docker_image"
            };
            Some(ContainerInput {
                param: param.to_string(),
                image: Some(image.clone()),
            })
        }
        RuntimeValue::Fixed(_) => None,
    }
}

/// Every task and sub-workflow reachable from `workflow`, by first reference
pub fn referenced_callables<'a>(workflow: &Workflow, namespace: &'a Namespace) -> Vec<&'a Callable> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    collect_callables(&workflow.body, namespace, &mut seen, &mut out);
    out
}

fn collect_callables<'a>(
    body: &[WorkflowElement],
    namespace: &'a Namespace,
    seen: &mut BTreeSet<String>,
    out: &mut Vec<&'a Callable>,
) {
    for element in body {
        match element {
            WorkflowElement::Call(call) => {
                let Some(callable) = namespace.resolve(&call.target) else {
                    continue;
                };
                if !seen.insert(callable.name().to_string()) {
                    continue;
                }
                out.push(callable);
                if let Callable::Workflow(inner) = callable {
                    collect_callables(&inner.body, namespace, seen, out);
                }
            }
            WorkflowElement::Scatter(block) => collect_callables(&block.body, namespace, seen, out),
            WorkflowElement::Conditional(block) => {
                collect_callables(&block.body, namespace, seen, out)
            }
            WorkflowElement::Declaration(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_table() {
        assert_eq!(cwl_type(&WdlType::File), string("File"));
        assert_eq!(cwl_type(&WdlType::array(WdlType::Int)), string("int[]"));
        assert_eq!(cwl_type(&WdlType::optional(WdlType::String)), string("string?"));
        assert_eq!(
            cwl_type(&WdlType::optional(WdlType::array(WdlType::File))),
            string("File[]?")
        );
    }

    #[test]
    fn test_nested_arrays_use_long_form() {
        let ty = WdlType::array(WdlType::array(WdlType::Float));
        let expected = mapping([("type", string("array")), ("items", string("float[]"))]);
        assert_eq!(cwl_type(&ty), expected);

        let opt = WdlType::optional(WdlType::array(WdlType::optional(WdlType::Int)));
        assert_eq!(
            cwl_type(&opt),
            Value::Sequence(vec![
                string("null"),
                mapping([("type", string("array")), ("items", string("int?"))]),
            ])
        );
    }

    #[test]
    fn test_file_default_is_file_object() {
        let value = cwl_default(&Literal::String("ref.fa".into()), &WdlType::File);
        assert_eq!(
            value,
            mapping([("class", string("File")), ("location", string("ref.fa"))])
        );
        assert_eq!(cwl_default(&Literal::Int(3), &WdlType::Int), Value::Number(Number::from(3i64)));
    }

    #[test]
    fn test_yaml_has_shebang() {
        let yaml = to_yaml("t", &mapping([("cwlVersion", string(CWL_VERSION))])).unwrap();
        assert!(yaml.starts_with("#!/usr/bin/env cwl-runner\n\ncwlVersion: v1.2"));
    }
}
