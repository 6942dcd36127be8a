use std::path::Path;

use super::{Declaration, Expr, Parameter, Span};

/// `import "path" as alias`
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub path: String,
    pub alias: Option<String>,
    pub span: Span,
}

impl Import {
    /// Namespace the import is reachable under: alias, or the file stem
    pub fn namespace(&self) -> String {
        self.alias.clone().unwrap_or_else(|| {
            Path::new(&self.path)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| self.path.clone())
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallStep {
    /// Task or workflow name, possibly namespaced (`lib.Task`)
    pub target: String,
    pub alias: Option<String>,
    /// Input bindings in source order
    pub inputs: Vec<(String, Expr)>,
    pub span: Span,
}

impl CallStep {
    /// Name the call's outputs are referenced by
    pub fn name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self.target.rsplit('.').next().unwrap_or(&self.target),
        }
    }

    pub fn binding(&self, input: &str) -> Option<&Expr> {
        self.inputs
            .iter()
            .find(|(name, _)| name == input)
            .map(|(_, expr)| expr)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScatterBlock {
    pub variable: String,
    pub collection: Expr,
    pub body: Vec<WorkflowElement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalBlock {
    pub guard: Expr,
    pub body: Vec<WorkflowElement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowElement {
    Call(CallStep),
    Scatter(ScatterBlock),
    Conditional(ConditionalBlock),
    /// Private value, inlined where referenced
    Declaration(Declaration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub name: String,
    pub inputs: Vec<Parameter>,
    pub body: Vec<WorkflowElement>,
    pub outputs: Vec<Declaration>,
    pub imports: Vec<Import>,
    pub span: Span,
}

impl Workflow {
    pub fn input(&self, name: &str) -> Option<&Parameter> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Declaration> {
        self.outputs.iter().find(|d| d.name == name)
    }

    /// All calls, nested blocks included, in source order
    pub fn calls(&self) -> Vec<&CallStep> {
        let mut calls = Vec::new();
        collect_calls(&self.body, &mut calls);
        calls
    }
}

fn collect_calls<'a>(body: &'a [WorkflowElement], out: &mut Vec<&'a CallStep>) {
    for element in body {
        match element {
            WorkflowElement::Call(call) => out.push(call),
            WorkflowElement::Scatter(block) => collect_calls(&block.body, out),
            WorkflowElement::Conditional(block) => collect_calls(&block.body, out),
            WorkflowElement::Declaration(_) => {}
        }
    }
}
