//! Intermediate representation
//!
//! Language-agnostic object graph built by the parser and consumed by the
//! writer. Pure data: the only behavior here is lookup and the invariants
//! the types themselves encode.

mod expr;
mod task;
mod types;
mod workflow;

use std::path::PathBuf;

pub use expr::{BinaryOp, Expr, Literal, Placeholder, PlaceholderOptions, StringPart, UnaryOp};
pub use task::{
    Command, CommandPart, CommandStyle, Declaration, Parameter, Quantity, RuntimeRequirement,
    RuntimeValue, SizeUnit, Task,
};
pub use types::WdlType;
pub use workflow::{
    CallStep, ConditionalBlock, Import, ScatterBlock, Workflow, WorkflowElement,
};

use crate::error::Diagnostic;

/// 1-based source position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// One parsed source file, before import resolution
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub version: Option<String>,
    pub imports: Vec<Import>,
    pub tasks: Vec<Task>,
    pub workflow: Option<Workflow>,
    /// Non-fatal findings (skipped constructs)
    pub warnings: Vec<Diagnostic>,
}

impl Document {
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }
}
