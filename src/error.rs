//! Error types with fix suggestions
//!
//! Every failure the converter can hit is a `ConvertError`. Errors are turned
//! into `Diagnostic`s at the orchestrator boundary so a caller can sort and
//! filter them by kind, severity and location.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::ir::Span;

pub type Result<T, E = ConvertError> = std::result::Result<T, E>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Where a diagnostic points: file plus 1-based line/column (0 = unknown)
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(file: impl Into<PathBuf>, span: Span) -> Self {
        Self {
            file: file.into(),
            line: span.line,
            column: span.column,
        }
    }

    /// Location covering a whole file
    pub fn file(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            line: 0,
            column: 0,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.file.display())
        } else {
            write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
        }
    }
}

#[derive(Error, Debug)]
pub enum ConvertError {
    // ─────────────────────────────────────────────────────────────
    // Source errors (WDL-010 to WDL-050)
    // ─────────────────────────────────────────────────────────────
    #[error("WDL-010: {location}: {reason}")]
    Parse {
        location: Location,
        reason: String,
        snippet: String,
    },

    #[error("WDL-020: {location}: unresolved reference '{name}' in {context}")]
    UnresolvedReference {
        location: Location,
        name: String,
        context: String,
    },

    #[error("WDL-030: {location}: '{name}' is defined in both {} and {}", .first.display(), .second.display())]
    AmbiguousDefinition {
        location: Location,
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("WDL-040: {location}: unsupported {kind} expression '{expr}' in {context}")]
    UnsupportedExpression {
        location: Location,
        kind: String,
        expr: String,
        context: String,
    },

    #[error("WDL-050: import cycle: {}", render_chain(.chain))]
    Cycle { chain: Vec<PathBuf> },

    // ─────────────────────────────────────────────────────────────
    // Output errors (WDL-060 to WDL-080)
    // ─────────────────────────────────────────────────────────────
    #[error("WDL-060: cannot write '{unit}': {reason}")]
    Write { unit: String, reason: String },

    #[error("WDL-070: {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("WDL-080: configuration error: {reason}")]
    Config { reason: String },
}

fn render_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl ConvertError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn kind(&self) -> DiagnosticKind {
        match self {
            ConvertError::Parse { .. } => DiagnosticKind::Parse,
            ConvertError::UnresolvedReference { .. } => DiagnosticKind::UnresolvedReference,
            ConvertError::AmbiguousDefinition { .. } => DiagnosticKind::AmbiguousDefinition,
            ConvertError::UnsupportedExpression { .. } => DiagnosticKind::UnsupportedExpression,
            ConvertError::Cycle { .. } => DiagnosticKind::Cycle,
            ConvertError::Write { .. } => DiagnosticKind::Write,
            ConvertError::Io { .. } => DiagnosticKind::Io,
            ConvertError::Config { .. } => DiagnosticKind::Config,
        }
    }

    pub fn location(&self) -> Location {
        match self {
            ConvertError::Parse { location, .. }
            | ConvertError::UnresolvedReference { location, .. }
            | ConvertError::AmbiguousDefinition { location, .. }
            | ConvertError::UnsupportedExpression { location, .. } => location.clone(),
            ConvertError::Cycle { chain } => chain
                .first()
                .map(Location::file)
                .unwrap_or_default(),
            ConvertError::Io { path, .. } => Location::file(path),
            ConvertError::Write { .. } | ConvertError::Config { .. } => Location::default(),
        }
    }
}

impl FixSuggestion for ConvertError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            ConvertError::Parse { .. } => {
                Some("Check braces, quoting and declaration syntax near the reported line")
            }
            ConvertError::UnresolvedReference { .. } => {
                Some("Declare the name as an input, or fix the spelling of the call/output")
            }
            ConvertError::AmbiguousDefinition { .. } => {
                Some("Rename one of the definitions; imported and local names must be unique")
            }
            ConvertError::UnsupportedExpression { .. } => {
                Some("Rewrite the value as a literal, a reference, an interpolated string or select_first")
            }
            ConvertError::Cycle { .. } => Some("Remove one of the imports that closes the cycle"),
            ConvertError::Write { .. } => Some("Fix the failing task first; dependent documents are not written"),
            ConvertError::Io { .. } => Some("Check file path and permissions"),
            ConvertError::Config { .. } => Some("Check wdl2cwl.yaml against the documented keys"),
        }
    }
}

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Parse,
    UnresolvedReference,
    AmbiguousDefinition,
    UnsupportedExpression,
    Cycle,
    Write,
    Io,
    Config,
    /// Construct skipped by the parser (warning)
    SkippedConstruct,
    /// Runtime attribute with no CWL counterpart (warning)
    IgnoredRuntime,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::Parse => "parse",
            DiagnosticKind::UnresolvedReference => "unresolved-reference",
            DiagnosticKind::AmbiguousDefinition => "ambiguous-definition",
            DiagnosticKind::UnsupportedExpression => "unsupported-expression",
            DiagnosticKind::Cycle => "cycle",
            DiagnosticKind::Write => "write",
            DiagnosticKind::Io => "io",
            DiagnosticKind::Config => "config",
            DiagnosticKind::SkippedConstruct => "skipped-construct",
            DiagnosticKind::IgnoredRuntime => "ignored-runtime",
        };
        f.write_str(name)
    }
}

/// Structured, serializable form of an error or warning
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub location: Location,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn warning(kind: DiagnosticKind, location: Location, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            location,
            message: message.into(),
            snippet: None,
            suggestion: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl From<&ConvertError> for Diagnostic {
    fn from(error: &ConvertError) -> Self {
        let snippet = match error {
            ConvertError::Parse { snippet, .. } if !snippet.is_empty() => Some(snippet.clone()),
            _ => None,
        };
        Self {
            kind: error.kind(),
            severity: Severity::Error,
            location: error.location(),
            message: error.to_string(),
            snippet,
            suggestion: error.fix_suggestion().map(str::to_string),
        }
    }
}

impl From<ConvertError> for Diagnostic {
    fn from(error: ConvertError) -> Self {
        Diagnostic::from(&error)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
