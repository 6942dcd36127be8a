//! wdl2cwl - convert WDL workflows and tasks into CWL v1.2 documents

pub mod analysis;
pub mod check;
pub mod config;
pub mod error;
pub mod ir;
pub mod namespace;
pub mod orchestrator;
pub mod parser;
pub mod translate;
pub mod validator;
pub mod writer;

pub use analysis::{analyze, CallGraph, WorkflowAnalysis};
pub use config::ConvertConfig;
pub use error::{ConvertError, Diagnostic, DiagnosticKind, FixSuggestion, Location, Severity};
pub use namespace::{load, load_source, LoadedDocument, Namespace};
pub use orchestrator::{ConversionReport, ConvertRequest, Converter, UnitKind, UnitReport};
pub use validator::{ExternalValidator, ValidationStatus};
pub use writer::{write_tool, write_workflow, CwlDocument, WriterOptions};
