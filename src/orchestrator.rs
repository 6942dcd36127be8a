//! Batch conversion
//!
//! A `Converter` takes a file or a directory tree, converts each source file
//! on the blocking pool (bounded by `max_concurrent`) and merges the per-unit
//! results into one `ConversionReport`. A failure in one file never stops the
//! others; within a file, a workflow fails when a task it calls failed.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::check::check_workflow;
use crate::config::ConvertConfig;
use crate::error::{ConvertError, Diagnostic, Result};
use crate::ir::{Task, Workflow};
use crate::namespace::{load, Callable, LoadedDocument, Namespace};
use crate::validator::{ExternalValidator, ValidationStatus};
use crate::writer::{referenced_callables, write_tool, write_workflow, CwlDocument, WriterOptions};

#[derive(Debug, Clone, Default)]
pub struct ConvertRequest {
    /// Source file, or directory searched recursively
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Workflow names, task names or file stems to convert; empty = all
    pub filter: Vec<String>,
    pub validate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Workflow,
    Task,
    /// A source file that could not be loaded
    File,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub unit: String,
    pub kind: UnitKind,
    pub source: PathBuf,
    pub output: Option<PathBuf>,
    pub success: bool,
    pub validation: ValidationStatus,
    pub diagnostics: Vec<Diagnostic>,
}

impl UnitReport {
    fn failed(unit: impl Into<String>, kind: UnitKind, source: &Path, errors: Vec<Diagnostic>) -> Self {
        Self {
            unit: unit.into(),
            kind,
            source: source.to_path_buf(),
            output: None,
            success: false,
            validation: ValidationStatus::NotRequested,
            diagnostics: errors,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionReport {
    pub units: Vec<UnitReport>,
    /// Scheduling stopped early; files not yet started are missing
    pub cancelled: bool,
}

impl ConversionReport {
    pub fn succeeded(&self) -> usize {
        self.units.iter().filter(|u| u.success).count()
    }

    pub fn failed(&self) -> usize {
        self.units.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && !self.cancelled
    }

    pub fn unit(&self, name: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.unit == name)
    }
}

pub struct Converter {
    config: Arc<ConvertConfig>,
    cancel: Arc<AtomicBool>,
}

impl Converter {
    pub fn new(config: ConvertConfig) -> Self {
        Self {
            config: Arc::new(config),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// Flag that stops scheduling new files once set
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub async fn convert(&self, request: ConvertRequest) -> Result<ConversionReport> {
        let files = self.collect_files(&request.input)?;
        fs::create_dir_all(&request.output_dir)
            .map_err(|e| ConvertError::io(&request.output_dir, e))?;
        info!(
            input = %request.input.display(),
            files = files.len(),
            "Starting conversion"
        );

        let request = Arc::new(request);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut join_set = JoinSet::new();
        let mut report = ConversionReport::default();
        let mut spawned: HashMap<Id, (usize, PathBuf)> = HashMap::new();

        for (index, file) in files.into_iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(remaining = %file.display(), "Conversion cancelled");
                report.cancelled = true;
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let config = Arc::clone(&self.config);
            let request = Arc::clone(&request);
            let source = file.clone();
            let handle = join_set.spawn_blocking(move || {
                let _permit = permit;
                let job = FileJob {
                    config: &config,
                    file: &file,
                    output_dir: &request.output_dir,
                    filter: &request.filter,
                    validate: request.validate,
                };
                let units = catch_unwind(AssertUnwindSafe(|| job.run())).unwrap_or_else(|_| {
                    let error = ConvertError::Write {
                        unit: file.display().to_string(),
                        reason: "internal error while converting".to_string(),
                    };
                    vec![UnitReport::failed(file_stem(&file), UnitKind::File, &file, vec![error.into()])]
                });
                (index, units)
            });
            spawned.insert(handle.id(), (index, source));
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(error = %e, "Conversion task did not complete");
                    if let Some((index, file)) = spawned.remove(&e.id()) {
                        results.push((index, vec![unfinished(&file, &e)]));
                    }
                }
            }
        }
        results.sort_by_key(|(index, _)| *index);
        report.units = results.into_iter().flat_map(|(_, units)| units).collect();

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Conversion finished"
        );
        Ok(report)
    }

    /// The input file, or every file under the input directory matching `file_pattern`
    fn collect_files(&self, input: &Path) -> Result<Vec<PathBuf>> {
        let metadata = fs::metadata(input).map_err(|e| ConvertError::io(input, e))?;
        if metadata.is_file() {
            return Ok(vec![input.to_path_buf()]);
        }

        let pattern = self.config.pattern()?;
        let mut files = Vec::new();
        for entry in WalkDir::new(input).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(input).to_path_buf();
                ConvertError::io(path, e.into())
            })?;
            if entry.file_type().is_file() && pattern.matches(&entry.file_name().to_string_lossy()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

/// Failed `file` unit for a conversion task that was cancelled or panicked
fn unfinished(file: &Path, error: &JoinError) -> UnitReport {
    let error = ConvertError::Write {
        unit: file.display().to_string(),
        reason: format!("conversion task did not complete: {}", error),
    };
    UnitReport::failed(file_stem(file), UnitKind::File, file, vec![error.into()])
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Unique suffix for temporary files written by concurrent jobs
static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Write through a temporary file so a reader never sees a partial document
fn write_document(path: &Path, yaml: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| ConvertError::io(dir, e))?;
    }
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp = path.with_extension(format!("cwl.{}.{}.tmp", std::process::id(), n));
    fs::write(&temp, yaml).map_err(|e| ConvertError::io(&temp, e))?;
    fs::rename(&temp, path).map_err(|e| {
        let _ = fs::remove_file(&temp);
        ConvertError::io(path, e)
    })
}

/// Conversion of one source file into its units
struct FileJob<'a> {
    config: &'a ConvertConfig,
    file: &'a Path,
    output_dir: &'a Path,
    filter: &'a [String],
    validate: bool,
}

/// Units of one document, in emission order
struct Plan<'a> {
    tasks: Vec<&'a Task>,
    /// Imported sub-workflows, innermost first
    subworkflows: Vec<&'a Workflow>,
    workflow: Option<&'a Workflow>,
}

impl<'a> FileJob<'a> {
    fn run(&self) -> Vec<UnitReport> {
        info!(file = %self.file.display(), "Converting");
        let loaded = match load(self.file) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(file = %self.file.display(), error = %e, "Failed to load");
                return vec![UnitReport::failed(
                    file_stem(self.file),
                    UnitKind::File,
                    self.file,
                    vec![e.into()],
                )];
            }
        };

        let plan = self.plan(&loaded);
        let mut units = self.emit(&plan, &loaded);

        if units.is_empty() {
            debug!(file = %self.file.display(), "Nothing selected");
        } else if !loaded.warnings.is_empty() {
            let first = &mut units[0];
            let mut diagnostics = loaded.warnings.clone();
            diagnostics.append(&mut first.diagnostics);
            first.diagnostics = diagnostics;
        }

        info!(
            file = %self.file.display(),
            units = units.len(),
            failed = units.iter().filter(|u| !u.success).count(),
            "Converted"
        );
        units
    }

    fn plan<'d>(&self, loaded: &'d LoadedDocument) -> Plan<'d> {
        let document = &loaded.document;
        let namespace = &loaded.namespace;
        let stem = file_stem(self.file);
        let all = self.filter.is_empty() || self.filter.iter().any(|f| *f == stem);

        let referenced: Vec<&Callable> = document
            .workflow
            .as_ref()
            .map(|wf| referenced_callables(wf, namespace))
            .unwrap_or_default();

        // A selected workflow brings everything it calls
        let mut wanted: BTreeSet<&str> = self.filter.iter().map(String::as_str).collect();
        let workflows = document.workflow.iter().chain(referenced.iter().copied().filter_map(|c| match c {
            Callable::Workflow(wf) => Some(wf),
            Callable::Task(_) => None,
        }));
        for workflow in workflows {
            if all || wanted.contains(workflow.name.as_str()) {
                wanted.insert(&workflow.name);
                for callable in referenced_callables(workflow, namespace) {
                    wanted.insert(callable.name());
                }
            }
        }
        let selected = |name: &str| all || wanted.contains(name);

        let mut seen = BTreeSet::new();
        let mut tasks = Vec::new();
        let mut subworkflows = Vec::new();
        for callable in referenced.iter().copied() {
            if !selected(callable.name()) {
                continue;
            }
            match callable {
                Callable::Task(task) => {
                    if seen.insert(task.name.as_str()) {
                        tasks.push(task);
                    }
                }
                Callable::Workflow(workflow) => subworkflows.push(workflow),
            }
        }
        for task in &document.tasks {
            if selected(&task.name) && seen.insert(task.name.as_str()) {
                tasks.push(task);
            }
        }
        subworkflows.reverse();

        Plan {
            tasks,
            subworkflows,
            workflow: document.workflow.as_ref().filter(|wf| selected(&wf.name)),
        }
    }

    fn emit(&self, plan: &Plan<'_>, loaded: &LoadedDocument) -> Vec<UnitReport> {
        let namespace = &loaded.namespace;
        let mut units = Vec::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();

        for task in &plan.tasks {
            let origin = self.origin(&task.name, loaded);
            let output = self
                .output_dir
                .join(&self.config.tools_dir)
                .join(format!("{}.cwl", task.name));
            let unit = self.emit_unit(&task.name, UnitKind::Task, &output, write_tool(task, origin));
            if !unit.success {
                failed.insert(task.name.clone());
            }
            units.push(unit);
        }

        let workflows = plan.subworkflows.iter().chain(plan.workflow.iter());
        for workflow in workflows {
            let origin = self.origin(&workflow.name, loaded);
            let unit = match self.prepare_workflow(workflow, namespace, origin, &failed) {
                Ok(()) => {
                    let output = self.output_dir.join(format!("{}.cwl", workflow.name));
                    let options = WriterOptions {
                        tools_dir: self.config.tools_dir.clone(),
                    };
                    let written = write_workflow(workflow, namespace, origin, &options);
                    self.emit_unit(&workflow.name, UnitKind::Workflow, &output, written)
                }
                Err(diagnostics) => {
                    UnitReport::failed(&workflow.name, UnitKind::Workflow, self.file, diagnostics)
                }
            };
            if !unit.success {
                failed.insert(workflow.name.clone());
            }
            units.push(unit);
        }
        units
    }

    /// Cross-reference check, then make sure every callee was written
    fn prepare_workflow(
        &self,
        workflow: &Workflow,
        namespace: &Namespace,
        origin: &Path,
        failed: &BTreeSet<String>,
    ) -> std::result::Result<(), Vec<Diagnostic>> {
        let errors = check_workflow(workflow, namespace, origin);
        if !errors.is_empty() {
            warn!(workflow = %workflow.name, errors = errors.len(), "Workflow has unresolved references");
            return Err(errors.iter().map(Diagnostic::from).collect());
        }

        let broken: Vec<String> = referenced_callables(workflow, namespace)
            .iter()
            .map(|c| c.name())
            .filter(|name| failed.contains(*name))
            .map(str::to_string)
            .collect();
        if broken.is_empty() {
            return Ok(());
        }
        let error = ConvertError::Write {
            unit: workflow.name.clone(),
            reason: format!("depends on failed unit(s): {}", broken.join(", ")),
        };
        Err(vec![error.into()])
    }

    fn emit_unit(
        &self,
        name: &str,
        kind: UnitKind,
        output: &Path,
        written: Result<CwlDocument>,
    ) -> UnitReport {
        let document = match written.and_then(|doc| write_document(output, &doc.yaml).map(|()| doc)) {
            Ok(document) => document,
            Err(e) => {
                warn!(unit = %name, error = %e, "Unit failed");
                return UnitReport::failed(name, kind, self.file, vec![e.into()]);
            }
        };
        debug!(unit = %name, output = %output.display(), "Wrote document");

        let validation = if self.validate {
            ExternalValidator::from_config(&self.config.validator).validate(output)
        } else {
            ValidationStatus::NotRequested
        };

        UnitReport {
            unit: name.to_string(),
            kind,
            source: self.file.to_path_buf(),
            output: Some(output.to_path_buf()),
            success: !validation.is_failed(),
            validation,
            diagnostics: document.warnings,
        }
    }

    /// File a definition is reported against: the converted file for its own
    /// definitions, the imported file otherwise
    fn origin<'d>(&'d self, name: &str, loaded: &'d LoadedDocument) -> &'d Path {
        let local = loaded.document.task(name).is_some()
            || loaded.document.workflow.as_ref().is_some_and(|wf| wf.name == name);
        if local {
            return self.file;
        }
        loaded.namespace.origin(name).unwrap_or(self.file)
    }
}
