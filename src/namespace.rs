//! Import resolution
//!
//! A `Namespace` holds every task and workflow visible to one document: its
//! own definitions plus those of the files it imports, transitively. It is
//! built fresh for each conversion and passed explicitly, so concurrent
//! conversions never share definitions.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConvertError, Diagnostic, Location, Result};
use crate::ir::{Declaration, Document, Import, Parameter, Task, Workflow};
use crate::parser::parse_document;

/// A task or workflow that a call can target
#[derive(Debug, Clone, PartialEq)]
pub enum Callable {
    Task(Task),
    Workflow(Workflow),
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Callable::Task(task) => &task.name,
            Callable::Workflow(workflow) => &workflow.name,
        }
    }

    pub fn inputs(&self) -> &[Parameter] {
        match self {
            Callable::Task(task) => &task.inputs,
            Callable::Workflow(workflow) => &workflow.inputs,
        }
    }

    /// Names of the inputs a call may bind
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs().iter().map(|p| p.name.as_str()).collect()
    }

    pub fn outputs(&self) -> &[Declaration] {
        match self {
            Callable::Task(task) => &task.outputs,
            Callable::Workflow(workflow) => &workflow.outputs,
        }
    }
}

#[derive(Debug, Clone)]
struct Definition {
    callable: Callable,
    origin: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct Namespace {
    definitions: BTreeMap<String, Definition>,
    /// `alias.Name` → `Name`
    qualified: BTreeMap<String, String>,
}

impl Namespace {
    /// Resolve a call target, plain (`Align`) or qualified (`lib.Align`)
    pub fn resolve(&self, target: &str) -> Option<&Callable> {
        let name = self
            .qualified
            .get(target)
            .map(String::as_str)
            .unwrap_or(target);
        self.definitions.get(name).map(|d| &d.callable)
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        match self.resolve(name)? {
            Callable::Task(task) => Some(task),
            Callable::Workflow(_) => None,
        }
    }

    /// File a definition came from
    pub fn origin(&self, name: &str) -> Option<&Path> {
        self.definitions.get(name).map(|d| d.origin.as_path())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn define(&mut self, callable: Callable, origin: &Path, location: Location) -> Result<()> {
        let name = callable.name().to_string();
        if let Some(existing) = self.definitions.get(&name) {
            if existing.origin == origin {
                return Ok(());
            }
            return Err(ConvertError::AmbiguousDefinition {
                location,
                name,
                first: existing.origin.clone(),
                second: origin.to_path_buf(),
            });
        }
        self.definitions.insert(
            name,
            Definition {
                callable,
                origin: origin.to_path_buf(),
            },
        );
        Ok(())
    }
}

/// A parsed document with its imports merged
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: Document,
    pub namespace: Namespace,
    /// Warnings from the document and every imported file
    pub warnings: Vec<Diagnostic>,
}

/// Read, parse and resolve imports of `path`
pub fn load(path: &Path) -> Result<LoadedDocument> {
    let source = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
    load_source(&source, path)
}

/// Parse `source` as if read from `path`, resolving imports from its directory
pub fn load_source(source: &str, path: &Path) -> Result<LoadedDocument> {
    let document = parse_document(source, path)?;
    let root = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    let mut loader = Loader {
        namespace: Namespace::default(),
        stack: vec![root.clone()],
        exports: BTreeMap::new(),
        warnings: document.warnings.clone(),
    };

    for task in &document.tasks {
        loader.namespace.define(
            Callable::Task(task.clone()),
            &root,
            Location::new(path, task.span),
        )?;
    }
    loader.resolve_imports(&document, &root)?;

    debug!(
        file = %path.display(),
        definitions = loader.namespace.len(),
        "Namespace loaded"
    );

    Ok(LoadedDocument {
        document,
        namespace: loader.namespace,
        warnings: loader.warnings,
    })
}

struct Loader {
    namespace: Namespace,
    /// Files on the active import chain
    stack: Vec<PathBuf>,
    /// Names each loaded file defines
    exports: BTreeMap<PathBuf, Vec<String>>,
    warnings: Vec<Diagnostic>,
}

impl Loader {
    fn resolve_imports(&mut self, document: &Document, file: &Path) -> Result<()> {
        let dir = file.parent().unwrap_or_else(|| Path::new("."));
        for import in &document.imports {
            let target = self.locate(import, dir, &document.path)?;

            if let Some(pos) = self.stack.iter().position(|p| *p == target) {
                let mut chain = self.stack[pos..].to_vec();
                chain.push(target);
                return Err(ConvertError::Cycle { chain });
            }

            if !self.exports.contains_key(&target) {
                self.load_import(&target, import, &document.path)?;
            }

            let namespace = import.namespace();
            let names = self.exports.get(&target).cloned().unwrap_or_default();
            for name in names {
                self.namespace
                    .qualified
                    .insert(format!("{}.{}", namespace, name), name);
            }
        }
        Ok(())
    }

    fn locate(&self, import: &Import, dir: &Path, importer: &Path) -> Result<PathBuf> {
        let location = Location::new(importer, import.span);
        if import.path.contains("://") {
            return Err(ConvertError::UnresolvedReference {
                location,
                name: import.path.clone(),
                context: "import (only relative file imports are supported)".to_string(),
            });
        }
        fs::canonicalize(dir.join(&import.path)).map_err(|_| ConvertError::UnresolvedReference {
            location,
            name: import.path.clone(),
            context: "import".to_string(),
        })
    }

    fn load_import(&mut self, target: &Path, import: &Import, importer: &Path) -> Result<()> {
        debug!(import = %target.display(), "Loading import");
        let source = fs::read_to_string(target).map_err(|e| ConvertError::io(target, e))?;
        let document = parse_document(&source, target)?;

        self.stack.push(target.to_path_buf());
        self.resolve_imports(&document, target)?;
        self.stack.pop();

        let location = Location::new(importer, import.span);
        let mut names = Vec::new();
        for task in &document.tasks {
            names.push(task.name.clone());
            self.namespace
                .define(Callable::Task(task.clone()), target, location.clone())?;
        }
        if let Some(workflow) = &document.workflow {
            names.push(workflow.name.clone());
            self.namespace
                .define(Callable::Workflow(workflow.clone()), target, location)?;
        }

        self.warnings.extend(document.warnings.iter().cloned());
        self.exports.insert(target.to_path_buf(), names);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnosticKind;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    const LIB: &str = "version 1.0\ntask Align { input { File r } command <<< bwa ~{r} >>> output { File bam = \"out.bam\" } }\n";

    #[test]
    fn test_qualified_and_plain_lookup() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "lib.wdl", LIB);
        let main = write(
            dir.path(),
            "main.wdl",
            "version 1.0\nimport \"lib.wdl\" as lib\nworkflow W { call lib.Align }\n",
        );

        let loaded = load(&main).unwrap();
        assert!(loaded.namespace.resolve("lib.Align").is_some());
        assert!(loaded.namespace.resolve("Align").is_some());
        assert!(loaded.namespace.resolve("other.Align").is_none());
    }

    #[test]
    fn test_import_cycle_detected() {
        let dir = TempDir::new().unwrap();
        let a = write(dir.path(), "a.wdl", "version 1.0\nimport \"b.wdl\"\n");
        write(dir.path(), "b.wdl", "version 1.0\nimport \"a.wdl\"\n");

        let err = load(&a).unwrap_err();
        assert_eq!(err.kind(), DiagnosticKind::Cycle);
        let ConvertError::Cycle { chain } = err else {
            unreachable!()
        };
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.first(), chain.last());
    }

    #[test]
    fn test_diamond_import_is_not_a_cycle() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "common.wdl", LIB);
        write(dir.path(), "left.wdl", "version 1.0\nimport \"common.wdl\"\n");
        write(dir.path(), "right.wdl", "version 1.0\nimport \"common.wdl\"\n");
        let main = write(
            dir.path(),
            "main.wdl",
            "version 1.0\nimport \"left.wdl\"\nimport \"right.wdl\"\n",
        );

        let loaded = load(&main).unwrap();
        assert!(loaded.namespace.task("Align").is_some());
    }

    #[test]
    fn test_local_and_imported_collision_is_ambiguous() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "lib.wdl", LIB);
        let main = write(
            dir.path(),
            "main.wdl",
            "version 1.0\nimport \"lib.wdl\"\ntask Align { command <<< true >>> }\n",
        );

        let err = load(&main).unwrap_err();
        assert_eq!(err.kind(), DiagnosticKind::AmbiguousDefinition);
        assert!(err.to_string().contains("'Align'"));
    }

    #[test]
    fn test_missing_import_is_unresolved() {
        let dir = TempDir::new().unwrap();
        let main = write(dir.path(), "main.wdl", "version 1.0\nimport \"nope.wdl\"\n");
        let err = load(&main).unwrap_err();
        assert_eq!(err.kind(), DiagnosticKind::UnresolvedReference);
        assert_eq!(err.location().line, 2);
    }
}
