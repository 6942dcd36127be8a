//! External CWL validation
//!
//! Runs the configured validator (`cwltool --validate` by default) on an
//! emitted document. The process is bounded by a timeout and killed when it
//! overruns. A validator that is not installed skips validation instead of
//! failing the unit.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::config::ValidatorConfig;

/// `ERROR ...`, `Warning: ...`, `[error] ...` or `W.cwl:3:1: error ...`
static PROBLEM_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:\S+:\d+(?::\d+)?:\s*)?\[?(?:error|warning)\]?(?::|\s|$)").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationStatus {
    NotRequested,
    Passed,
    Failed { reason: String },
    Skipped { reason: String },
}

impl ValidationStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ValidationStatus::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ExternalValidator {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalValidator {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone(), config.timeout())
    }

    /// Validate one document. Blocking; run it off the async runtime.
    pub fn validate(&self, path: &Path) -> ValidationStatus {
        let spawned = Command::new(&self.command)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(validator = %self.command, "Validator not found, skipping validation");
                return ValidationStatus::Skipped {
                    reason: format!("'{}' not found", self.command),
                };
            }
            Err(e) => {
                return ValidationStatus::Failed {
                    reason: format!("failed to start '{}': {}", self.command, e),
                }
            }
        };

        // Drained while waiting so a chatty validator never blocks on a full pipe
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                // Timeout - kill the process
                let _ = child.kill();
                let _ = child.wait();
                return ValidationStatus::Failed {
                    reason: format!("'{}' timed out after {:?}", self.command, self.timeout),
                };
            }
            Err(e) => {
                let _ = child.kill();
                return ValidationStatus::Failed {
                    reason: format!("failed waiting for '{}': {}", self.command, e),
                };
            }
        };

        let mut output = String::new();
        for reader in stdout.into_iter().chain(stderr) {
            if let Ok(text) = reader.join() {
                output.push_str(&text);
            }
        }

        let problems: Vec<&str> = output
            .lines()
            .filter(|line| PROBLEM_LINE.is_match(line))
            .map(str::trim)
            .collect();
        debug!(document = %path.display(), code = ?status.code(), problems = problems.len(), "Validator finished");

        if !status.success() {
            let reason = problems
                .first()
                .map(|line| line.to_string())
                .unwrap_or_else(|| format!("'{}' exited with {}", self.command, status));
            return ValidationStatus::Failed { reason };
        }
        match problems.first() {
            Some(line) => ValidationStatus::Failed {
                reason: line.to_string(),
            },
            None => ValidationStatus::Passed,
        }
    }
}

/// Read a pipe to the end on its own thread
fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        pipe.read_to_end(&mut bytes).ok();
        String::from_utf8_lossy(&bytes).into_owned()
    })
}
