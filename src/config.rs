//! Converter configuration
//!
//! Read from `wdl2cwl.yaml` in the working directory, or the file given with
//! `--config`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`WDL2CWL_VALIDATOR`, `WDL2CWL_MAX_CONCURRENT`)
//! 2. Config file
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "wdl2cwl.yaml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertConfig {
    /// Directory, relative to the output directory, that receives tool documents
    pub tools_dir: String,

    /// Glob applied to file names when the input is a directory
    pub file_pattern: String,

    /// Files converted at the same time
    pub max_concurrent: usize,

    pub validator: ValidatorConfig,
}

/// External CWL validator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ValidatorConfig {
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            tools_dir: "tools".to_string(),
            file_pattern: "*.wdl".to_string(),
            max_concurrent: 8,
            validator: ValidatorConfig::default(),
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            command: "cwltool".to_string(),
            args: vec!["--validate".to_string()],
            timeout_secs: 60,
        }
    }
}

impl ValidatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ConvertConfig {
    /// Load configuration from `path`, or `./wdl2cwl.yaml` when none is given
    ///
    /// Returns defaults if the file doesn't exist.
    /// Returns error if the file exists but is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| ConvertError::Config {
            reason: format!("Failed to read {}: {}", path.display(), e),
        })?;

        let config = Self::from_yaml(&content).map_err(|e| match e {
            ConvertError::Config { reason } => ConvertError::Config {
                reason: format!("{}: {}", path.display(), reason),
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty file deserializes to unit, not a mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content).map_err(|e| ConvertError::Config {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).map_err(|e| ConvertError::Config {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        fs::write(path, content).map_err(|e| ConvertError::Config {
            reason: format!("Failed to write {}: {}", path.display(), e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(self) -> Result<Self> {
        self.merge_env(|key| std::env::var(key).ok())
    }

    fn merge_env(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = var("WDL2CWL_VALIDATOR") {
            let mut words = value.split_whitespace().map(str::to_string);
            if let Some(command) = words.next() {
                self.validator.command = command;
                let args: Vec<String> = words.collect();
                if !args.is_empty() {
                    self.validator.args = args;
                }
            }
        }

        if let Some(value) = var("WDL2CWL_MAX_CONCURRENT") {
            if !value.is_empty() {
                self.max_concurrent = value.trim().parse().map_err(|_| ConvertError::Config {
                    reason: format!("WDL2CWL_MAX_CONCURRENT must be a number, got '{}'", value),
                })?;
            }
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(ConvertError::Config {
                reason: "max_concurrent must be at least 1".to_string(),
            });
        }
        if self.tools_dir.is_empty() || Path::new(&self.tools_dir).is_absolute() {
            return Err(ConvertError::Config {
                reason: format!("tools_dir must be a relative path, got '{}'", self.tools_dir),
            });
        }
        if self.validator.command.is_empty() {
            return Err(ConvertError::Config {
                reason: "validator.command must not be empty".to_string(),
            });
        }
        self.pattern()?;
        Ok(())
    }

    /// Compiled `file_pattern`
    pub fn pattern(&self) -> Result<glob::Pattern> {
        glob::Pattern::new(&self.file_pattern).map_err(|e| ConvertError::Config {
            reason: format!("invalid file_pattern '{}': {}", self.file_pattern, e),
        })
    }
}
