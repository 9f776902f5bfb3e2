//! Configuration for retry sessions
//!
//! Read from a TOML file; every field has a default so an empty file (or no
//! file at all) gives the stock mocha + ts-node setup.

use crate::blocks::LocatorConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_STATE_FILE: &str = "testes_retry.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Where failed test names are persisted
    pub state_file: PathBuf,
    /// Runner invocations per session before giving up (at least 1)
    pub max_attempts: u32,
    /// Callee names that define a leaf test
    pub leaf_callees: Vec<String>,
    /// Inserted between the base name and the suite suffix of working copies
    pub working_copy_suffix: String,
    /// Suite-file suffixes, longest match wins; falls back to the extension
    pub suite_suffixes: Vec<String>,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Glob selecting only working copies
    pub pattern: String,
    pub timeout_ms: u64,
    /// Module the runner preloads to understand the sources (e.g. ts-node/register)
    pub loader_hint: String,
    pub program: String,
    /// `{config}`, `{pattern}` and `{timeout}` are substituted
    pub args: Vec<String>,
    /// Transient runner config written before and removed after each run
    pub config_file: PathBuf,
    /// Kill the runner process after this long; unbounded when unset
    pub process_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            max_attempts: 3,
            leaf_callees: LocatorConfig::default().leaf_callees,
            working_copy_suffix: "_temp".to_string(),
            suite_suffixes: [
                ".test.ts", ".spec.ts", ".test.tsx", ".spec.tsx", ".test.js", ".spec.js", ".test.mjs",
                ".spec.mjs",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            runner: RunnerConfig::default(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pattern: "**/*_temp.test.ts".to_string(),
            timeout_ms: 60_000,
            loader_hint: "ts-node/register".to_string(),
            program: "npx".to_string(),
            args: vec!["mocha".to_string(), "--config".to_string(), "{config}".to_string()],
            config_file: PathBuf::from(".mocharc.retry.json"),
            process_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    /// Load and validate config from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if self.working_copy_suffix.is_empty() {
            return Err(ConfigError::Invalid(
                "working_copy_suffix must not be empty, working copies would overwrite the originals"
                    .to_string(),
            ));
        }
        if self.leaf_callees.is_empty() {
            return Err(ConfigError::Invalid("leaf_callees must name at least one callee".to_string()));
        }
        Ok(())
    }

    pub fn locator(&self) -> LocatorConfig {
        LocatorConfig {
            leaf_callees: self.leaf_callees.clone(),
        }
    }
}
