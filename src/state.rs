//! Retry state store
//!
//! Persists which tests failed, per test file, as a JSON array:
//!
//! ```json
//! [
//!   { "testFile": "test/a.test.ts", "failedTests": ["was broken", "outer suite"] }
//! ]
//! ```
//!
//! Names only ever get added. Resetting the state means deleting the file.
//! There is no locking: one session per state file at a time.

use crate::error::StateError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Failed leaf tests of one file, plus every suite enclosing them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    #[serde(rename = "testFile")]
    pub test_file: PathBuf,
    /// Insertion ordered, no duplicates
    #[serde(rename = "failedTests")]
    pub failed_names: Vec<String>,
}

impl FailureRecord {
    fn push_unique(&mut self, name: &str) {
        if !self.failed_names.iter().any(|n| n == name) {
            self.failed_names.push(name.to_string());
        }
    }
}

/// In-memory copy of a state file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    path: PathBuf,
    records: Vec<FailureRecord>,
}

impl RetryState {
    /// Empty state that will persist to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
        }
    }

    /// Load state from `path`.
    ///
    /// A missing file is an empty state. A file that is not a valid state
    /// document is [`StateError::Corrupt`].
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::new(path)),
            Err(source) => return Err(StateError::Io { path, source }),
        };

        match serde_json::from_str::<Vec<FailureRecord>>(&content) {
            Ok(records) => Ok(Self { path, records }),
            Err(source) => Err(StateError::Corrupt { path, source }),
        }
    }

    /// Load state, falling back to an empty state when the file is corrupt.
    pub fn load_or_empty(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        match Self::load(&path) {
            Err(err @ StateError::Corrupt { .. }) => {
                tracing::warn!("Failed to parse existing retry file: {err}");
                Ok(Self::new(path))
            }
            other => other,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn record_for(&self, test_file: &Path) -> Option<&FailureRecord> {
        self.records.iter().find(|r| r.test_file == test_file)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merge a failed test into the state.
    ///
    /// `ancestors` are the enclosing suite names, outermost first. The leaf
    /// name goes in first, then each ancestor, skipping names already present.
    pub fn record_failure<S: AsRef<str>>(&mut self, test_file: &Path, leaf_name: &str, ancestors: &[S]) {
        let index = match self.records.iter().position(|r| r.test_file == test_file) {
            Some(index) => index,
            None => {
                self.records.push(FailureRecord {
                    test_file: test_file.to_path_buf(),
                    failed_names: Vec::new(),
                });
                self.records.len() - 1
            }
        };

        let record = &mut self.records[index];
        record.push_unique(leaf_name);
        for ancestor in ancestors {
            record.push_unique(ancestor.as_ref());
        }
    }

    /// Write the full state back to disk, replacing what was there.
    pub fn persist(&self) -> Result<(), StateError> {
        let content = serde_json::to_string_pretty(&self.records)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StateError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, content).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let state = RetryState::load(dir.path().join("absent.json")).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error_but_recoverable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retry.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(RetryState::load(&path), Err(StateError::Corrupt { .. })));

        let state = RetryState::load_or_empty(&path).unwrap();
        assert!(state.is_empty());
        assert_eq!(state.path(), path);
    }

    #[test]
    fn test_wrong_shape_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retry.json");
        fs::write(&path, r#"{"testFile": "a.test.ts"}"#).unwrap();
        assert!(matches!(RetryState::load(&path), Err(StateError::Corrupt { .. })));
    }

    #[test]
    fn test_new_record_lists_leaf_then_ancestors() {
        let mut state = RetryState::new("retry.json");
        state.record_failure(Path::new("a.test.ts"), "was broken", &["outer suite", "inner suite"]);

        let record = state.record_for(Path::new("a.test.ts")).unwrap();
        assert_eq!(record.failed_names, vec!["was broken", "outer suite", "inner suite"]);
    }

    #[test]
    fn test_merge_appends_only_missing_names() {
        let mut state = RetryState::new("retry.json");
        state.record_failure(Path::new("a.test.ts"), "first", &["outer"]);
        state.record_failure(Path::new("a.test.ts"), "second", &["outer", "inner"]);
        state.record_failure(Path::new("b.test.ts"), "other", &[] as &[&str]);

        assert_eq!(state.records().len(), 2);
        assert_eq!(
            state.record_for(Path::new("a.test.ts")).unwrap().failed_names,
            vec!["first", "outer", "second", "inner"]
        );
    }

    #[test]
    fn test_record_failure_is_idempotent() {
        let mut once = RetryState::new("retry.json");
        once.record_failure(Path::new("a.test.ts"), "leaf", &["suite"]);

        let mut twice = once.clone();
        twice.record_failure(Path::new("a.test.ts"), "leaf", &["suite"]);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_duplicate_ancestor_names_are_deduplicated() {
        let mut state = RetryState::new("retry.json");
        state.record_failure(Path::new("a.test.ts"), "same", &["same", "suite", "suite"]);
        assert_eq!(state.records()[0].failed_names, vec!["same", "suite"]);
    }

    #[test]
    fn test_persist_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("retry.json");

        let mut state = RetryState::new(&path);
        state.record_failure(Path::new("test/a.test.ts"), "was broken", &["outer suite"]);
        state.record_failure(Path::new("test/b.test.ts"), "also broken", &[] as &[&str]);
        state.persist().unwrap();

        assert_eq!(RetryState::load(&path).unwrap(), state);
    }

    #[test]
    fn test_on_disk_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("retry.json");
        fs::write(
            &path,
            r#"[{"testFile": "a.test", "failedTests": ["keeps passing", "outer suite"]}]"#,
        )
        .unwrap();

        let state = RetryState::load(&path).unwrap();
        let record = &state.records()[0];
        assert_eq!(record.test_file, PathBuf::from("a.test"));
        assert_eq!(record.failed_names, vec!["keeps passing", "outer suite"]);

        state.persist().unwrap();
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json[0]["testFile"], "a.test");
        assert_eq!(json[0]["failedTests"][1], "outer suite");
    }
}
