//! Retry sessions
//!
//! A session turns every state entry into a working copy that only runs the
//! failed tests, hands the working copies to the runner, and repeats until
//! the runner reports no failures or the attempt budget is spent.
//!
//! ```text
//! Idle → Preparing → Running ─┬─▶ Succeeded
//!            ▲                └─▶ AttemptFailed ─┬─▶ Preparing
//!            └───────────────────────────────────┘  └─▶ Exhausted
//! ```
//!
//! The state is read once and never narrowed between attempts. Working
//! copies are left on disk for the caller to inspect or delete. An empty
//! state succeeds without running anything; a state whose entries all fail
//! to prepare is an error.

use crate::blocks::{self, LocatorConfig};
use crate::config::RetryConfig;
use crate::error::{PrepareError, SessionError};
use crate::runner::{RunnerOptions, TestRunner};
use crate::state::{FailureRecord, RetryState};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Preparing,
    Running,
    Succeeded,
    AttemptFailed,
    Exhausted,
}

/// Maps test files to working copies and back.
///
/// `test/a.test.ts` becomes `test/a_temp.test.ts`: the suite suffix is kept
/// so the runner still picks the file up, and the inserted suffix keeps it
/// out of the normal test pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopyNaming {
    suffix: String,
    suite_suffixes: Vec<String>,
}

impl WorkingCopyNaming {
    pub fn new(suffix: impl Into<String>, suite_suffixes: Vec<String>) -> Self {
        Self {
            suffix: suffix.into(),
            suite_suffixes,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.working_copy_suffix.clone(), config.suite_suffixes.clone())
    }

    /// Split a file name into base name and suite suffix
    fn split<'a>(&self, file_name: &'a str) -> (&'a str, &'a str) {
        let suite = self
            .suite_suffixes
            .iter()
            .filter(|s| file_name.len() > s.len() && file_name.ends_with(s.as_str()))
            .max_by_key(|s| s.len());

        match suite {
            Some(s) => file_name.split_at(file_name.len() - s.len()),
            None => match file_name.rfind('.') {
                Some(dot) if dot > 0 => file_name.split_at(dot),
                _ => (file_name, ""),
            },
        }
    }

    pub fn working_copy_for(&self, original: &Path) -> PathBuf {
        let file_name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (base, suite) = self.split(&file_name);
        original.with_file_name(format!("{base}{}{suite}", self.suffix))
    }

    /// The original behind `path` when `path` is named like a working copy
    pub fn original_for(&self, path: &Path) -> Option<PathBuf> {
        let file_name = path.file_name()?.to_string_lossy().into_owned();
        let (base, suite) = self.split(&file_name);
        let original = base.strip_suffix(self.suffix.as_str())?;
        if original.is_empty() {
            return None;
        }
        Some(path.with_file_name(format!("{original}{suite}")))
    }

    pub fn is_working_copy(&self, path: &Path) -> bool {
        self.original_for(path).is_some()
    }
}

/// A state entry left out of an attempt
#[derive(Debug)]
pub struct SkippedFile {
    pub test_file: PathBuf,
    pub reason: PrepareError,
}

/// How a successful session ended
#[derive(Debug)]
pub struct SessionOutcome {
    /// Runner invocations made; 0 when there was nothing to retry
    pub attempts: u32,
    pub working_copies: Vec<PathBuf>,
}

pub struct RetrySession<R> {
    config: RetryConfig,
    runner: R,
    naming: WorkingCopyNaming,
    locator: LocatorConfig,
    state: SessionState,
    attempts: u32,
    working_copies: Vec<PathBuf>,
    skipped: Vec<SkippedFile>,
}

impl<R: TestRunner> RetrySession<R> {
    pub fn new(config: RetryConfig, runner: R) -> Self {
        Self {
            naming: WorkingCopyNaming::from_config(&config),
            locator: config.locator(),
            config,
            runner,
            state: SessionState::Idle,
            attempts: 0,
            working_copies: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Working copies written so far, for inspection or cleanup
    pub fn working_copies(&self) -> &[PathBuf] {
        &self.working_copies
    }

    /// Entries skipped during the most recent preparation
    pub fn skipped(&self) -> &[SkippedFile] {
        &self.skipped
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run the session to success, exhaustion, or a fatal error.
    pub async fn run(&mut self) -> Result<SessionOutcome, SessionError> {
        let state_path = self.config.state_file.clone();
        if !tokio::fs::try_exists(&state_path).await.unwrap_or(false) {
            return Err(SessionError::MissingStateFile { path: state_path });
        }
        let retry_state = RetryState::load_or_empty(&state_path)?;

        let max_attempts = self.config.max_attempts.max(1);
        let options = RunnerOptions::from_config(&self.config.runner);

        if retry_state.is_empty() {
            tracing::warn!("Nothing to retry in {}", state_path.display());
            self.state = SessionState::Succeeded;
            return Ok(self.outcome());
        }

        loop {
            self.state = SessionState::Preparing;
            let prepared = self.prepare(&retry_state).await;
            if prepared == 0 {
                self.state = SessionState::Exhausted;
                return Err(SessionError::NothingPrepared {
                    skipped: self.skipped.len(),
                    state_file: state_path,
                });
            }

            self.state = SessionState::Running;
            self.attempts += 1;
            let report = self
                .runner
                .run(&options)
                .await
                .map_err(|source| SessionError::Runner {
                    attempt: self.attempts,
                    source,
                })?;

            if report.passed() {
                tracing::info!("All tests passed!");
                self.state = SessionState::Succeeded;
                return Ok(self.outcome());
            }

            self.state = SessionState::AttemptFailed;
            tracing::debug!("Runner output:\n{}", report.output_tail);
            if self.attempts >= max_attempts {
                self.state = SessionState::Exhausted;
                return Err(SessionError::RetriesExhausted {
                    attempts: self.attempts,
                    state_file: state_path,
                });
            }
            tracing::info!(
                "{} test(s) failed, retry attempt {} of {}",
                report.failures,
                self.attempts,
                max_attempts
            );
        }
    }

    fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            attempts: self.attempts,
            working_copies: self.working_copies.clone(),
        }
    }

    /// Materialize a working copy per state entry; returns how many were written.
    async fn prepare(&mut self, retry_state: &RetryState) -> usize {
        self.skipped.clear();
        let mut prepared = 0;

        for record in retry_state.records() {
            match self.prepare_entry(record).await {
                Ok(path) => {
                    tracing::debug!("Prepared {}", path.display());
                    if !self.working_copies.contains(&path) {
                        self.working_copies.push(path);
                    }
                    prepared += 1;
                }
                Err(reason) => {
                    tracing::warn!("Skipping {}: {reason}", record.test_file.display());
                    self.skipped.push(SkippedFile {
                        test_file: record.test_file.clone(),
                        reason,
                    });
                }
            }
        }
        prepared
    }

    async fn prepare_entry(&self, record: &FailureRecord) -> Result<PathBuf, PrepareError> {
        let original = &record.test_file;
        if self.naming.is_working_copy(original) {
            return Err(PrepareError::WorkingCopy(original.clone()));
        }

        let content = match tokio::fs::read_to_string(original).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(PrepareError::FileNotFound(original.clone()));
            }
            Err(source) => {
                return Err(PrepareError::Io {
                    path: original.clone(),
                    source,
                });
            }
        };

        let isolation = blocks::isolate(original, &content, &record.failed_names, &self.locator)?;
        tracing::debug!(
            "{}: keeping {}, neutralizing {}",
            original.display(),
            isolation.kept().count(),
            isolation.neutralized().count()
        );

        let working_copy = self.naming.working_copy_for(original);
        write_working_copy(&working_copy, &isolation.content).await?;
        Ok(working_copy)
    }
}

/// Replace whatever sits at `path` with `content`
async fn write_working_copy(path: &Path, content: &str) -> Result<(), PrepareError> {
    let io_err = |source| PrepareError::Io {
        path: path.to_path_buf(),
        source,
    };

    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed stale working copy {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(io_err(err)),
    }
    tokio::fs::write(path, content).await.map_err(io_err)
}
