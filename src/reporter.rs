//! Records failing tests while a normal test run is in progress
//!
//! A host test runner registers one [`FailureReporter`] into its per-test
//! start/end hooks. Every failed test is merged into the retry state and the
//! state is written back immediately, so a crash later in the run keeps what
//! was already recorded.

use crate::session::WorkingCopyNaming;
use crate::state::RetryState;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Passed,
    Failed,
    Pending,
}

/// One test as the host runner describes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEvent {
    /// File the test was loaded from, when the runner knows it
    #[serde(default)]
    pub file: Option<PathBuf>,
    pub title: String,
    /// Enclosing suite titles, outermost first, ending with `title`
    #[serde(default)]
    pub title_path: Vec<String>,
    #[serde(default)]
    pub state: Option<TestState>,
}

impl TestEvent {
    /// Suite names enclosing the test, outermost first
    pub fn ancestors(&self) -> &[String] {
        match self.title_path.split_last() {
            Some((last, parents)) if *last == self.title => parents,
            _ => &self.title_path,
        }
    }

    pub fn full_title(&self) -> String {
        if self.title_path.is_empty() {
            self.title.clone()
        } else {
            self.title_path.join(" ")
        }
    }
}

/// Lifecycle event in the JSON-lines stream fed to `test-retry record`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum LifecycleEvent {
    Start(TestEvent),
    End(TestEvent),
}

/// Per-test hooks of a host test runner
pub trait TestLifecycle {
    fn on_test_start(&mut self, test: &TestEvent);
    fn on_test_end(&mut self, test: &TestEvent);
}

pub struct FailureReporter {
    state: RetryState,
    naming: WorkingCopyNaming,
    recorded: usize,
}

impl FailureReporter {
    pub fn new(state: RetryState, naming: WorkingCopyNaming) -> Self {
        Self {
            state,
            naming,
            recorded: 0,
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Failures recorded by this reporter
    pub fn recorded(&self) -> usize {
        self.recorded
    }

    /// Merge a failed test into the state and persist it.
    ///
    /// Failures inside a working copy are filed under the original test file.
    /// A failed write is logged; recording carries on.
    pub fn handle_test_failure(&mut self, test: &TestEvent) {
        let Some(file) = &test.file else {
            tracing::warn!("Test file path not available for \"{}\"", test.title);
            return;
        };

        let test_file = self.naming.original_for(file).unwrap_or_else(|| file.clone());
        self.state.record_failure(&test_file, &test.title, test.ancestors());
        self.recorded += 1;

        if let Err(err) = self.state.persist() {
            tracing::error!("Failed to save retry data: {err}");
        }
    }
}

impl TestLifecycle for FailureReporter {
    fn on_test_start(&mut self, test: &TestEvent) {
        tracing::info!("Starting test: {}", test.title);
    }

    fn on_test_end(&mut self, test: &TestEvent) {
        match test.state {
            Some(TestState::Failed) => {
                self.handle_test_failure(test);
                tracing::info!("Test failed: {}", test.full_title());
            }
            Some(TestState::Passed) => tracing::info!("Test passed: {}", test.title),
            Some(TestState::Pending) => tracing::info!("Test pending: {}", test.title),
            None => tracing::info!("Test finished without a result: {}", test.title),
        }
    }
}

/// Dispatch a JSON-lines event stream to `hooks`; returns the events handled.
///
/// Blank lines are ignored. Lines that are not valid events are warned about
/// and skipped.
pub fn replay_events<R: BufRead, H: TestLifecycle>(reader: R, hooks: &mut H) -> std::io::Result<usize> {
    let mut handled = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LifecycleEvent>(&line) {
            Ok(LifecycleEvent::Start(test)) => hooks.on_test_start(&test),
            Ok(LifecycleEvent::End(test)) => hooks.on_test_end(&test),
            Err(err) => {
                tracing::warn!("Ignoring malformed event on line {}: {err}", index + 1);
                continue;
            }
        }
        handled += 1;
    }
    Ok(handled)
}
