//! The external test runner
//!
//! The retry session only needs one thing from a runner: run whatever the
//! file pattern selects and say how many tests failed. [`CommandRunner`]
//! does that by spawning a process (mocha by default) and reading the
//! failure count from its exit code.

use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::util::{run_command_with_timeout, tail_chars};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

const OUTPUT_TAIL_MAX_CHARS: usize = 8_000;

/// What the runner is asked to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Glob selecting the files to run
    pub pattern: String,
    pub timeout_ms: u64,
    pub loader_hint: String,
}

impl RunnerOptions {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            pattern: config.pattern.clone(),
            timeout_ms: config.timeout_ms,
            loader_hint: config.loader_hint.clone(),
        }
    }
}

/// Aggregate outcome of one runner invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub failures: u32,
    pub timed_out: bool,
    /// Tail of the combined runner output, for diagnostics
    pub output_tail: String,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.failures == 0
    }
}

/// Executes tests selected by [`RunnerOptions`].
///
/// An `Err` means the runner could not be driven at all. Failing tests are an
/// `Ok` report with a non-zero failure count.
#[allow(async_fn_in_trait)]
pub trait TestRunner {
    async fn run(&mut self, options: &RunnerOptions) -> Result<RunReport, RunnerError>;
}

/// Runner config file as mocha reads it
#[derive(Debug, Serialize)]
struct RunnerConfigFile<'a> {
    spec: &'a str,
    timeout: u64,
    require: &'a str,
}

/// Removes the transient runner config on drop
struct ConfigFileGuard {
    path: PathBuf,
}

impl Drop for ConfigFileGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove runner config {}: {err}", self.path.display());
            }
        }
    }
}

/// Spawns the configured test command once per run
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    config_file: PathBuf,
    process_timeout: Option<Duration>,
    cwd: PathBuf,
}

impl CommandRunner {
    pub fn new(config: &RunnerConfig, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            config_file: config.config_file.clone(),
            process_timeout: config.process_timeout_ms.map(Duration::from_millis),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    fn config_path(&self) -> PathBuf {
        if self.config_file.is_absolute() {
            self.config_file.clone()
        } else {
            self.cwd.join(&self.config_file)
        }
    }

    fn expand_args(&self, options: &RunnerOptions, config_path: &Path) -> Vec<String> {
        let config = config_path.display().to_string();
        let timeout = options.timeout_ms.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{config}", &config)
                    .replace("{pattern}", &options.pattern)
                    .replace("{timeout}", &timeout)
            })
            .collect()
    }

    async fn write_config(&self, options: &RunnerOptions) -> Result<ConfigFileGuard, RunnerError> {
        let path = self.config_path();
        let body = RunnerConfigFile {
            spec: &options.pattern,
            timeout: options.timeout_ms,
            require: &options.loader_hint,
        };
        let content = serde_json::to_string_pretty(&body)
            .map_err(|e| RunnerError::ConfigWrite {
                path: path.clone(),
                source: std::io::Error::other(e),
            })?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| RunnerError::ConfigWrite {
                path: path.clone(),
                source,
            })?;
        Ok(ConfigFileGuard { path })
    }
}

impl TestRunner for CommandRunner {
    async fn run(&mut self, options: &RunnerOptions) -> Result<RunReport, RunnerError> {
        let guard = self.write_config(options).await?;
        let args = self.expand_args(options, &guard.path);

        let mut command = Command::new(&self.program);
        command.current_dir(&self.cwd).args(&args);
        tracing::debug!("Running {} {}", self.program, args.join(" "));

        // `options.timeout_ms` is enforced by the runner itself per test.
        // The guard removes the config on every path out of here.
        let result = run_command_with_timeout(&mut command, self.process_timeout)
            .await
            .map_err(|source| RunnerError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        drop(guard);

        let failures = if result.timed_out {
            1
        } else {
            match result.status {
                Some(status) if status.success() => 0,
                // mocha exits with the number of failed tests
                Some(status) => status.code().map(|c| c.max(1) as u32).unwrap_or(1),
                None => 1,
            }
        };

        let combined = format!("{}\n{}", result.stdout, result.stderr);
        Ok(RunReport {
            failures,
            timed_out: result.timed_out,
            output_tail: tail_chars(combined.trim(), OUTPUT_TAIL_MAX_CHARS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options() -> RunnerOptions {
        RunnerOptions::from_config(&RunnerConfig::default())
    }

    fn shell_runner(dir: &Path, script: &str) -> CommandRunner {
        let config = RunnerConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..RunnerConfig::default()
        };
        CommandRunner::new(&config, dir)
    }

    #[test]
    fn test_placeholders_are_expanded() {
        let config = RunnerConfig {
            args: vec![
                "--config={config}".to_string(),
                "{pattern}".to_string(),
                "--timeout".to_string(),
                "{timeout}".to_string(),
            ],
            ..RunnerConfig::default()
        };
        let runner = CommandRunner::new(&config, "/work");
        let args = runner.expand_args(&options(), Path::new("/work/.mocharc.retry.json"));
        assert_eq!(
            args,
            vec!["--config=/work/.mocharc.retry.json", "**/*_temp.test.ts", "--timeout", "60000"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_is_failure_count_and_config_is_removed() {
        let dir = TempDir::new().unwrap();
        // Fails with 2 only if the config file exists while the runner runs
        let mut runner = shell_runner(dir.path(), "test -f .mocharc.retry.json && exit 2; exit 0");

        let report = runner.run(&options()).await.unwrap();
        assert_eq!(report.failures, 2);
        assert!(!report.passed());
        assert!(!dir.path().join(".mocharc.retry.json").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_config_file_contents() {
        let dir = TempDir::new().unwrap();
        let mut runner = shell_runner(dir.path(), "cat .mocharc.retry.json");
        let report = runner.run(&options()).await.unwrap();
        assert!(report.passed());

        let json: serde_json::Value = serde_json::from_str(&report.output_tail).unwrap();
        assert_eq!(json["spec"], "**/*_temp.test.ts");
        assert_eq!(json["timeout"], 60000);
        assert_eq!(json["require"], "ts-node/register");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_runner_is_killed_and_counted_as_failure() {
        let dir = TempDir::new().unwrap();
        let config = RunnerConfig {
            program: "sleep".to_string(),
            args: vec!["5".to_string()],
            process_timeout_ms: Some(100),
            ..RunnerConfig::default()
        };
        let mut runner = CommandRunner::new(&config, dir.path());

        let report = runner.run(&options()).await.unwrap();
        assert!(report.timed_out);
        assert_eq!(report.failures, 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let config = RunnerConfig {
            program: "definitely-not-a-test-runner-binary".to_string(),
            ..RunnerConfig::default()
        };
        let mut runner = CommandRunner::new(&config, dir.path());

        let err = runner.run(&options()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
        assert!(!dir.path().join(".mocharc.retry.json").exists());
    }
}
