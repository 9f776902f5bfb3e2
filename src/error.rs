//! Error types for parsing, state persistence, and retry sessions
//!
//! Per-file errors ([`PrepareError`]) are logged and skipped by the session.
//! Session-level errors ([`SessionError`]) abort and carry enough context
//! (state file, attempt count) to diagnose.

use std::path::PathBuf;

/// A source file could not be turned into a syntax tree
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The grammar could not be loaded into the parser
    #[error("failed to load {language} grammar: {message}")]
    Language {
        language: &'static str,
        message: String,
    },

    /// The parser gave up without producing a tree
    #[error("parser produced no tree for {path}")]
    NoTree { path: PathBuf },

    /// The tree contains error or missing nodes
    #[error("syntax error in {path} at {line}:{column}")]
    Syntax {
        path: PathBuf,
        line: usize,
        column: usize,
    },
}

/// The retry state file could not be read or written
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("retry state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("io error on retry state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize retry state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Spans handed to the transformer do not describe the content
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("span {start}..{end} is outside the content ({len} bytes) or splits a character")]
    SpanOutOfBounds { start: usize, end: usize, len: usize },

    #[error("span {start}..{end} partially overlaps the span ending at {previous_end}")]
    OverlappingSpans {
        start: usize,
        end: usize,
        previous_end: usize,
    },
}

/// The external test runner could not be driven
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write runner config {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error while waiting for the test runner: {0}")]
    Io(#[from] std::io::Error),
}

/// A single state entry could not be turned into a working copy
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("test file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("{0} is itself a working copy")]
    WorkingCopy(PathBuf),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("failed to neutralize tests in {path}: {source}")]
    Transform {
        path: PathBuf,
        #[source]
        source: TransformError,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A retry session could not start or did not succeed
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("retry file not found: {path}")]
    MissingStateFile { path: PathBuf },

    #[error("tests still failing after {attempts} attempts (state file {state_file})")]
    RetriesExhausted { attempts: u32, state_file: PathBuf },

    #[error("none of the recorded test files could be prepared ({skipped} skipped, state file {state_file})")]
    NothingPrepared { skipped: usize, state_file: PathBuf },

    #[error("test runner failed on attempt {attempt}: {source}")]
    Runner {
        attempt: u32,
        #[source]
        source: RunnerError,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Invalid or unreadable configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
