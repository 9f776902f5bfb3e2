//! Test block isolation engine
//!
//! Locates every leaf test invocation in a JavaScript/TypeScript source file,
//! decides which ones to disable from a list of names to keep, and rewrites
//! the file so only the kept tests execute.
//!
//! ```text
//! source ──parse──▶ SourceTree ──locate──▶ [TestSpan] ──filter──▶ [TestSpan] ──neutralize──▶ source'
//! ```

pub mod parser;
pub mod transform;

pub use parser::{parse, Argument, CallSite, SourceTree};
pub use transform::{neutralize, INERT_MARKER, INERT_PREFIX};

use crate::error::PrepareError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Grammars the parser understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    JavaScript,
    TypeScript,
    Tsx,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "tsx" => Language::Tsx,
            // TypeScript parses plain JavaScript test files as well
            _ => Language::TypeScript,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::TypeScript)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
        }
    }
}

/// Byte range of one leaf test invocation, from the callee to the closing paren
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpan {
    pub start: usize,
    pub end: usize,
    pub name: String,
}

/// Which callees define a leaf test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorConfig {
    pub leaf_callees: Vec<String>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            leaf_callees: vec!["it".to_string(), "test".to_string()],
        }
    }
}

impl LocatorConfig {
    fn is_leaf_callee(&self, name: &str) -> bool {
        self.leaf_callees.iter().any(|c| c == name)
    }
}

/// Find every leaf test invocation in source order.
///
/// A call qualifies when its callee is a configured leaf identifier, its first
/// argument is a string literal and its second argument is a function. Calls
/// that miss any of these are skipped without error.
pub fn locate(tree: &SourceTree, content: &str, config: &LocatorConfig) -> Vec<TestSpan> {
    let spans: Vec<TestSpan> = tree
        .call_sites(content)
        .into_iter()
        .filter_map(|call| test_span(call, config))
        .collect();
    tracing::debug!("{}: located {} test(s)", tree.path().display(), spans.len());
    spans
}

fn test_span(call: CallSite, config: &LocatorConfig) -> Option<TestSpan> {
    if !config.is_leaf_callee(call.callee.as_deref()?) {
        return None;
    }

    let mut args = call.arguments.into_iter();
    let name = match args.next()? {
        Argument::StringLiteral(name) => name,
        _ => return None,
    };
    if args.next()? != Argument::Function {
        return None;
    }

    Some(TestSpan {
        start: call.start,
        end: call.end,
        name,
    })
}

/// Spans to neutralize: every span whose name is not in `keep_names`.
///
/// Identity is by name only, so duplicate names are all kept or all disabled.
pub fn filter<S: AsRef<str>>(spans: &[TestSpan], keep_names: &[S]) -> Vec<TestSpan> {
    spans
        .iter()
        .filter(|span| !keep_names.iter().any(|k| k.as_ref() == span.name))
        .cloned()
        .collect()
}

/// A located test and the decision made for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDecision {
    pub span: TestSpan,
    pub keep: bool,
    /// 1-based line the invocation starts on
    pub line: usize,
}

/// Outcome of isolating one source file
#[derive(Debug, Clone)]
pub struct Isolation {
    pub decisions: Vec<TestDecision>,
    pub content: String,
}

impl Isolation {
    pub fn kept(&self) -> impl Iterator<Item = &TestDecision> {
        self.decisions.iter().filter(|d| d.keep)
    }

    pub fn neutralized(&self) -> impl Iterator<Item = &TestDecision> {
        self.decisions.iter().filter(|d| !d.keep)
    }
}

/// Parse, locate, filter and neutralize in one go.
///
/// `content` must be the pristine source; running this over an already
/// transformed file prefixes the inert lines a second time.
pub fn isolate<S: AsRef<str>>(
    path: &Path,
    content: &str,
    keep_names: &[S],
    config: &LocatorConfig,
) -> Result<Isolation, PrepareError> {
    let tree = parse(path, content)?;
    let spans = locate(&tree, content, config);
    let disabled = filter(&spans, keep_names);

    let transformed = neutralize(content, &disabled).map_err(|source| PrepareError::Transform {
        path: path.to_path_buf(),
        source,
    })?;

    let decisions = spans
        .into_iter()
        .map(|span| TestDecision {
            keep: !disabled.contains(&span),
            line: line_of(content, span.start),
            span,
        })
        .collect();

    Ok(Isolation {
        decisions,
        content: transformed,
    })
}

fn line_of(content: &str, offset: usize) -> usize {
    content.as_bytes()[..offset.min(content.len())]
        .iter()
        .filter(|b| **b == b'\n')
        .count()
        + 1
}
