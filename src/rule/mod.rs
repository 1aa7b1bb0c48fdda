//! Rule plug-in contract.
//!
//! A rule pairs a detector, which finds [`Violation`]s in a snapshot, with a
//! transformer, which turns one violation into at most one [`Edit`]. Both
//! halves are pure: they see only what their context hands them.

pub mod builtin;
pub mod registry;

pub use registry::{RegistryError, RuleRegistry};

use crate::config::PipelineOptions;
use crate::edit::Edit;
use crate::frontend::{Diagnostic, Severity, Snapshot};
use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Rule category. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Correctness,
    Style,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Security, Category::Correctness, Category::Style];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Security => "security",
            Category::Correctness => "correctness",
            Category::Style => "style",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown category `{s}` (expected security, correctness or style)")
            })
    }
}

/// An issue found by a detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule_id: String,
    pub span: Span,
    pub message: String,
    pub severity: Severity,
    /// Replacement already known at detection time
    pub suggestion: Option<String>,
}

impl Violation {
    pub fn new(rule_id: impl Into<String>, span: impl Into<Span>, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            span: span.into(),
            message: message.into(),
            severity: Severity::Warning,
            suggestion: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Everything a detector may look at.
#[derive(Clone, Copy)]
pub struct DetectContext<'a> {
    pub path: &'a Path,
    pub text: &'a str,
    pub snapshot: &'a Snapshot,
    pub diagnostics: &'a [Diagnostic],
    pub options: &'a PipelineOptions,
    /// 1-based pipeline iteration
    pub iteration: usize,
}

/// Everything a transformer may look at.
#[derive(Clone, Copy)]
pub struct TransformContext<'a> {
    pub path: &'a Path,
    pub text: &'a str,
    pub snapshot: &'a Snapshot,
    pub options: &'a PipelineOptions,
}

impl<'a> From<&DetectContext<'a>> for TransformContext<'a> {
    fn from(ctx: &DetectContext<'a>) -> Self {
        Self {
            path: ctx.path,
            text: ctx.text,
            snapshot: ctx.snapshot,
            options: ctx.options,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("{0}")]
    Failed(String),

    #[error("rule panicked: {0}")]
    Panicked(String),
}

/// A detector/transformer pair identified by a stable ID.
pub trait Rule: Send + Sync {
    /// Stable identifier, unique within a registry.
    fn id(&self) -> &str;

    fn category(&self) -> Category;

    fn description(&self) -> &str {
        ""
    }

    /// Find violations. Must not perform I/O or keep state between calls.
    fn detect(&self, ctx: &DetectContext<'_>) -> Result<Vec<Violation>, RuleError>;

    /// Produce an edit for `violation`, or `None` to decline.
    ///
    /// Declining is not an error; the pipeline records it as skipped.
    fn transform(
        &self,
        violation: &Violation,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<Edit>, RuleError>;
}

/// Run one rule invocation, turning a panic into [`RuleError::Panicked`].
pub fn guarded<T>(f: impl FnOnce() -> Result<T, RuleError>) -> Result<T, RuleError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(RuleError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
