use crate::rule::Category;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_CONTEXT_LINES: usize = 3;
pub const DEFAULT_BACKUP_ROOT: &str = ".remediate/backups";

/// Per-run pipeline configuration, passed explicitly to every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    /// Compute results and diffs without taking backups or writing files
    pub dry_run: bool,
    /// Categories to run; empty means all
    pub enabled_categories: BTreeSet<Category>,
    /// Rule IDs to leave out of the run
    pub skip_rule_ids: BTreeSet<String>,
    /// Upper bound on detect/transform/apply iterations per file
    pub max_iterations: usize,
    /// Files scoring below this are flagged for manual review
    pub confidence_threshold: f64,
    /// Worker threads; 0 uses the available parallelism
    pub workers: usize,
    /// Directory holding backup records
    pub backup_root: PathBuf,
    /// Context lines in unified diffs
    pub context_lines: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            enabled_categories: BTreeSet::new(),
            skip_rule_ids: BTreeSet::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            workers: 0,
            backup_root: PathBuf::from(DEFAULT_BACKUP_ROOT),
            context_lines: DEFAULT_CONTEXT_LINES,
        }
    }
}

impl PipelineOptions {
    pub fn category_enabled(&self, category: Category) -> bool {
        self.enabled_categories.is_empty() || self.enabled_categories.contains(&category)
    }

    /// Worker count with 0 resolved to the machine's parallelism.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.max_iterations == 0 {
            issues.push(ValidationIssue::OutOfRange {
                field: "max_iterations",
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            issues.push(ValidationIssue::OutOfRange {
                field: "confidence_threshold",
                message: format!("{} is outside [0, 1]", self.confidence_threshold),
            });
        }
        if self.backup_root.as_os_str().is_empty() {
            issues.push(ValidationIssue::OutOfRange {
                field: "backup_root",
                message: "must not be empty".to_string(),
            });
        }
        for id in &self.skip_rule_ids {
            if id.trim().is_empty() {
                issues.push(ValidationIssue::OutOfRange {
                    field: "skip_rule_ids",
                    message: "rule IDs must not be blank".to_string(),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    OutOfRange { field: &'static str, message: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::OutOfRange { field, message } => write!(f, "{field}: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl std::error::Error for ValidationError {}
