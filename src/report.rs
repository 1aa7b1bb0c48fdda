//! Per-rule, per-file and per-run outcomes.
//!
//! Workers hand finished [`FileResult`]s to a shared [`RunReporter`];
//! [`RunReporter::finish`] folds them into the [`RunSummary`] that callers
//! render however they like.

use crate::backup::BackupRecord;
use crate::diff::DiffStats;
use crate::frontend::ParseError;
use crate::score::ScoreSignals;
use crate::span::Span;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Applied,
    /// The rule declined, or its edit lost a conflict
    Skipped,
    Failed,
}

/// Pipeline stage a [`FixRecord`] was produced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStage {
    Detect,
    Transform,
    Apply,
    Verify,
}

/// Outcome of one rule invocation on one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixRecord {
    pub rule_id: String,
    pub status: FixStatus,
    pub stage: RuleStage,
    /// 1-based iteration the record belongs to
    pub iteration: usize,
    pub span: Option<Span>,
    pub message: String,
    pub confidence_contribution: f64,
    pub error: Option<String>,
}

impl FixRecord {
    fn new(rule_id: impl Into<String>, status: FixStatus, stage: RuleStage, iteration: usize) -> Self {
        Self {
            rule_id: rule_id.into(),
            status,
            stage,
            iteration,
            span: None,
            message: String::new(),
            confidence_contribution: 0.0,
            error: None,
        }
    }

    pub fn success(rule_id: impl Into<String>, iteration: usize, contribution: f64) -> Self {
        let mut record = Self::new(rule_id, FixStatus::Applied, RuleStage::Verify, iteration);
        record.confidence_contribution = contribution;
        record
    }

    pub fn skip(rule_id: impl Into<String>, stage: RuleStage, iteration: usize) -> Self {
        Self::new(rule_id, FixStatus::Skipped, stage, iteration)
    }

    pub fn failure(
        rule_id: impl Into<String>,
        stage: RuleStage,
        iteration: usize,
        error: impl fmt::Display,
    ) -> Self {
        let mut record = Self::new(rule_id, FixStatus::Failed, stage, iteration);
        record.error = Some(error.to_string());
        record
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn applied(&self) -> bool {
        self.status == FixStatus::Applied
    }

    /// Whether the rule got as far as acting on a violation.
    pub fn fired(&self) -> bool {
        self.stage != RuleStage::Detect
    }
}

/// Why a file could not be processed at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileError {
    Parse(ParseError),
    Io { message: String },
}

impl FileError {
    pub fn io(error: impl fmt::Display) -> Self {
        FileError::Io {
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::Parse(e) => write!(f, "{e}"),
            FileError::Io { message } => write!(f, "I/O error: {message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Unchanged,
    Fixed,
    /// Some fixes applied or attempted, some failed
    Partial,
    Failed,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileStatus::Unchanged => "unchanged",
            FileStatus::Fixed => "fixed",
            FileStatus::Partial => "partial",
            FileStatus::Failed => "failed",
        })
    }
}

/// Everything the pipeline learned about one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub path: PathBuf,
    #[serde(skip)]
    pub original_text: String,
    #[serde(skip)]
    pub final_text: String,
    pub fixes: Vec<FixRecord>,
    pub confidence: f64,
    pub signals: ScoreSignals,
    pub low_confidence: bool,
    pub iterations: usize,
    pub max_iterations_reached: bool,
    pub cancelled: bool,
    pub diff: String,
    pub diff_stats: DiffStats,
    /// Set once the final text has been written to disk
    pub written: bool,
    pub backup: Option<BackupRecord>,
    pub error: Option<FileError>,
}

impl FileResult {
    /// Result for a file that was never parsed or read.
    pub fn failed(path: impl Into<PathBuf>, text: impl Into<String>, error: FileError) -> Self {
        let text = text.into();
        Self {
            path: path.into(),
            original_text: text.clone(),
            final_text: text,
            fixes: Vec::new(),
            confidence: 0.0,
            signals: ScoreSignals::ABORTED,
            low_confidence: true,
            iterations: 0,
            max_iterations_reached: false,
            cancelled: false,
            diff: String::new(),
            diff_stats: DiffStats::default(),
            written: false,
            backup: None,
            error: Some(error),
        }
    }

    fn count(&self, status: FixStatus) -> usize {
        self.fixes.iter().filter(|r| r.status == status).count()
    }

    pub fn applied_count(&self) -> usize {
        self.count(FixStatus::Applied)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(FixStatus::Skipped)
    }

    pub fn failed_count(&self) -> usize {
        self.count(FixStatus::Failed)
    }

    pub fn is_modified(&self) -> bool {
        self.original_text != self.final_text
    }

    pub fn status(&self) -> FileStatus {
        if self.error.is_some() {
            FileStatus::Failed
        } else if self.failed_count() > 0 {
            FileStatus::Partial
        } else if self.applied_count() > 0 {
            FileStatus::Fixed
        } else {
            FileStatus::Unchanged
        }
    }
}

/// Counters for one rule across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    pub fired: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RuleStats {
    pub fn record(&mut self, record: &FixRecord) {
        if record.fired() {
            self.fired += 1;
        }
        match record.status {
            FixStatus::Applied => self.applied += 1,
            FixStatus::Skipped => self.skipped += 1,
            FixStatus::Failed => self.failed += 1,
        }
    }

    /// `applied / (applied + failed)`, 1.0 when nothing was attempted.
    pub fn success_rate(&self) -> f64 {
        success_rate(self.applied, self.failed)
    }
}

fn success_rate(applied: usize, failed: usize) -> f64 {
    match applied + failed {
        0 => 1.0,
        total => applied as f64 / total as f64,
    }
}

fn millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Machine-readable outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub dry_run: bool,
    pub cancelled: bool,
    /// Milliseconds since the Unix epoch
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    /// Sorted by path
    pub files: Vec<FileResult>,
    pub rule_stats: BTreeMap<String, RuleStats>,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn file(&self, path: &Path) -> Option<&FileResult> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Whether any file ended in [`FileStatus::Failed`].
    pub fn has_failures(&self) -> bool {
        self.files.iter().any(|f| f.status() == FileStatus::Failed)
    }

    pub fn low_confidence_files(&self) -> impl Iterator<Item = &FileResult> {
        self.files.iter().filter(|f| f.low_confidence)
    }

    pub fn files_with_status(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status() == status).count()
    }
}

/// Thread-safe accumulator for file results arriving in any order.
pub struct RunReporter {
    started: SystemTime,
    files: Mutex<Vec<FileResult>>,
}

impl Default for RunReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReporter {
    pub fn new() -> Self {
        Self {
            started: SystemTime::now(),
            files: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, result: FileResult) {
        self.files.lock().push(result);
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn finish(self, run_id: impl Into<String>, dry_run: bool, cancelled: bool) -> RunSummary {
        let mut files = self.files.into_inner();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut rule_stats: BTreeMap<String, RuleStats> = BTreeMap::new();
        for record in files.iter().flat_map(|f| f.fixes.iter()) {
            rule_stats
                .entry(record.rule_id.clone())
                .or_default()
                .record(record);
        }

        let applied = rule_stats.values().map(|s| s.applied).sum();
        let skipped = rule_stats.values().map(|s| s.skipped).sum();
        let failed = rule_stats.values().map(|s| s.failed).sum();

        let mut warnings = Vec::new();
        for file in &files {
            if let Some(error) = &file.error {
                warnings.push(format!("{}: {}", file.path.display(), error));
            } else if file.low_confidence {
                let message = format!(
                    "{}: low confidence ({:.2}), manual review recommended",
                    file.path.display(),
                    file.confidence
                );
                warn!("{message}");
                warnings.push(message);
            }
        }

        RunSummary {
            run_id: run_id.into(),
            dry_run,
            cancelled,
            started_at_ms: millis(self.started),
            finished_at_ms: millis(SystemTime::now()),
            files,
            rule_stats,
            applied,
            skipped,
            failed,
            success_rate: success_rate(applied, failed),
            warnings,
        }
    }
}
