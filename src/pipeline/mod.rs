//! Running the fix loop over many files.
//!
//! Files are independent: each is read, driven through
//! [`orchestrator::FileRun`], backed up and written by one worker. Workers
//! share only the backup manager and the run reporter.

pub mod orchestrator;

pub use orchestrator::{FileRun, Phase};

use crate::atomic::atomic_write;
use crate::backup::{new_run_id, BackupError, BackupManager};
use crate::config::{PipelineOptions, ValidationError};
use crate::frontend::{FrontEnd, RustFrontEnd};
use crate::learn::RuleOrderAdvisor;
use crate::diff::DiffStats;
use crate::report::{FileError, FileResult, FixStatus, RuleStage, RunReporter, RunSummary};
use crate::rule::{RegistryError, Rule, RuleRegistry};
use crate::source::SourceFile;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Run-wide setup failures. Per-file problems never surface here; they
/// are reported in the [`RunSummary`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid pipeline options: {0}")]
    Options(#[from] ValidationError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Cancellation flag for one run, shared with every worker.
///
/// Files not yet started are skipped; files in flight finish their current
/// iteration and keep what was verified. A token stays cancelled, so each
/// run takes its own.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A rule registry bound to a front-end.
pub struct Pipeline {
    registry: RuleRegistry,
    front_end: Box<dyn FrontEnd>,
    advisor: Option<Box<dyn RuleOrderAdvisor>>,
}

impl Pipeline {
    pub fn new(registry: RuleRegistry, front_end: impl FrontEnd + 'static) -> Self {
        Self {
            registry,
            front_end: Box::new(front_end),
            advisor: None,
        }
    }

    /// The built-in rules over the tree-sitter Rust front-end.
    pub fn with_builtin_rules() -> Result<Self, PipelineError> {
        Ok(Self::new(RuleRegistry::with_builtin()?, RustFrontEnd::new()))
    }

    pub fn with_advisor(mut self, advisor: impl RuleOrderAdvisor + 'static) -> Self {
        self.advisor = Some(Box::new(advisor));
        self
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut RuleRegistry {
        &mut self.registry
    }

    pub fn front_end(&self) -> &dyn FrontEnd {
        self.front_end.as_ref()
    }

    /// Run the fix loop on in-memory text without touching the filesystem.
    pub fn fix_text(
        &self,
        path: impl Into<PathBuf>,
        text: impl Into<String>,
        options: &PipelineOptions,
    ) -> FileResult {
        let rules = self.registry.active(options);
        let cancel = CancellationToken::new();
        let mut file = SourceFile::new(path, text);
        self.file_run(&rules, options, &cancel).process(&mut file)
    }

    fn file_run<'a>(
        &'a self,
        rules: &'a [&'a dyn Rule],
        options: &'a PipelineOptions,
        cancel: &'a CancellationToken,
    ) -> FileRun<'a> {
        FileRun {
            front_end: self.front_end.as_ref(),
            rules,
            options,
            cancel,
        }
    }

    /// Remediate every file in `paths`.
    ///
    /// Fails only when the run cannot start (bad options, unusable backup
    /// root). Every file that was started appears in the summary.
    pub fn run(
        &self,
        paths: &[PathBuf],
        options: &PipelineOptions,
    ) -> Result<RunSummary, PipelineError> {
        self.run_cancellable(paths, options, &CancellationToken::new())
    }

    /// [`Pipeline::run`], stopping early once `cancel` is triggered.
    pub fn run_cancellable(
        &self,
        paths: &[PathBuf],
        options: &PipelineOptions,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PipelineError> {
        options.validate()?;

        let run_id = new_run_id();
        let backups = if options.dry_run {
            None
        } else {
            Some(BackupManager::new(&options.backup_root, run_id.as_str())?)
        };

        let rules = self.registry.active(options);
        let reporter = RunReporter::new();
        let workers = options.effective_workers();
        info!(
            run_id = %run_id,
            files = paths.len(),
            rules = rules.len(),
            workers,
            dry_run = options.dry_run,
            "starting run"
        );

        let job = Job {
            run: self.file_run(&rules, options, cancel),
            backups: backups.as_ref(),
            dry_run: options.dry_run,
            reporter: &reporter,
        };

        if workers <= 1 || paths.len() <= 1 {
            paths.iter().for_each(|path| job.execute(path));
        } else {
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| paths.par_iter().for_each(|path| job.execute(path))),
                Err(error) => {
                    warn!(%error, "failed to create worker pool, running sequentially");
                    paths.iter().for_each(|path| job.execute(path));
                }
            }
        }

        let cancelled = cancel.is_cancelled();
        let summary = reporter.finish(run_id, options.dry_run, cancelled);
        info!(
            files = summary.files.len(),
            applied = summary.applied,
            failed = summary.failed,
            success_rate = summary.success_rate,
            "run finished"
        );
        Ok(summary)
    }

    /// Let the advisor reorder rules from a finished run's statistics.
    ///
    /// Returns whether the order changed. Without an advisor, or when it has
    /// no opinion, the registry keeps its current order.
    pub fn learn_from(&mut self, summary: &RunSummary) -> bool {
        let Some(advisor) = &self.advisor else {
            return false;
        };
        match advisor.adjust_rule_order(&summary.rule_stats, &self.registry.ids()) {
            Some(order) => {
                debug!(?order, "applying advised rule order");
                self.registry.apply_order(&order);
                true
            }
            None => false,
        }
    }
}

/// What one worker needs to take a file from disk to disk.
struct Job<'a> {
    run: FileRun<'a>,
    backups: Option<&'a BackupManager>,
    dry_run: bool,
    reporter: &'a RunReporter,
}

impl Job<'_> {
    fn execute(&self, path: &Path) {
        if self.run.cancel.is_cancelled() {
            debug!(path = %path.display(), "run cancelled, file not started");
            return;
        }
        self.reporter.record(self.process(path));
    }

    fn process(&self, path: &Path) -> FileResult {
        info!(path = %path.display(), "processing file");
        let mut file = match SourceFile::load(path) {
            Ok(file) => file,
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to read file");
                return FileResult::failed(path, String::new(), FileError::io(error));
            }
        };

        let mut result = self.run.process(&mut file);
        if self.dry_run || result.error.is_some() || !file.is_modified() {
            return result;
        }

        if let Some(backups) = self.backups {
            match backups.snapshot(path) {
                Ok(record) => result.backup = Some(record),
                Err(error) => {
                    warn!(path = %path.display(), %error, "backup failed, file not written");
                    return self.write_failed(result, error);
                }
            }
        }

        if let Err(error) = atomic_write(path, &file.to_bytes()) {
            warn!(path = %path.display(), %error, "write failed");
            return self.write_failed(result, error);
        }
        result.written = true;
        result
    }

    /// The on-disk file is still the original: nothing was applied.
    fn write_failed(&self, mut result: FileResult, error: impl std::fmt::Display) -> FileResult {
        let message = error.to_string();
        for record in result.fixes.iter_mut().filter(|r| r.applied()) {
            record.status = FixStatus::Failed;
            record.stage = RuleStage::Apply;
            record.confidence_contribution = 0.0;
            record.error = Some(format!("not written: {message}"));
        }
        result.final_text = result.original_text.clone();
        result.diff.clear();
        result.diff_stats = DiffStats::default();
        result.error = Some(FileError::io(message));
        result
    }
}

/// Remediate `paths` with the built-in rules and Rust front-end.
pub fn run_pipeline(
    paths: &[PathBuf],
    options: &PipelineOptions,
) -> Result<RunSummary, PipelineError> {
    Pipeline::with_builtin_rules()?.run(paths, options)
}
