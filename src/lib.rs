//! Remediate: rule-driven source remediation for Rust
//!
//! A fix pipeline that runs a catalog of detector/transformer rules over
//! source files until they reach a fixed point, without ever leaving a file
//! in a state that does not parse.
//!
//! # Architecture
//!
//! Every transformation compiles down to one primitive: [`Edit`], a byte-span
//! replacement tagged with the rule that produced it. Rules find
//! [`Violation`]s in an immutable [`Snapshot`] supplied by a [`FrontEnd`] and
//! turn each into at most one edit. The orchestrator applies one iteration's
//! edits as a single batch with [`apply_edits`], reparses the result and
//! loops until no rule has anything left to do.
//!
//! # Safety
//!
//! - Overlapping edits are never merged; the first in registry order wins
//! - A batch that breaks the parse is rolled back in full
//! - Originals are backed up before the first write
//! - Atomic file writes (tempfile + fsync + rename)
//! - UTF-8 validation and BOM preservation
//!
//! # Example
//!
//! ```no_run
//! use remediate::{run_pipeline, PipelineOptions};
//! use std::path::PathBuf;
//!
//! let options = PipelineOptions {
//!     dry_run: true,
//!     ..PipelineOptions::default()
//! };
//! let summary = run_pipeline(&[PathBuf::from("src/lib.rs")], &options)?;
//! for file in &summary.files {
//!     println!("{}: {} ({:.2})", file.path.display(), file.status(), file.confidence);
//! }
//! # Ok::<(), remediate::PipelineError>(())
//! ```

pub mod atomic;
pub mod backup;
pub mod config;
pub mod diff;
pub mod edit;
pub mod frontend;
pub mod learn;
pub mod pipeline;
pub mod pool;
pub mod report;
pub mod rule;
pub mod score;
pub mod sg;
pub mod source;
pub mod span;

// Re-exports
pub use backup::{BackupError, BackupManager, BackupRecord};
pub use config::{load_from_path, load_from_str, ConfigError, PipelineOptions};
pub use diff::unified_diff;
pub use edit::{apply_edits, resolve_conflicts, Edit, EditConflict, EditError, EditVerification};
pub use frontend::{Diagnostic, FrontEnd, ParseError, RustFrontEnd, Severity, Snapshot};
pub use learn::{RuleOrderAdvisor, SuccessRateAdvisor};
pub use pipeline::{run_pipeline, CancellationToken, Pipeline, PipelineError};
pub use report::{FileResult, FileStatus, FixRecord, FixStatus, RuleStats, RunSummary};
pub use rule::{Category, Rule, RuleError, RuleRegistry, Violation};
pub use score::ScoreSignals;
pub use span::Span;
