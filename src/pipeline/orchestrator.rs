//! The per-file fix loop.
//!
//! ```text
//! Parsing -> Detecting -> Transforming -> Applying -> Verifying
//!                ^                                       |
//!                +------------- IterateAgain <-----------+
//!                                                        |
//!                                     Converged / Aborted
//! ```
//!
//! Every iteration computes all edits against one snapshot and applies them
//! as a single batch. A batch that breaks the parse is rolled back in full.

use crate::config::PipelineOptions;
use crate::diff::{unified_diff, DiffStats};
use crate::edit::{apply_edits, resolve_conflicts, Edit, EditError};
use crate::frontend::FrontEnd;
use crate::pipeline::CancellationToken;
use crate::report::{FileError, FileResult, FixRecord, RuleStage};
use crate::rule::{guarded, DetectContext, Rule, TransformContext, Violation};
use crate::score::{self, ScoreSignals};
use crate::source::SourceFile;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parsing,
    Detecting,
    Transforming,
    Applying,
    Verifying,
    IterateAgain,
    Converged,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Parsing => "parsing",
            Phase::Detecting => "detecting",
            Phase::Transforming => "transforming",
            Phase::Applying => "applying",
            Phase::Verifying => "verifying",
            Phase::IterateAgain => "iterate-again",
            Phase::Converged => "converged",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

struct Machine<'a> {
    path: &'a Path,
    phase: Phase,
    iteration: usize,
}

impl Machine<'_> {
    fn enter(&mut self, next: Phase) {
        debug!(
            path = %self.path.display(),
            iteration = self.iteration,
            from = %self.phase,
            to = %next,
            "phase transition"
        );
        self.phase = next;
    }
}

/// Result of the Applying step.
struct Batch {
    text: String,
    accepted: Vec<Edit>,
}

/// Drives single files through the active rule set.
pub struct FileRun<'a> {
    pub front_end: &'a dyn FrontEnd,
    pub rules: &'a [&'a dyn Rule],
    pub options: &'a PipelineOptions,
    pub cancel: &'a CancellationToken,
}

impl<'a> FileRun<'a> {
    /// Run the fix loop on `file` until it converges or aborts.
    ///
    /// Leaves the verified final text in `file.current()` and never touches
    /// the filesystem.
    pub fn process(&self, file: &mut SourceFile) -> FileResult {
        let path = file.path().to_path_buf();
        let original = file.original().to_string();
        let mut machine = Machine {
            path: &path,
            phase: Phase::Parsing,
            iteration: 0,
        };

        let original_snapshot = match self.front_end.parse(&original) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                machine.enter(Phase::Aborted);
                warn!(path = %path.display(), %error, "parse failed, file left untouched");
                return FileResult::failed(&path, original, FileError::Parse(error));
            }
        };

        let mut text = original.clone();
        let mut snapshot = original_snapshot.clone();
        let mut records: Vec<FixRecord> = Vec::new();
        let mut applied: Vec<Edit> = Vec::new();
        let mut seen_skips: HashSet<(String, String, String)> = HashSet::new();
        let mut verify_failed = false;
        let mut max_reached = false;
        let mut cancelled = false;

        loop {
            if machine.iteration >= self.options.max_iterations {
                max_reached = true;
                debug!(path = %path.display(), "iteration cap reached");
                break;
            }
            if machine.iteration > 0 && self.cancel.is_cancelled() {
                cancelled = true;
                info!(path = %path.display(), "cancelled between iterations");
                break;
            }
            machine.iteration += 1;
            let iteration = machine.iteration;

            machine.enter(Phase::Detecting);
            let diagnostics = self.front_end.analyze(&snapshot, &text);
            let ctx = DetectContext {
                path: &path,
                text: &text,
                snapshot: &snapshot,
                diagnostics: &diagnostics,
                options: self.options,
                iteration,
            };
            let found = self.detect(&ctx, &mut records);

            machine.enter(Phase::Transforming);
            let edits = self.transform(&ctx, found, &mut records, &mut seen_skips);
            if edits.is_empty() {
                break;
            }

            machine.enter(Phase::Applying);
            let Some(batch) = apply_batch(&text, edits, iteration, &mut records) else {
                break;
            };

            machine.enter(Phase::Verifying);
            match self.front_end.parse(&batch.text) {
                Ok(next) => {
                    debug_assert!(next.describes(&batch.text));
                    for edit in &batch.accepted {
                        records.push(
                            FixRecord::success(
                                &edit.rule_id,
                                iteration,
                                score::edit_contribution(edit, original.len()),
                            )
                            .with_span(edit.span)
                            .with_message(&edit.description),
                        );
                    }
                    debug!(
                        path = %path.display(),
                        iteration,
                        edits = batch.accepted.len(),
                        "batch verified"
                    );
                    applied.extend(batch.accepted);
                    text = batch.text;
                    snapshot = next;
                    file.set_current(text.clone());
                    machine.enter(Phase::IterateAgain);
                }
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        iteration,
                        %error,
                        "batch broke the parse, rolling back"
                    );
                    for edit in &batch.accepted {
                        records.push(
                            FixRecord::failure(&edit.rule_id, RuleStage::Verify, iteration, &error)
                                .with_span(edit.span)
                                .with_message(&edit.description),
                        );
                    }
                    verify_failed = true;
                    break;
                }
            }
        }
        machine.enter(Phase::Converged);
        let iterations = machine.iteration;

        let signals = ScoreSignals::measure(
            &original,
            &original_snapshot,
            &text,
            &snapshot,
            &applied,
            !verify_failed,
        );
        let confidence = signals.score();
        let low_confidence = score::is_low(confidence, self.options.confidence_threshold);
        if low_confidence {
            warn!(path = %path.display(), confidence, "low confidence, manual review recommended");
        }

        info!(
            path = %path.display(),
            iterations,
            applied = applied.len(),
            confidence,
            "file converged"
        );

        FileResult {
            diff: unified_diff(&original, &text, &path, self.options.context_lines),
            diff_stats: DiffStats::between(&original, &text),
            path,
            original_text: original,
            final_text: text,
            fixes: records,
            confidence,
            signals,
            low_confidence,
            iterations,
            max_iterations_reached: max_reached,
            cancelled,
            written: false,
            backup: None,
            error: None,
        }
    }

    fn detect(
        &self,
        ctx: &DetectContext<'_>,
        records: &mut Vec<FixRecord>,
    ) -> Vec<(&'a dyn Rule, Vec<Violation>)> {
        let mut found = Vec::new();
        for &rule in self.rules {
            match guarded(|| rule.detect(ctx)) {
                Ok(violations) if violations.is_empty() => {}
                Ok(violations) => found.push((rule, violations)),
                Err(error) => {
                    warn!(rule = rule.id(), path = %ctx.path.display(), %error, "detector failed");
                    records.push(FixRecord::failure(
                        rule.id(),
                        RuleStage::Detect,
                        ctx.iteration,
                        error,
                    ));
                }
            }
        }
        found
    }

    /// Edits for every violation, in registry order.
    fn transform(
        &self,
        ctx: &DetectContext<'_>,
        found: Vec<(&'a dyn Rule, Vec<Violation>)>,
        records: &mut Vec<FixRecord>,
        seen_skips: &mut HashSet<(String, String, String)>,
    ) -> Vec<Edit> {
        let tctx = TransformContext::from(ctx);
        let mut edits = Vec::new();

        for (rule, violations) in found {
            for violation in violations {
                match guarded(|| rule.transform(&violation, &tctx)) {
                    Ok(Some(mut edit)) => {
                        if edit.is_noop(ctx.text) {
                            continue;
                        }
                        rule.id().clone_into(&mut edit.rule_id);
                        if edit.description.is_empty() {
                            edit.description.clone_from(&violation.message);
                        }
                        edits.push(edit);
                    }
                    Ok(None) => {
                        // A declined violation is usually re-detected every
                        // iteration; report it once.
                        let excerpt = ctx.text.get(violation.span.range()).unwrap_or("");
                        let key = (
                            rule.id().to_string(),
                            violation.message.clone(),
                            excerpt.to_string(),
                        );
                        if seen_skips.insert(key) {
                            debug!(rule = rule.id(), span = %violation.span, "transformer declined");
                            records.push(
                                FixRecord::skip(rule.id(), RuleStage::Transform, ctx.iteration)
                                    .with_span(violation.span)
                                    .with_message(violation.message),
                            );
                        }
                    }
                    Err(error) => {
                        warn!(rule = rule.id(), path = %ctx.path.display(), %error, "transformer failed");
                        records.push(
                            FixRecord::failure(rule.id(), RuleStage::Transform, ctx.iteration, error)
                                .with_span(violation.span)
                                .with_message(violation.message),
                        );
                    }
                }
            }
        }

        edits
    }
}

fn fail_edit(records: &mut Vec<FixRecord>, edit: &Edit, iteration: usize, error: &EditError) {
    records.push(
        FixRecord::failure(&edit.rule_id, RuleStage::Apply, iteration, error)
            .with_span(edit.span)
            .with_message(&edit.description),
    );
}

/// Apply `edits` to `text` as one batch.
///
/// Edits that do not fit the buffer fail individually. The first conflict
/// drops the losing edits (registry order wins) and retries; any further
/// conflict fails the rules it names. Returns `None` when nothing is left
/// to apply.
fn apply_batch(
    text: &str,
    edits: Vec<Edit>,
    iteration: usize,
    records: &mut Vec<FixRecord>,
) -> Option<Batch> {
    let mut batch: Vec<Edit> = Vec::with_capacity(edits.len());
    for edit in edits {
        match edit.validate(text) {
            Ok(_) => batch.push(edit),
            Err(error) => {
                warn!(rule = %edit.rule_id, %error, "edit rejected");
                fail_edit(records, &edit, iteration, &error);
            }
        }
    }

    let mut retried = false;
    while !batch.is_empty() {
        match apply_edits(text, &batch) {
            Ok(new_text) => {
                return Some(Batch {
                    text: new_text,
                    accepted: batch,
                })
            }
            Err(EditError::Conflict(conflict)) if !retried => {
                retried = true;
                warn!(%conflict, "conflicting edits, dropping later ones and retrying");
                let (kept, dropped) = resolve_conflicts(batch);
                for (edit, conflict) in dropped {
                    debug!(rule = %edit.rule_id, span = %edit.span, "edit suppressed");
                    records.push(
                        FixRecord::skip(&edit.rule_id, RuleStage::Apply, iteration)
                            .with_span(edit.span)
                            .with_message(format!("suppressed: {conflict}")),
                    );
                }
                batch = kept;
            }
            Err(error) => {
                let culprits: HashSet<String> =
                    error.rule_ids().into_iter().map(str::to_string).collect();
                warn!(%error, "edit batch still failing, failing implicated rules");
                let (failed, rest): (Vec<Edit>, Vec<Edit>) = batch
                    .into_iter()
                    .partition(|e| culprits.contains(&e.rule_id));
                for edit in &failed {
                    fail_edit(records, edit, iteration, &error);
                }
                if failed.is_empty() {
                    for edit in &rest {
                        fail_edit(records, edit, iteration, &error);
                    }
                    return None;
                }
                batch = rest;
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Category, RuleError};
    use crate::span::Span;

    fn edit(start: usize, end: usize, text: &str, rule: &str) -> Edit {
        Edit::new(Span::new(start, end), text, rule)
    }

    #[test]
    fn batch_applies_clean_edits() {
        let mut records = Vec::new();
        let batch = apply_batch(
            "abcdef",
            vec![edit(0, 1, "A", "r1"), edit(4, 5, "E", "r2")],
            1,
            &mut records,
        )
        .unwrap();

        assert_eq!(batch.text, "AbcdEf");
        assert_eq!(batch.accepted.len(), 2);
        assert!(records.is_empty());
    }

    #[test]
    fn batch_drops_conflict_losers() {
        let mut records = Vec::new();
        let batch = apply_batch(
            "abcdef",
            vec![edit(1, 4, "X", "first"), edit(2, 5, "Y", "second")],
            1,
            &mut records,
        )
        .unwrap();

        assert_eq!(batch.text, "aXef");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rule_id, "second");
        assert_eq!(records[0].stage, RuleStage::Apply);
        assert!(!records[0].applied());
        assert!(records[0].error.is_none());
    }

    #[test]
    fn batch_fails_out_of_range_edits_individually() {
        let mut records = Vec::new();
        let batch = apply_batch(
            "abc",
            vec![edit(0, 1, "A", "ok"), edit(2, 9, "", "bad")],
            1,
            &mut records,
        )
        .unwrap();

        assert_eq!(batch.text, "Abc");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rule_id, "bad");
        assert!(records[0].error.is_some());
    }

    #[test]
    fn empty_batch_yields_nothing() {
        let mut records = Vec::new();
        assert!(apply_batch("abc", vec![edit(5, 6, "", "bad")], 1, &mut records).is_none());
        assert_eq!(records.len(), 1);
    }

    struct Panicky;

    impl Rule for Panicky {
        fn id(&self) -> &str {
            "panicky"
        }
        fn category(&self) -> Category {
            Category::Correctness
        }
        fn detect(&self, _: &DetectContext<'_>) -> Result<Vec<Violation>, RuleError> {
            panic!("detector bug")
        }
        fn transform(
            &self,
            _: &Violation,
            _: &TransformContext<'_>,
        ) -> Result<Option<Edit>, RuleError> {
            Ok(None)
        }
    }

    #[test]
    fn panicking_detector_does_not_abort_file() {
        use crate::frontend::RustFrontEnd;

        let front_end = RustFrontEnd::new();
        let rules: Vec<&dyn Rule> = vec![&Panicky];
        let options = PipelineOptions::default();
        let cancel = CancellationToken::new();
        let run = FileRun {
            front_end: &front_end,
            rules: &rules,
            options: &options,
            cancel: &cancel,
        };

        let mut file = SourceFile::new("lib.rs", "fn main() {}\n");
        let result = run.process(&mut file);

        assert!(result.error.is_none());
        assert_eq!(result.fixes.len(), 1);
        assert_eq!(result.fixes[0].stage, RuleStage::Detect);
        assert!(result.fixes[0].error.as_deref().unwrap().contains("detector bug"));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn phases_render_kebab_case() {
        assert_eq!(Phase::IterateAgain.to_string(), "iterate-again");
        assert_eq!(Phase::Converged.to_string(), "converged");
    }
}
