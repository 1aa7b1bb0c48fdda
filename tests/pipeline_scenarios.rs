//! End-to-end behavior of the fix loop against a toy line-based language.
//!
//! The toy front-end treats every non-empty line as a top-level node and
//! rejects any text containing `!!`, which lets tests break the parse on
//! demand.

use remediate::config::PipelineOptions;
use remediate::edit::Edit;
use remediate::frontend::{Diagnostic, FrontEnd, ParseError, Snapshot, SyntaxNode};
use remediate::backup::canonical_path;
use remediate::report::{FileError, FileStatus, FixStatus, RuleStage};
use remediate::rule::{
    Category, DetectContext, Rule, RuleError, RuleRegistry, TransformContext, Violation,
};
use remediate::span::Span;
use remediate::{BackupManager, CancellationToken, Pipeline};
use std::fs;
use std::path::PathBuf;
use xxhash_rust::xxh3::xxh3_64;

struct Lines;

impl FrontEnd for Lines {
    fn name(&self) -> &str {
        "lines"
    }

    fn parse(&self, text: &str) -> Result<Snapshot, ParseError> {
        if let Some(pos) = text.find("!!") {
            return Err(ParseError::at("unexpected `!!`", Span::new(pos, pos + 2), text));
        }

        let mut offset = 0;
        let mut children = Vec::new();
        for line in text.split_inclusive('\n') {
            let body = line.trim_end_matches('\n');
            if !body.is_empty() {
                children.push(SyntaxNode::new("line", offset..offset + body.len()));
            }
            offset += line.len();
        }
        let root = SyntaxNode::new("file", 0..text.len()).with_children(children);
        Ok(Snapshot::new(text, root, Vec::new()))
    }

    fn analyze(&self, _snapshot: &Snapshot, _text: &str) -> Vec<Diagnostic> {
        Vec::new()
    }
}

/// A rule that flags whole lines matching a predicate.
struct LineRule {
    id: &'static str,
    category: Category,
    matches: fn(&str) -> bool,
    fix: fn(&str, Span) -> Option<Edit>,
}

impl Rule for LineRule {
    fn id(&self) -> &str {
        self.id
    }

    fn category(&self) -> Category {
        self.category
    }

    fn detect(&self, ctx: &DetectContext<'_>) -> Result<Vec<Violation>, RuleError> {
        Ok(ctx
            .snapshot
            .top_level()
            .iter()
            .filter(|node| (self.matches)(node.text(ctx.text)))
            .map(|node| Violation::new(self.id, node.span, format!("{} matched", self.id)))
            .collect())
    }

    fn transform(
        &self,
        violation: &Violation,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<Edit>, RuleError> {
        let line = &ctx.text[violation.span.range()];
        Ok((self.fix)(line, violation.span))
    }
}

fn line_rule(
    id: &'static str,
    matches: fn(&str) -> bool,
    fix: fn(&str, Span) -> Option<Edit>,
) -> LineRule {
    LineRule {
        id,
        category: Category::Correctness,
        matches,
        fix,
    }
}

fn strip_semicolon() -> LineRule {
    line_rule(
        "R1",
        |line| line.ends_with(';'),
        |_, span| Some(Edit::delete(Span::new(span.end - 1, span.end), "R1")),
    )
}

fn pipeline(rules: Vec<LineRule>) -> Pipeline {
    let mut registry = RuleRegistry::new();
    for rule in rules {
        registry.register(rule).unwrap();
    }
    Pipeline::new(registry, Lines)
}

#[test]
fn single_fix_removes_marker() {
    let pipeline = pipeline(vec![strip_semicolon()]);
    let options = PipelineOptions::default();

    let result = pipeline.fix_text("a.src", "foo;", &options);

    assert_eq!(result.final_text, "foo");
    assert_eq!(result.fixes.len(), 1);
    assert_eq!(result.fixes[0].rule_id, "R1");
    assert!(result.fixes[0].applied());
    assert_eq!(result.status(), FileStatus::Fixed);

    // Re-verifying the output finds nothing to do and is fully confident
    let again = pipeline.fix_text("a.src", result.final_text.as_str(), &options);
    assert!(again.fixes.is_empty());
    assert_eq!(again.final_text, "foo");
    assert_eq!(again.confidence, 1.0);
}

#[test]
fn same_point_insertions_apply_in_registry_order() {
    let open = line_rule(
        "R1",
        |line| !line.contains('<'),
        |_, span| Some(Edit::insert(span.start, "<", "R1")),
    );
    let close = line_rule(
        "R2",
        |line| !line.contains('>'),
        |_, span| Some(Edit::insert(span.start, ">", "R2")),
    );

    let result = pipeline(vec![open, close]).fix_text("b.src", "foo", &PipelineOptions::default());

    assert_eq!(result.final_text, "<>foo");
    assert_eq!(result.applied_count(), 2);
    assert_eq!(result.iterations, 2);
    assert!(result.fixes.iter().all(|r| r.status == FixStatus::Applied));
}

#[test]
fn registry_order_decides_insertion_order() {
    let open = line_rule(
        "R1",
        |line| !line.contains('<'),
        |_, span| Some(Edit::insert(span.start, "<", "R1")),
    );
    let close = line_rule(
        "R2",
        |line| !line.contains('>'),
        |_, span| Some(Edit::insert(span.start, ">", "R2")),
    );

    let result = pipeline(vec![close, open]).fix_text("b.src", "foo", &PipelineOptions::default());
    assert_eq!(result.final_text, "><foo");
}

#[test]
fn declined_fix_is_skipped_not_failed() {
    let decline = line_rule("R3", |line| line.contains("foo"), |_, _| None);

    let result = pipeline(vec![decline]).fix_text("c.src", "foo\n", &PipelineOptions::default());

    assert_eq!(result.final_text, "foo\n");
    assert_eq!(result.fixes.len(), 1);
    let record = &result.fixes[0];
    assert!(!record.applied());
    assert_eq!(record.status, FixStatus::Skipped);
    assert!(record.error.is_none());
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.status(), FileStatus::Unchanged);
}

#[test]
fn broken_batch_rolls_back_to_previous_iteration() {
    let breaker = line_rule(
        "RBreak",
        |line| line == "foo",
        |_, span| Some(Edit::new(span, "foo!!", "RBreak")),
    );

    let result = pipeline(vec![strip_semicolon(), breaker]).fix_text(
        "d.src",
        "foo;\nbar\n",
        &PipelineOptions::default(),
    );

    // Iteration 1 stripped the semicolon; iteration 2 broke the parse and
    // was reverted, leaving the iteration 1 buffer.
    assert_eq!(result.final_text, "foo\nbar\n");
    assert_ne!(result.final_text, result.original_text);

    let failed: Vec<_> = result
        .fixes
        .iter()
        .filter(|r| r.status == FixStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].rule_id, "RBreak");
    assert_eq!(failed[0].stage, RuleStage::Verify);
    assert_eq!(failed[0].iteration, 2);
    assert!(result.fixes.iter().any(|r| r.rule_id == "R1" && r.applied()));

    assert_eq!(result.signals.reparse, 0.0);
    assert!(result.confidence <= 0.6);
    assert_eq!(result.status(), FileStatus::Partial);
}

#[test]
fn unparseable_input_is_left_untouched() {
    let result = pipeline(vec![strip_semicolon()]).fix_text(
        "e.src",
        "foo;!!\n",
        &PipelineOptions::default(),
    );

    assert_eq!(result.final_text, "foo;!!\n");
    assert!(result.fixes.is_empty());
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.status(), FileStatus::Failed);
}

#[test]
fn overlapping_edits_keep_the_first_rule() {
    let upper = line_rule(
        "upper",
        |line| line == "abc",
        |_, span| Some(Edit::new(span, "ABC", "upper")),
    );
    let wrap = line_rule(
        "wrap",
        |line| line == "abc",
        |_, span| Some(Edit::new(span, "(abc)", "wrap")),
    );

    let result = pipeline(vec![upper, wrap]).fix_text("f.src", "abc\n", &PipelineOptions::default());

    assert_eq!(result.final_text, "ABC\n");
    let skipped: Vec<_> = result
        .fixes
        .iter()
        .filter(|r| r.status == FixStatus::Skipped)
        .collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].rule_id, "wrap");
    assert_eq!(skipped[0].stage, RuleStage::Apply);
    assert!(skipped[0].message.contains("suppressed"));
}

#[test]
fn iteration_cap_is_a_flag_not_an_error() {
    let grow = line_rule(
        "grow",
        |_| true,
        |_, span| Some(Edit::insert(span.end, "x", "grow")),
    );
    let options = PipelineOptions {
        max_iterations: 3,
        ..PipelineOptions::default()
    };

    let result = pipeline(vec![grow]).fix_text("g.src", "a", &options);

    assert_eq!(result.final_text, "axxx");
    assert_eq!(result.iterations, 3);
    assert!(result.max_iterations_reached);
    assert!(result.error.is_none());
}

#[test]
fn skipped_rules_do_not_run() {
    let pipeline = pipeline(vec![strip_semicolon()]);
    let mut options = PipelineOptions::default();
    options.skip_rule_ids.insert("R1".to_string());

    let result = pipeline.fix_text("h.src", "foo;", &options);
    assert_eq!(result.final_text, "foo;");
    assert!(result.fixes.is_empty());

    let mut options = PipelineOptions::default();
    options.enabled_categories.insert(Category::Style);
    let result = pipeline.fix_text("h.src", "foo;", &options);
    assert_eq!(result.final_text, "foo;");
}

#[test]
fn written_files_are_backed_up_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let changed = dir.path().join("changed.src");
    let untouched = dir.path().join("untouched.src");
    fs::write(&changed, "foo;\nbar;\n").unwrap();
    fs::write(&untouched, "baz\n").unwrap();

    let options = PipelineOptions {
        backup_root: dir.path().join("backups"),
        ..PipelineOptions::default()
    };
    let paths: Vec<PathBuf> = vec![changed.clone(), untouched.clone()];
    let summary = pipeline(vec![strip_semicolon()]).run(&paths, &options).unwrap();

    assert_eq!(fs::read_to_string(&changed).unwrap(), "foo\nbar\n");
    assert_eq!(fs::read_to_string(&untouched).unwrap(), "baz\n");

    let changed_result = summary.file(&changed).unwrap();
    assert!(changed_result.written);
    let record = changed_result.backup.clone().unwrap();
    assert!(summary.file(&untouched).unwrap().backup.is_none());

    let manager = BackupManager::new(dir.path().join("backups"), "verify").unwrap();
    assert_eq!(manager.original_bytes(&record).unwrap(), b"foo;\nbar;\n");

    manager.restore(&record).unwrap();
    assert_eq!(fs::read_to_string(&changed).unwrap(), "foo;\nbar;\n");
}

#[test]
fn failed_backup_reports_file_failed_and_nothing_applied() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("blocked.src");
    fs::write(&file, "foo;\n").unwrap();

    // A plain file where the backup directory for `file` would go
    let backups = dir.path().join("backups");
    fs::create_dir_all(&backups).unwrap();
    let key = xxh3_64(canonical_path(&file).to_string_lossy().as_bytes());
    fs::write(backups.join(format!("{key:016x}")), "").unwrap();

    let options = PipelineOptions {
        backup_root: backups,
        ..PipelineOptions::default()
    };
    let summary = pipeline(vec![strip_semicolon()])
        .run(&[file.clone()], &options)
        .unwrap();

    assert_eq!(fs::read_to_string(&file).unwrap(), "foo;\n");

    let result = summary.file(&file).unwrap();
    assert!(!result.written);
    assert!(result.backup.is_none());
    assert!(matches!(result.error, Some(FileError::Io { .. })));
    assert_eq!(result.status(), FileStatus::Failed);
    assert_eq!(result.final_text, result.original_text);
    assert!(result.diff.is_empty());
    assert!(result.diff_stats.is_empty());
    assert_eq!(result.applied_count(), 0);
    assert_eq!(result.failed_count(), 1);
    assert_eq!(result.fixes[0].stage, RuleStage::Apply);

    assert!(summary.has_failures());
    assert_eq!(summary.applied, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.success_rate, 0.0);
}

/// Strips one trailing `;` per iteration and cancels the run on its first
/// detection pass.
struct CancellingRule {
    cancel: CancellationToken,
}

impl Rule for CancellingRule {
    fn id(&self) -> &str {
        "cancel-after-first"
    }

    fn category(&self) -> Category {
        Category::Correctness
    }

    fn detect(&self, ctx: &DetectContext<'_>) -> Result<Vec<Violation>, RuleError> {
        self.cancel.cancel();
        Ok(ctx
            .snapshot
            .top_level()
            .iter()
            .filter(|node| node.text(ctx.text).ends_with(';'))
            .map(|node| Violation::new(self.id(), node.span, "trailing marker"))
            .collect())
    }

    fn transform(
        &self,
        violation: &Violation,
        _ctx: &TransformContext<'_>,
    ) -> Result<Option<Edit>, RuleError> {
        let end = violation.span.end;
        Ok(Some(Edit::delete(Span::new(end - 1, end), self.id())))
    }
}

#[test]
fn cancellation_mid_file_keeps_the_verified_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("long.src");
    fs::write(&file, "foo;;;\n").unwrap();

    let cancel = CancellationToken::new();
    let mut registry = RuleRegistry::new();
    registry
        .register(CancellingRule {
            cancel: cancel.clone(),
        })
        .unwrap();
    let options = PipelineOptions {
        backup_root: dir.path().join("backups"),
        ..PipelineOptions::default()
    };

    let summary = Pipeline::new(registry, Lines)
        .run_cancellable(&[file.clone()], &options, &cancel)
        .unwrap();

    assert!(summary.cancelled);
    let result = summary.file(&file).unwrap();
    assert!(result.cancelled);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.final_text, "foo;;\n");
    assert!(result.written);
    assert_eq!(fs::read_to_string(&file).unwrap(), "foo;;\n");
}
