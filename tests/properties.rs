//! Property tests for the editor, the scorer and the fix loop.
//!
//! 1. Conflict safety: overlapping edits are reported, never merged
//! 2. Confidence bounds: any signal mix scores within [0, 1]
//! 3. Idempotence and non-corruption of the built-in rules on generated Rust

use proptest::prelude::*;
use remediate::config::PipelineOptions;
use remediate::edit::{apply_edits, resolve_conflicts, Edit, EditError};
use remediate::frontend::{FrontEnd, RustFrontEnd};
use remediate::score::{score, ScoreSignals};
use remediate::span::Span;
use remediate::Pipeline;

// -- Strategies --

fn buffer_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z ;\n]{0,40}").unwrap()
}

/// Edits with in-bounds spans for a buffer of `len` bytes.
fn edits_strategy(len: usize) -> impl Strategy<Value = Vec<Edit>> {
    let edit = (0..=len, 0..=4usize, "[A-Z]{0,3}", 0..4usize).prop_map(
        move |(start, width, replacement, rule)| {
            let end = (start + width).min(len);
            Edit::new(Span::new(start, end), replacement, format!("r{rule}"))
        },
    );
    prop::collection::vec(edit, 0..6)
}

fn case_strategy() -> impl Strategy<Value = (String, Vec<Edit>)> {
    buffer_strategy().prop_flat_map(|buffer| {
        let len = buffer.len();
        (Just(buffer), edits_strategy(len))
    })
}

fn any_conflict(edits: &[Edit]) -> bool {
    edits.iter().enumerate().any(|(i, a)| {
        edits[i + 1..]
            .iter()
            .any(|b| a.span.conflicts_with(&b.span))
    })
}

fn statement_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("let a = 1;".to_string()),
        Just("let b = a == true;".to_string()),
        Just("let c = a != false;".to_string()),
        Just("let d = dbg!(a);".to_string()),
        Just("let e = dbg!(a, b);".to_string()),
        Just("let f = 2;;".to_string()),
        Just("// keep   this".to_string()),
        Just("let s = \"x  \";".to_string()),
        Just("if a == true { let g = 3;; }".to_string()),
    ]
}

fn rust_source_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec((statement_strategy(), 0..3usize), 0..8).prop_map(|lines| {
        let mut source = String::from("fn main() {\n");
        for (stmt, trailing) in lines {
            source.push_str("    ");
            source.push_str(&stmt);
            source.push_str(&" ".repeat(trailing));
            source.push('\n');
        }
        source.push_str("}\n");
        source
    })
}

// -- Properties --

proptest! {
    #[test]
    fn editor_never_merges_overlaps((buffer, edits) in case_strategy()) {
        match apply_edits(&buffer, &edits) {
            Ok(output) => {
                prop_assert!(!any_conflict(&edits));
                let removed: usize = edits.iter().map(|e| e.span.len()).sum();
                let inserted: usize = edits.iter().map(|e| e.replacement.len()).sum();
                prop_assert_eq!(output.len(), buffer.len() - removed + inserted);
            }
            Err(EditError::Conflict(conflict)) => {
                prop_assert!(conflict.first_span.conflicts_with(&conflict.second_span));
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    #[test]
    fn resolved_edits_always_apply((buffer, edits) in case_strategy()) {
        let total = edits.len();
        let (kept, dropped) = resolve_conflicts(edits);

        prop_assert_eq!(kept.len() + dropped.len(), total);
        prop_assert!(!any_conflict(&kept));
        prop_assert!(apply_edits(&buffer, &kept).is_ok());
        for (loser, conflict) in &dropped {
            prop_assert_eq!(&conflict.second_rule, &loser.rule_id);
        }
    }

    #[test]
    fn confidence_is_bounded(
        reparse in -2.0f64..2.0,
        locality in -2.0f64..2.0,
        minimality in -2.0f64..2.0,
        no_side_effects in -2.0f64..2.0,
    ) {
        let value = score(&ScoreSignals { reparse, locality, minimality, no_side_effects });
        prop_assert!((0.0..=1.0).contains(&value));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn builtin_rules_are_idempotent(source in rust_source_strategy()) {
        let pipeline = Pipeline::with_builtin_rules().unwrap();
        let options = PipelineOptions::default();

        let first = pipeline.fix_text("gen.rs", source.as_str(), &options);
        prop_assert!(first.error.is_none());
        prop_assert!((0.0..=1.0).contains(&first.confidence));

        let second = pipeline.fix_text("gen.rs", first.final_text.as_str(), &options);
        prop_assert_eq!(second.applied_count(), 0);
        prop_assert_eq!(&second.final_text, &first.final_text);
    }

    #[test]
    fn applied_fixes_leave_parseable_text(source in rust_source_strategy()) {
        let pipeline = Pipeline::with_builtin_rules().unwrap();
        let result = pipeline.fix_text("gen.rs", source.as_str(), &PipelineOptions::default());

        if result.applied_count() > 0 {
            prop_assert!(RustFrontEnd::new().parse(&result.final_text).is_ok());
        }
        prop_assert!(!result.final_text.lines().any(|l| l.ends_with(' ') && !l.contains("//")));
    }
}

#[test]
fn clean_reparse_without_fixes_is_fully_confident() {
    let pipeline = Pipeline::with_builtin_rules().unwrap();
    let result = pipeline.fix_text("clean.rs", "fn main() {}\n", &PipelineOptions::default());

    assert!(result.fixes.is_empty());
    assert_eq!(result.confidence, 1.0);
}
