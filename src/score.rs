//! Confidence scoring for a file's remediation.
//!
//! A score is a weighted sum of four signals, each in `[0, 1]`:
//!
//! | signal | weight |
//! |---|---|
//! | final text reparses cleanly | 0.4 |
//! | top-level structure untouched outside edits | 0.2 |
//! | edits are small relative to the file | 0.2 |
//! | no edit was flagged risky | 0.2 |

use crate::edit::Edit;
use crate::frontend::Snapshot;
use serde::Serialize;
use std::collections::HashMap;

/// Weights in tenths so a perfect run sums to exactly 1.0.
const REPARSE_TENTHS: f64 = 4.0;
const LOCALITY_TENTHS: f64 = 2.0;
const MINIMALITY_TENTHS: f64 = 2.0;
const SIDE_EFFECT_TENTHS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreSignals {
    pub reparse: f64,
    pub locality: f64,
    pub minimality: f64,
    pub no_side_effects: f64,
}

impl ScoreSignals {
    /// Signals of a run that changed nothing and reparsed cleanly.
    pub const PERFECT: ScoreSignals = ScoreSignals {
        reparse: 1.0,
        locality: 1.0,
        minimality: 1.0,
        no_side_effects: 1.0,
    };

    /// Signals of a file that never produced a snapshot.
    pub const ABORTED: ScoreSignals = ScoreSignals {
        reparse: 0.0,
        locality: 0.0,
        minimality: 0.0,
        no_side_effects: 0.0,
    };

    /// Measure a finished file.
    ///
    /// `applied` are the edits that made it into the final text, each
    /// relative to the buffer of its own iteration.
    pub fn measure(
        original: &str,
        original_snapshot: &Snapshot,
        final_text: &str,
        final_snapshot: &Snapshot,
        applied: &[Edit],
        reparsed: bool,
    ) -> Self {
        let edited: usize = applied.iter().map(Edit::edited_bytes).sum();
        Self {
            reparse: if reparsed { 1.0 } else { 0.0 },
            locality: locality(original, original_snapshot, final_text, final_snapshot),
            minimality: minimality(edited, original.len()),
            no_side_effects: if applied.iter().any(|e| e.risky) {
                0.0
            } else {
                1.0
            },
        }
    }

    pub fn score(&self) -> f64 {
        score(self)
    }
}

/// Combine signals into a confidence in `[0, 1]`.
pub fn score(signals: &ScoreSignals) -> f64 {
    let weighted = REPARSE_TENTHS * unit(signals.reparse)
        + LOCALITY_TENTHS * unit(signals.locality)
        + MINIMALITY_TENTHS * unit(signals.minimality)
        + SIDE_EFFECT_TENTHS * unit(signals.no_side_effects);
    (weighted / 10.0).clamp(0.0, 1.0)
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Fraction of the original top-level nodes whose text survives unchanged.
///
/// Nodes are matched as a multiset of texts, so moving an untouched item
/// does not count against locality. A file with no top-level nodes is 1.0.
pub fn locality(
    original: &str,
    original_snapshot: &Snapshot,
    final_text: &str,
    final_snapshot: &Snapshot,
) -> f64 {
    let before = original_snapshot.top_level();
    if before.is_empty() {
        return 1.0;
    }

    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for node in final_snapshot.top_level() {
        *remaining.entry(node.text(final_text)).or_default() += 1;
    }

    let kept = before
        .iter()
        .filter(|node| match remaining.get_mut(node.text(original)) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        })
        .count();

    kept as f64 / before.len() as f64
}

/// `1 - edited / total`, clamped. An empty file is 1.0.
pub fn minimality(edited_bytes: usize, total_bytes: usize) -> f64 {
    if total_bytes == 0 {
        return 1.0;
    }
    (1.0 - edited_bytes as f64 / total_bytes as f64).clamp(0.0, 1.0)
}

/// What one applied edit contributes to a file's confidence.
pub fn edit_contribution(edit: &Edit, total_bytes: usize) -> f64 {
    if edit.risky {
        0.0
    } else {
        minimality(edit.edited_bytes(), total_bytes)
    }
}

/// Whether `confidence` calls for manual review.
pub fn is_low(confidence: f64, threshold: f64) -> bool {
    confidence < threshold
}
