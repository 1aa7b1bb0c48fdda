//! The edit primitive and the offset-safe text editor.
//!
//! Every rule transformation compiles down to an [`Edit`]: a byte-span
//! replacement tagged with the rule that produced it. [`apply_edits`] turns
//! a batch of edits computed against one buffer into a single rewritten
//! buffer, refusing to merge overlapping spans.

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Spans longer than this are verified by hash instead of by text.
const HASH_VERIFY_THRESHOLD: usize = 1024;

/// A single proposed text change against the current buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use = "Edit does nothing until passed to apply_edits()"]
pub struct Edit {
    /// Byte span in the current buffer
    pub span: Span,
    /// Text that replaces `span`
    pub replacement: String,
    /// Rule that proposed the edit
    pub rule_id: String,
    /// Human-readable summary
    pub description: String,
    /// Set by rules whose edit may alter behavior (control flow, side effects)
    #[serde(default)]
    pub risky: bool,
    /// What the span must contain for the edit to be valid
    #[serde(skip)]
    pub expected_before: Option<EditVerification>,
}

/// Verification strategy for stale-span detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerification {
    /// Exact text match required
    ExactMatch(String),
    /// xxh3 hash of expected text (for large spans)
    Hash(u64),
}

impl EditVerification {
    /// Check if the provided text matches the verification criteria.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            EditVerification::ExactMatch(expected) => text == expected,
            EditVerification::Hash(expected_hash) => xxh3_64(text.as_bytes()) == *expected_hash,
        }
    }

    /// Create verification from text, using hash for text over 1KB.
    pub fn from_text(text: &str) -> Self {
        if text.len() > HASH_VERIFY_THRESHOLD {
            EditVerification::Hash(xxh3_64(text.as_bytes()))
        } else {
            EditVerification::ExactMatch(text.to_string())
        }
    }
}

/// Two edits in one batch whose spans overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditConflict {
    /// Rule whose edit sorts first
    pub first_rule: String,
    /// Rule whose edit collides with it
    pub second_rule: String,
    pub first_span: Span,
    pub second_span: Span,
    /// Region both edits claim
    pub overlap: Span,
}

impl fmt::Display for EditConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "edits from `{}` {} and `{}` {} overlap at {}",
            self.first_rule, self.first_span, self.second_rule, self.second_span, self.overlap
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("conflicting edits: {0}")]
    Conflict(EditConflict),

    #[error("invalid byte range {span} in buffer of length {buffer_len} (rule `{rule_id}`)")]
    InvalidByteRange {
        rule_id: String,
        span: Span,
        buffer_len: usize,
    },

    #[error("span {span} splits a UTF-8 character (rule `{rule_id}`)")]
    NotCharBoundary { rule_id: String, span: Span },

    #[error("before-text verification failed at {span} (rule `{rule_id}`): found {found:?}")]
    BeforeTextMismatch {
        rule_id: String,
        span: Span,
        found: String,
    },
}

impl EditError {
    /// Rules implicated by this error.
    pub fn rule_ids(&self) -> Vec<&str> {
        match self {
            EditError::Conflict(c) => vec![c.first_rule.as_str(), c.second_rule.as_str()],
            EditError::InvalidByteRange { rule_id, .. }
            | EditError::NotCharBoundary { rule_id, .. }
            | EditError::BeforeTextMismatch { rule_id, .. } => vec![rule_id.as_str()],
        }
    }
}

impl Edit {
    /// Create a replacement edit. The current text of the span is not
    /// verified unless [`Edit::expecting`] is used.
    pub fn new(
        span: impl Into<Span>,
        replacement: impl Into<String>,
        rule_id: impl Into<String>,
    ) -> Self {
        Self {
            span: span.into(),
            replacement: replacement.into(),
            rule_id: rule_id.into(),
            description: String::new(),
            risky: false,
            expected_before: None,
        }
    }

    /// Pure insertion at `offset`.
    pub fn insert(offset: usize, text: impl Into<String>, rule_id: impl Into<String>) -> Self {
        Self::new(Span::point(offset), text, rule_id)
    }

    /// Deletion of `span`.
    pub fn delete(span: impl Into<Span>, rule_id: impl Into<String>) -> Self {
        Self::new(span, "", rule_id)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Require the span to currently contain `before`.
    pub fn expecting(mut self, before: &str) -> Self {
        self.expected_before = Some(EditVerification::from_text(before));
        self
    }

    /// Flag the edit as behavior-altering; the confidence scorer penalizes it.
    pub fn risky(mut self) -> Self {
        self.risky = true;
        self
    }

    /// Bytes touched by this edit, the larger of removed and inserted.
    pub fn edited_bytes(&self) -> usize {
        self.span.len().max(self.replacement.len())
    }

    /// Validate the edit against `buffer`.
    ///
    /// Returns the current text at the span if validation succeeds.
    pub fn validate<'a>(&self, buffer: &'a str) -> Result<&'a str, EditError> {
        if self.span.start > self.span.end || self.span.end > buffer.len() {
            return Err(EditError::InvalidByteRange {
                rule_id: self.rule_id.clone(),
                span: self.span,
                buffer_len: buffer.len(),
            });
        }

        let current = buffer
            .get(self.span.range())
            .ok_or_else(|| EditError::NotCharBoundary {
                rule_id: self.rule_id.clone(),
                span: self.span,
            })?;

        if let Some(expected) = &self.expected_before {
            if current != self.replacement && !expected.matches(current) {
                return Err(EditError::BeforeTextMismatch {
                    rule_id: self.rule_id.clone(),
                    span: self.span,
                    found: current.to_string(),
                });
            }
        }

        Ok(current)
    }

    /// Whether applying the edit to `buffer` would change nothing.
    pub fn is_noop(&self, buffer: &str) -> bool {
        buffer.get(self.span.range()) == Some(self.replacement.as_str())
    }
}

impl fmt::Display for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {:?}", self.rule_id, self.span, self.replacement)
    }
}

/// Indices of `edits` in application order.
///
/// Sorted by start offset; at the same offset insertions come before a
/// replacement, and ties keep input order (callers pass edits in registry
/// order, so same-point insertions are applied in registry order).
fn application_order(edits: &[Edit]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..edits.len()).collect();
    order.sort_by_key(|&i| (edits[i].span.start, !edits[i].span.is_empty()));
    order
}

fn find_conflict(edits: &[Edit], order: &[usize]) -> Option<EditConflict> {
    // A replacement can collide with something later than its direct
    // successor (long span swallowing several small ones), so track the
    // furthest-reaching replacement seen so far.
    let mut widest: Option<usize> = None;

    for &idx in order {
        let edit = &edits[idx];
        if let Some(prev) = widest {
            let prev_span = edits[prev].span;
            if prev_span.conflicts_with(&edit.span) {
                let overlap = Span::new(
                    edit.span.start.max(prev_span.start),
                    edit.span.end.min(prev_span.end),
                );
                return Some(EditConflict {
                    first_rule: edits[prev].rule_id.clone(),
                    second_rule: edit.rule_id.clone(),
                    first_span: prev_span,
                    second_span: edit.span,
                    overlap,
                });
            }
        }
        if !edit.span.is_empty() && widest.map_or(true, |w| edits[w].span.end < edit.span.end) {
            widest = Some(idx);
        }
    }

    None
}

/// Apply a batch of edits computed against `buffer`.
///
/// Edits need not be sorted. The output is built into a fresh buffer by
/// walking edits in ascending span order, so no offset is invalidated by an
/// earlier replacement. Overlapping spans are an [`EditError::Conflict`];
/// nothing is merged.
pub fn apply_edits(buffer: &str, edits: &[Edit]) -> Result<String, EditError> {
    for edit in edits {
        edit.validate(buffer)?;
    }

    let order = application_order(edits);
    if let Some(conflict) = find_conflict(edits, &order) {
        return Err(EditError::Conflict(conflict));
    }

    let growth: usize = edits.iter().map(|e| e.replacement.len()).sum();
    let mut out = String::with_capacity(buffer.len() + growth);
    let mut cursor = 0;

    for &idx in &order {
        let edit = &edits[idx];
        // Validated above: bounds and char boundaries hold, cursor <= start
        // because conflicts were ruled out.
        out.push_str(&buffer[cursor..edit.span.start]);
        out.push_str(&edit.replacement);
        cursor = edit.span.end;
    }
    out.push_str(&buffer[cursor..]);

    Ok(out)
}

/// Split `edits` into a conflict-free set and the edits that lost.
///
/// Edits are considered in input order and the first one to claim a region
/// wins, so registry order decides every conflict.
pub fn resolve_conflicts(edits: Vec<Edit>) -> (Vec<Edit>, Vec<(Edit, EditConflict)>) {
    let mut kept: Vec<Edit> = Vec::with_capacity(edits.len());
    let mut dropped = Vec::new();

    for edit in edits {
        let winner = kept.iter().find(|k| k.span.conflicts_with(&edit.span));
        match winner {
            Some(winner) => {
                let conflict = EditConflict {
                    first_rule: winner.rule_id.clone(),
                    second_rule: edit.rule_id.clone(),
                    first_span: winner.span,
                    second_span: edit.span,
                    overlap: Span::new(
                        edit.span.start.max(winner.span.start),
                        edit.span.end.min(winner.span.end),
                    ),
                };
                dropped.push((edit, conflict));
            }
            None => kept.push(edit),
        }
    }

    (kept, dropped)
}
