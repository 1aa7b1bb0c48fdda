//! Line-based unified diffs for previews and reports.

use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use std::path::Path;

/// Lines added and removed between two texts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub added: usize,
    pub removed: usize,
}

impl DiffStats {
    pub fn between(original: &str, modified: &str) -> Self {
        let diff = TextDiff::from_lines(original, modified);
        let mut stats = DiffStats::default();
        for change in diff.iter_all_changes() {
            match change.tag() {
                ChangeTag::Insert => stats.added += 1,
                ChangeTag::Delete => stats.removed += 1,
                ChangeTag::Equal => {}
            }
        }
        stats
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Unified diff of `original` against `modified` with `a/` and `b/` headers.
///
/// Returns an empty string when the texts are identical.
pub fn unified_diff(original: &str, modified: &str, path: &Path, context_lines: usize) -> String {
    if original == modified {
        return String::new();
    }

    let name = path.to_string_lossy().replace('\\', "/");
    let name = name.trim_start_matches('/');
    let old_header = format!("a/{name}");
    let new_header = format!("b/{name}");

    TextDiff::from_lines(original, modified)
        .unified_diff()
        .context_radius(context_lines)
        .header(&old_header, &new_header)
        .to_string()
}
