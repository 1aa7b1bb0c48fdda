//! ast-grep pattern matching for structural rules.
//!
//! Patterns use ast-grep's metavariable syntax (`$NAME` for one node,
//! `$$$NAME` for zero or more, `$_` anonymous). Matches carry exact byte
//! spans for every captured metavariable so transformers can build edits
//! without re-searching the text.

pub mod cache;

use crate::span::Span;
use ast_grep_core::tree_sitter::StrDoc;
use ast_grep_core::{AstGrep, NodeMatch};
use ast_grep_language::SupportLang;
use std::collections::HashMap;

/// One pattern match with its captured metavariables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub span: Span,
    pub text: String,
    /// Single-node captures: name -> (span, text)
    pub captures: HashMap<String, (Span, String)>,
}

impl PatternMatch {
    pub fn capture(&self, name: &str) -> Option<(Span, &str)> {
        self.captures
            .get(name)
            .map(|(span, text)| (*span, text.as_str()))
    }
}

/// Pattern matcher over one source buffer.
pub struct PatternMatcher {
    lang: SupportLang,
    sg: AstGrep<StrDoc<SupportLang>>,
}

impl PatternMatcher {
    /// Matcher for Rust source.
    pub fn rust(source: &str) -> Self {
        Self::new(source, SupportLang::Rust)
    }

    pub fn new(source: &str, lang: SupportLang) -> Self {
        Self {
            lang,
            sg: AstGrep::new(source, lang),
        }
    }

    /// All matches of `pattern`, capturing the listed metavariables.
    pub fn find_all(&self, pattern: &str, capture_names: &[&str]) -> Vec<PatternMatch> {
        let compiled = cache::get_or_compile(pattern, self.lang);
        self.sg
            .root()
            .find_all(&compiled)
            .map(|m| to_pattern_match(&m, capture_names))
            .collect()
    }
}

fn to_pattern_match(m: &NodeMatch<'_, StrDoc<SupportLang>>, capture_names: &[&str]) -> PatternMatch {
    let node = m.get_node();
    let env = m.get_env();

    let captures = capture_names
        .iter()
        .filter_map(|name| {
            let captured = env.get_match(name)?;
            let range = captured.range();
            Some((
                (*name).to_string(),
                (Span::from(range), captured.text().to_string()),
            ))
        })
        .collect();

    PatternMatch {
        span: Span::from(node.range()),
        text: node.text().to_string(),
        captures,
    }
}
