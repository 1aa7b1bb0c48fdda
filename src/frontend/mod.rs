//! Boundary to the language front-end.
//!
//! The pipeline never parses source text itself. A [`FrontEnd`] turns text
//! into an immutable [`Snapshot`] (a node tree with byte spans plus the
//! lexical regions rules must not rewrite blindly) and reports
//! [`Diagnostic`]s against it. [`RustFrontEnd`] is the bundled
//! tree-sitter implementation.

pub mod rust;

pub use rust::RustFrontEnd;

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Parses source text and analyzes the result.
///
/// Implementations must be deterministic: the same text always yields an
/// equivalent snapshot and the same diagnostics.
pub trait FrontEnd: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Parse `text`. Any fatal syntax error is a [`ParseError`].
    fn parse(&self, text: &str) -> Result<Snapshot, ParseError>;

    /// Diagnostics for a parsed snapshot of `text`.
    fn analyze(&self, snapshot: &Snapshot, text: &str) -> Vec<Diagnostic>;

    /// Whether files at `path` belong to this front-end's language.
    fn accepts(&self, _path: &Path) -> bool {
        true
    }
}

/// The front-end could not produce a snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("parse error at {line}:{column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    /// 1-based
    pub line: usize,
    /// 1-based, in bytes
    pub column: usize,
}

impl ParseError {
    /// Build an error located at `span` within `text`.
    pub fn at(message: impl Into<String>, span: Span, text: &str) -> Self {
        let (line, column) = line_column(text, span.start);
        Self {
            message: message.into(),
            span,
            line,
            column,
        }
    }
}

/// 1-based line and byte column of `offset`.
pub fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(text.len());
    let before = &text.as_bytes()[..offset];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = before
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1);
    (line, offset - line_start + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Hint,
    Info,
    Warning,
    Error,
}

/// An issue reported by the front-end's analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Rule the diagnostic is attributed to
    pub rule_id: String,
    pub span: Span,
    pub severity: Severity,
    pub message: String,
    /// Replacement text for `span` when the front-end knows the fix
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// A node of the syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxNode {
    pub kind: String,
    pub span: Span,
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    pub fn new(kind: impl Into<String>, span: impl Into<Span>) -> Self {
        Self {
            kind: kind.into(),
            span: span.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<SyntaxNode>) -> Self {
        self.children = children;
        self
    }

    /// Source text covered by this node.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.span.range()).unwrap_or("")
    }

    /// First direct child of the given kind.
    pub fn child_of_kind(&self, kind: &str) -> Option<&SyntaxNode> {
        self.children.iter().find(|c| c.kind == kind)
    }

    /// Pre-order traversal including `self`.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

/// Pre-order iterator over a node and its descendants.
pub struct Walk<'a> {
    stack: Vec<&'a SyntaxNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a SyntaxNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Comment,
    StringLiteral,
}

/// A lexical region whose contents are not code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Immutable view of one parse of a source buffer.
///
/// Spans refer to the exact text that was parsed; after any edit the
/// snapshot is stale and must be recomputed.
#[derive(Debug, Clone)]
pub struct Snapshot {
    root: SyntaxNode,
    /// Sorted by start offset
    tokens: Vec<Token>,
    source_len: usize,
    source_hash: u64,
}

impl Snapshot {
    pub fn new(source: &str, root: SyntaxNode, mut tokens: Vec<Token>) -> Self {
        tokens.sort_by_key(|t| (t.span.start, t.span.end));
        Self {
            root,
            tokens,
            source_len: source.len(),
            source_hash: xxh3_64(source.as_bytes()),
        }
    }

    pub fn root(&self) -> &SyntaxNode {
        &self.root
    }

    /// Direct children of the root.
    pub fn top_level(&self) -> &[SyntaxNode] {
        &self.root.children
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn walk(&self) -> Walk<'_> {
        self.root.walk()
    }

    pub fn nodes_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a SyntaxNode> {
        self.walk().filter(move |n| n.kind == kind)
    }

    /// Deepest node whose span contains `offset`.
    pub fn node_at(&self, offset: usize) -> Option<&SyntaxNode> {
        let mut node = &self.root;
        if !node.span.contains(offset) {
            return None;
        }
        while let Some(child) = node.children.iter().find(|c| c.span.contains(offset)) {
            node = child;
        }
        Some(node)
    }

    pub fn node_count(&self) -> usize {
        self.walk().count()
    }

    /// Whether this snapshot was taken from exactly `source`.
    pub fn describes(&self, source: &str) -> bool {
        self.source_len == source.len() && self.source_hash == xxh3_64(source.as_bytes())
    }

    /// Comment or string token touching `span`, if any.
    pub fn protected_token(&self, span: Span) -> Option<&Token> {
        // Tokens are sorted by start; anything starting at or after span.end
        // cannot intersect unless span is a point strictly inside it.
        let upper = self.tokens.partition_point(|t| t.span.start <= span.end);
        self.tokens[..upper].iter().rev().find(|t| {
            if span.is_empty() {
                t.span.start < span.start && span.start < t.span.end
            } else {
                t.span.start < span.end && span.start < t.span.end
            }
        })
    }

    /// Whether `span` intersects a comment or string literal.
    pub fn is_protected(&self, span: Span) -> bool {
        self.protected_token(span).is_some()
    }
}
