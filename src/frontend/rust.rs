//! tree-sitter front-end for Rust sources.

use crate::frontend::{
    Diagnostic, FrontEnd, ParseError, Severity, Snapshot, SyntaxNode, Token, TokenKind,
};
use crate::pool;
use crate::span::Span;
use std::path::Path;

/// Rule ID attached to stray-semicolon diagnostics.
pub const REDUNDANT_SEMICOLON: &str = "redundant-semicolon";

/// Front-end backed by the tree-sitter Rust grammar.
///
/// Trees containing ERROR or MISSING nodes are rejected, so any snapshot
/// this front-end hands out describes syntactically valid code.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustFrontEnd;

impl RustFrontEnd {
    pub fn new() -> Self {
        Self
    }
}

impl FrontEnd for RustFrontEnd {
    fn name(&self) -> &str {
        "tree-sitter-rust"
    }

    fn parse(&self, text: &str) -> Result<Snapshot, ParseError> {
        let tree = pool::parse_rust(text)
            .map_err(|e| ParseError::at(e.to_string(), Span::point(0), text))?;
        let root = tree.root_node();

        if root.has_error() {
            let span = first_error(root)
                .map(|n| Span::new(n.start_byte(), n.end_byte()))
                .unwrap_or_else(|| Span::new(0, text.len()));
            let context = excerpt(text, span);
            return Err(ParseError::at(
                format!("syntax error near `{context}`"),
                span,
                text,
            ));
        }

        let mut tokens = Vec::new();
        let root = convert(root, &mut tokens);
        Ok(Snapshot::new(text, root, tokens))
    }

    fn analyze(&self, snapshot: &Snapshot, text: &str) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for node in snapshot.walk() {
            let mut previous: Option<&SyntaxNode> = None;
            for child in &node.children {
                if token_kind(&child.kind) == Some(TokenKind::Comment) {
                    continue;
                }
                // `if c { 1 } else { 2 };` discards a value; dropping the `;`
                // would make it the block's result
                if child.kind == "empty_statement"
                    && !previous.is_some_and(|p| ends_with_value_block(p, text))
                {
                    diagnostics.push(Diagnostic {
                        rule_id: REDUNDANT_SEMICOLON.to_string(),
                        span: child.span,
                        severity: Severity::Warning,
                        message: "unnecessary trailing semicolon".to_string(),
                        suggestion: Some(String::new()),
                    });
                }
                previous = Some(child);
            }
        }
        diagnostics.sort_by_key(|d| d.span);
        diagnostics
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("rs")
    }
}

/// Expressions that end in `}` and may still evaluate to a value.
const BLOCK_LIKE: [&str; 10] = [
    "if_expression",
    "match_expression",
    "loop_expression",
    "while_expression",
    "for_expression",
    "block",
    "unsafe_block",
    "async_block",
    "const_block",
    "try_block",
];

/// Whether `node` is a block-like expression statement with no `;` of its own.
fn ends_with_value_block(node: &SyntaxNode, text: &str) -> bool {
    let expr = match node.kind.as_str() {
        "expression_statement" => match node.children.first() {
            Some(expr) => expr,
            None => return false,
        },
        _ => node,
    };
    BLOCK_LIKE.contains(&expr.kind.as_str()) && node.text(text).trim_end().ends_with('}')
}

fn token_kind(kind: &str) -> Option<TokenKind> {
    match kind {
        "line_comment" | "block_comment" => Some(TokenKind::Comment),
        "string_literal" | "raw_string_literal" | "char_literal" => Some(TokenKind::StringLiteral),
        _ => None,
    }
}

/// Convert a tree-sitter node into an owned [`SyntaxNode`], keeping named
/// nodes only and collecting comment/string tokens along the way.
fn convert(node: tree_sitter::Node<'_>, tokens: &mut Vec<Token>) -> SyntaxNode {
    let span = Span::new(node.start_byte(), node.end_byte());
    if let Some(kind) = token_kind(node.kind()) {
        tokens.push(Token { kind, span });
    }

    let mut cursor = node.walk();
    let children = node
        .named_children(&mut cursor)
        .map(|child| convert(child, tokens))
        .collect();

    SyntaxNode::new(node.kind(), span).with_children(children)
}

fn first_error(node: tree_sitter::Node<'_>) -> Option<tree_sitter::Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }

    let mut cursor = node.walk();
    let children: Vec<_> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error)
}

/// Up to 20 bytes either side of `span`, newlines escaped.
fn excerpt(text: &str, span: Span) -> String {
    let mut start = span.start.saturating_sub(20);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (span.end + 20).min(text.len());
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    text.get(start..end).unwrap_or("").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_rust() {
        let front = RustFrontEnd::new();
        let snapshot = front.parse("fn main() { println!(\"hello\"); }").unwrap();

        assert_eq!(snapshot.root().kind, "source_file");
        assert_eq!(snapshot.top_level().len(), 1);
        assert_eq!(snapshot.top_level()[0].kind, "function_item");
    }

    #[test]
    fn parse_invalid_rust() {
        let front = RustFrontEnd::new();
        let err = front.parse("fn main( { }").unwrap_err();

        assert_eq!(err.line, 1);
        assert!(err.message.contains("syntax error"));
    }

    #[test]
    fn collects_comment_and_string_tokens() {
        let source = "// hi\nfn f() -> &'static str { \"x\" }\n";
        let snapshot = RustFrontEnd::new().parse(source).unwrap();

        let kinds: Vec<_> = snapshot.tokens().iter().map(|t| t.kind).collect();
        assert_eq!(kinds, [TokenKind::Comment, TokenKind::StringLiteral]);
        assert!(snapshot.is_protected(Span::new(2, 3)));
    }

    #[test]
    fn analyze_reports_empty_statements() {
        let source = "fn main() { let x = 1;; }\n";
        let front = RustFrontEnd::new();
        let snapshot = front.parse(source).unwrap();
        let diagnostics = front.analyze(&snapshot, source);

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].rule_id, REDUNDANT_SEMICOLON);
        assert_eq!(&source[diagnostics[0].span.range()], ";");
    }

    #[test]
    fn analyze_keeps_semicolon_after_block_like_expression() {
        let source = "fn f(c: bool) {\n    if c { 1 } else { 2 };\n    loop { break; };;\n}\n";
        let front = RustFrontEnd::new();
        let snapshot = front.parse(source).unwrap();
        let diagnostics = front.analyze(&snapshot, source);

        // Only the second `;` after the loop is redundant
        assert_eq!(diagnostics.len(), 1);
        let second = source.find("};;").unwrap() + 2;
        assert_eq!(diagnostics[0].span, Span::new(second, second + 1));
    }

    #[test]
    fn accepts_rust_files_only() {
        let front = RustFrontEnd::new();
        assert!(front.accepts(Path::new("src/lib.rs")));
        assert!(!front.accepts(Path::new("Cargo.toml")));
    }
}
