//! Built-in rules.
//!
//! A deliberately small set covering the three detection styles the
//! pipeline supports: front-end diagnostics with suggested fixes, syntax
//! tree inspection and ast-grep patterns, and narrowly scoped lexical
//! (regex) scanning that still defers to snapshot token boundaries.

use crate::edit::Edit;
use crate::frontend::rust::REDUNDANT_SEMICOLON;
use crate::frontend::{Severity, Snapshot, SyntaxNode};
use crate::rule::{Category, DetectContext, Rule, RuleError, TransformContext, Violation};
use crate::sg::PatternMatcher;
use crate::span::Span;
use regex::Regex;

/// Every built-in rule, in declaration order.
pub fn all() -> Result<Vec<Box<dyn Rule>>, regex::Error> {
    Ok(vec![
        Box::new(DbgMacroRule),
        Box::new(SuggestionRule::new(
            REDUNDANT_SEMICOLON,
            Category::Correctness,
            "remove empty statements",
        )),
        Box::new(BoolLiteralComparisonRule),
        Box::new(TrailingWhitespaceRule::new()?),
    ])
}

/// Applies front-end diagnostics that carry a suggested replacement.
pub struct SuggestionRule {
    id: String,
    category: Category,
    description: String,
}

impl SuggestionRule {
    pub fn new(id: impl Into<String>, category: Category, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            description: description.into(),
        }
    }
}

impl Rule for SuggestionRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> Category {
        self.category
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn detect(&self, ctx: &DetectContext<'_>) -> Result<Vec<Violation>, RuleError> {
        Ok(ctx
            .diagnostics
            .iter()
            .filter(|d| d.rule_id == self.id)
            .map(|d| {
                let violation = Violation::new(&self.id, d.span, &d.message)
                    .with_severity(d.severity);
                match &d.suggestion {
                    Some(suggestion) => violation.with_suggestion(suggestion),
                    None => violation,
                }
            })
            .collect())
    }

    fn transform(
        &self,
        violation: &Violation,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<Edit>, RuleError> {
        let Some(suggestion) = &violation.suggestion else {
            return Ok(None);
        };
        let Some(before) = ctx.text.get(violation.span.range()) else {
            return Err(RuleError::Failed(format!(
                "diagnostic span {} is outside the buffer",
                violation.span
            )));
        };
        Ok(Some(
            Edit::new(violation.span, suggestion.as_str(), &self.id)
                .expecting(before)
                .with_description(&violation.message),
        ))
    }
}

/// `dbg!(expr)` left in code: replaced by `expr`.
///
/// Removing the macro drops its stderr output, so edits are marked risky.
pub struct DbgMacroRule;

const DBG_MACRO: &str = "no-dbg-macro";

impl DbgMacroRule {
    fn find_invocation<'s>(snapshot: &'s Snapshot, span: Span) -> Option<&'s SyntaxNode> {
        snapshot
            .nodes_of_kind("macro_invocation")
            .find(|n| n.span == span)
    }
}

impl Rule for DbgMacroRule {
    fn id(&self) -> &str {
        DBG_MACRO
    }

    fn category(&self) -> Category {
        Category::Security
    }

    fn description(&self) -> &str {
        "remove leftover dbg! invocations"
    }

    fn detect(&self, ctx: &DetectContext<'_>) -> Result<Vec<Violation>, RuleError> {
        Ok(ctx
            .snapshot
            .nodes_of_kind("macro_invocation")
            .filter(|n| {
                n.child_of_kind("identifier")
                    .is_some_and(|name| name.text(ctx.text) == "dbg")
            })
            .map(|n| {
                Violation::new(DBG_MACRO, n.span, "dbg! invocation left in code")
                    .with_severity(Severity::Warning)
            })
            .collect())
    }

    fn transform(
        &self,
        violation: &Violation,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<Edit>, RuleError> {
        let Some(node) = Self::find_invocation(ctx.snapshot, violation.span) else {
            return Ok(None);
        };
        let Some(args) = node.child_of_kind("token_tree") else {
            return Ok(None);
        };

        let args_text = args.text(ctx.text);
        // Strip the surrounding delimiters
        let Some(inner) = args_text.get(1..args_text.len().saturating_sub(1)) else {
            return Ok(None);
        };
        let inner_start = args.span.start + 1;

        let expr = inner.trim();
        if expr.is_empty() || has_top_level_comma(inner, inner_start, ctx.snapshot) {
            // dbg!() and dbg!(a, b) expand to unit/tuples: no single expression to keep
            return Ok(None);
        }

        let replacement = if is_atomic_expression(expr) {
            expr.to_string()
        } else {
            format!("({expr})")
        };

        Ok(Some(
            Edit::new(violation.span, replacement, DBG_MACRO)
                .expecting(node.text(ctx.text))
                .with_description("unwrap dbg! invocation")
                .risky(),
        ))
    }
}

fn has_top_level_comma(inner: &str, base: usize, snapshot: &Snapshot) -> bool {
    let mut depth = 0usize;
    for (offset, ch) in inner.char_indices() {
        if snapshot.is_protected(Span::new(base + offset, base + offset + ch.len_utf8())) {
            continue;
        }
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

/// Identifiers, paths, literals and call chains need no parentheses.
fn is_atomic_expression(expr: &str) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for ch in expr.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            c if c.is_alphanumeric() || matches!(c, '_' | '.' | ':' | '\'') => {}
            _ => return false,
        }
    }
    true
}

/// `x == true` and `x != false` simplified to `x`.
pub struct BoolLiteralComparisonRule;

const BOOL_COMPARISON: &str = "bool-literal-comparison";
const BOOL_PATTERNS: [&str; 2] = ["$A == true", "$A != false"];

impl Rule for BoolLiteralComparisonRule {
    fn id(&self) -> &str {
        BOOL_COMPARISON
    }

    fn category(&self) -> Category {
        Category::Correctness
    }

    fn description(&self) -> &str {
        "drop comparisons against boolean literals"
    }

    fn detect(&self, ctx: &DetectContext<'_>) -> Result<Vec<Violation>, RuleError> {
        let matcher = PatternMatcher::rust(ctx.text);
        let mut violations = Vec::new();

        for pattern in BOOL_PATTERNS {
            for m in matcher.find_all(pattern, &["A"]) {
                let Some((_, operand)) = m.capture("A") else {
                    continue;
                };
                if ctx.snapshot.is_protected(m.span) {
                    continue;
                }
                violations.push(
                    Violation::new(BOOL_COMPARISON, m.span, "comparison with a boolean literal")
                        .with_severity(Severity::Info)
                        .with_suggestion(operand),
                );
            }
        }

        violations.sort_by_key(|v| v.span);
        Ok(violations)
    }

    fn transform(
        &self,
        violation: &Violation,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<Edit>, RuleError> {
        let (Some(operand), Some(before)) =
            (&violation.suggestion, ctx.text.get(violation.span.range()))
        else {
            return Ok(None);
        };
        Ok(Some(
            Edit::new(violation.span, operand.as_str(), BOOL_COMPARISON)
                .expecting(before)
                .with_description("use the boolean operand directly"),
        ))
    }
}

/// Spaces and tabs at line ends, outside comments and string literals.
pub struct TrailingWhitespaceRule {
    pattern: Regex,
}

const TRAILING_WHITESPACE: &str = "trailing-whitespace";

impl TrailingWhitespaceRule {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r"(?m)([ \t]+)\r?$")?,
        })
    }
}

impl Rule for TrailingWhitespaceRule {
    fn id(&self) -> &str {
        TRAILING_WHITESPACE
    }

    fn category(&self) -> Category {
        Category::Style
    }

    fn description(&self) -> &str {
        "strip trailing whitespace"
    }

    fn detect(&self, ctx: &DetectContext<'_>) -> Result<Vec<Violation>, RuleError> {
        Ok(self
            .pattern
            .captures_iter(ctx.text)
            .filter_map(|caps| caps.get(1))
            .map(|m| Span::new(m.start(), m.end()))
            .filter(|span| !ctx.snapshot.is_protected(*span))
            .map(|span| {
                Violation::new(TRAILING_WHITESPACE, span, "trailing whitespace")
                    .with_severity(Severity::Hint)
            })
            .collect())
    }

    fn transform(
        &self,
        violation: &Violation,
        ctx: &TransformContext<'_>,
    ) -> Result<Option<Edit>, RuleError> {
        // Lexical matches never edit inside a literal or comment
        if ctx.snapshot.is_protected(violation.span) {
            return Ok(None);
        }
        let Some(before) = ctx.text.get(violation.span.range()) else {
            return Ok(None);
        };
        Ok(Some(
            Edit::delete(violation.span, TRAILING_WHITESPACE)
                .expecting(before)
                .with_description("strip trailing whitespace"),
        ))
    }
}
