//! Turning rule issues into sorted, de-duplicated diagnostics

use crate::diagnostic::{Diagnostic, Fix, Location, Severity};
use crate::rule::ReportPolicy;
use crate::semantic::SymbolId;
use crate::suppression::Suppressions;
use crate::syntax::{Span, SyntaxTree};
use std::collections::HashSet;
use std::path::Path;

/// What a rule reports: positions are byte spans, the reporter resolves them
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub span: Span,
    pub message: String,
    pub secondary: Vec<(Span, Option<String>)>,
    pub fix: Option<Fix>,
    /// Symbol the issue is about, for `ReportPolicy::OncePerSymbol`
    pub symbol: Option<SymbolId>,
}

impl Issue {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            secondary: Vec::new(),
            fix: None,
            symbol: None,
        }
    }

    pub fn with_secondary(mut self, span: Span, message: Option<String>) -> Self {
        self.secondary.push((span, message));
        self
    }

    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.fix = Some(fix);
        self
    }

    pub fn with_symbol(mut self, symbol: SymbolId) -> Self {
        self.symbol = Some(symbol);
        self
    }
}

/// An issue stamped by the dispatcher with the reporting rule
#[derive(Debug, Clone)]
pub struct StampedIssue {
    pub rule_id: String,
    pub severity: Severity,
    pub policy: ReportPolicy,
    pub help: Option<String>,
    pub issue: Issue,
}

#[derive(Hash, PartialEq, Eq)]
enum DedupKey {
    Location(String, Span),
    Symbol(String, SymbolId),
}

pub struct Reporter<'a> {
    file: &'a Path,
    tree: &'a SyntaxTree,
    suppressions: &'a Suppressions,
    context_lines: usize,
}

impl<'a> Reporter<'a> {
    pub fn new(file: &'a Path, tree: &'a SyntaxTree, suppressions: &'a Suppressions) -> Self {
        Self {
            file,
            tree,
            suppressions,
            context_lines: 0,
        }
    }

    /// Set the number of context lines to include
    pub fn with_context_lines(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }

    /// Apply suppressions and report policies, then sort by (line, column, rule id)
    pub fn finish(&self, issues: Vec<StampedIssue>) -> Vec<Diagnostic> {
        let source_lines: Vec<&str> = self.tree.text().lines().collect();
        let mut seen = HashSet::new();
        let mut diagnostics = Vec::new();

        for stamped in issues {
            let location = Location::of_span(self.file, self.tree, stamped.issue.span);
            if self.suppressions.is_disabled(&stamped.rule_id, location.line) {
                log::debug!(
                    "suppressed {} at {}:{}",
                    stamped.rule_id,
                    self.file.display(),
                    location.line
                );
                continue;
            }

            let key = match (stamped.policy, stamped.issue.symbol) {
                (ReportPolicy::EveryOccurrence, _) => None,
                (ReportPolicy::OncePerSymbol, Some(symbol)) => {
                    Some(DedupKey::Symbol(stamped.rule_id.clone(), symbol))
                }
                _ => Some(DedupKey::Location(stamped.rule_id.clone(), stamped.issue.span)),
            };
            if let Some(key) = key {
                if !seen.insert(key) {
                    continue;
                }
            }

            let line_num = location.line;
            let mut diag = Diagnostic::new(
                &stamped.rule_id,
                stamped.severity,
                &stamped.issue.message,
                location,
            );
            if line_num > 0 && line_num <= source_lines.len() {
                diag = diag.with_source_line(source_lines[line_num - 1]);
                if self.context_lines > 0 {
                    diag = diag.with_context(&source_lines, self.context_lines);
                }
            }
            for (span, message) in stamped.issue.secondary {
                diag = diag.with_secondary(Location::of_span(self.file, self.tree, span), message);
            }
            if let Some(help) = &stamped.help {
                diag = diag.with_help(help);
            }
            if let Some(fix) = stamped.issue.fix {
                diag = diag.with_fix(fix);
            }
            diagnostics.push(diag);
        }

        diagnostics.sort_by(|a, b| {
            (a.location.line, a.location.column, &a.rule_id).cmp(&(
                b.location.line,
                b.location.column,
                &b.rule_id,
            ))
        });
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, ParseOptions};

    fn stamped(rule: &str, policy: ReportPolicy, issue: Issue) -> StampedIssue {
        StampedIssue {
            rule_id: rule.to_string(),
            severity: Severity::Warning,
            policy,
            help: None,
            issue,
        }
    }

    fn run(text: &str, issues: Vec<StampedIssue>) -> Vec<Diagnostic> {
        let tree = parse(text, &ParseOptions::default());
        let suppressions = Suppressions::from_tree(&tree);
        Reporter::new(Path::new("a.cs"), &tree, &suppressions).finish(issues)
    }

    #[test]
    fn test_sorted_by_position_then_rule() {
        let text = "class C\n{\n  int x;\n}\n";
        let diags = run(
            text,
            vec![
                stamped("b-rule", ReportPolicy::EveryOccurrence, Issue::new(Span::new(12, 3), "late")),
                stamped("z-rule", ReportPolicy::EveryOccurrence, Issue::new(Span::new(0, 5), "first")),
                stamped("a-rule", ReportPolicy::EveryOccurrence, Issue::new(Span::new(12, 3), "late")),
            ],
        );
        let order: Vec<_> = diags.iter().map(|d| (d.location.line, d.rule_id.as_str())).collect();
        assert_eq!(order, vec![(1, "z-rule"), (3, "a-rule"), (3, "b-rule")]);
        assert_eq!(diags[1].source_line.as_deref(), Some("  int x;"));
    }

    #[test]
    fn test_report_policies() {
        let text = "class C { int x; int y; }";
        let sym = SymbolId(3);
        let diags = run(
            text,
            vec![
                stamped("loc", ReportPolicy::OncePerLocation, Issue::new(Span::new(10, 5), "a")),
                stamped("loc", ReportPolicy::OncePerLocation, Issue::new(Span::new(10, 5), "b")),
                stamped("sym", ReportPolicy::OncePerSymbol, Issue::new(Span::new(10, 5), "a").with_symbol(sym)),
                stamped("sym", ReportPolicy::OncePerSymbol, Issue::new(Span::new(17, 5), "b").with_symbol(sym)),
                stamped("all", ReportPolicy::EveryOccurrence, Issue::new(Span::new(10, 5), "a")),
                stamped("all", ReportPolicy::EveryOccurrence, Issue::new(Span::new(10, 5), "a")),
            ],
        );
        let count = |id: &str| diags.iter().filter(|d| d.rule_id == id).count();
        assert_eq!((count("loc"), count("sym"), count("all")), (1, 1, 2));
    }

    #[test]
    fn test_suppressed_lines_are_dropped() {
        let text = "class C\n{\n  int x; // lintel-disable-line dead-store\n  int y;\n}\n";
        let x = text.find("int x").unwrap() as u32;
        let y = text.find("int y").unwrap() as u32;
        let diags = run(
            text,
            vec![
                stamped("dead-store", ReportPolicy::OncePerLocation, Issue::new(Span::new(x, 5), "x")),
                stamped("dead-store", ReportPolicy::OncePerLocation, Issue::new(Span::new(y, 5), "y")),
                stamped("other", ReportPolicy::OncePerLocation, Issue::new(Span::new(x, 5), "x")),
            ],
        );
        let kept: Vec<_> = diags.iter().map(|d| (d.rule_id.as_str(), d.location.line)).collect();
        assert_eq!(kept, vec![("other", 3), ("dead-store", 4)]);
    }

    #[test]
    fn test_secondary_locations_are_resolved() {
        let text = "class C\n{\n  void M() { }\n}\n";
        let diags = run(
            text,
            vec![stamped(
                "r",
                ReportPolicy::OncePerLocation,
                Issue::new(Span::new(0, 5), "msg").with_secondary(Span::new(12, 4), Some("+1".to_string())),
            )],
        );
        let secondary = &diags[0].secondary[0];
        assert_eq!((secondary.location.line, secondary.location.column), (3, 3));
        assert_eq!(secondary.message.as_deref(), Some("+1"));
    }
}
