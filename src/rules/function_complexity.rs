//! Cyclomatic complexity of methods, accessors and local functions

use super::has_body;
use crate::dispatch::RuleContext;
use crate::reporter::Issue;
use crate::rule::{Rule, RuleCategory, RuleError, RuleMeta};
use crate::syntax::{Node, Span, SyntaxKind, TokenKind};
use serde_json::json;

use SyntaxKind as K;

const DEFAULT_MAXIMUM: u64 = 10;

pub struct FunctionComplexity {
    meta: RuleMeta,
}

impl FunctionComplexity {
    pub fn new() -> Self {
        Self {
            meta: RuleMeta::new(
                "function-complexity",
                "FunctionComplexity",
                "Methods should not be too complex",
            )
            .with_category(RuleCategory::Pedantic)
            .with_tag("brain-overload")
            .with_parameter(
                "maximum",
                "Highest cyclomatic complexity allowed for a single function",
                json!(DEFAULT_MAXIMUM),
            )
            .with_rationale("Functions with many branches are hard to read, test and change."),
        }
    }
}

impl Default for FunctionComplexity {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_word(member: Node<'_>) -> &'static str {
    match member.kind() {
        K::ConstructorDecl => "constructor",
        K::PropertyDecl => "property",
        K::AccessorDecl => "accessor",
        K::LocalFunctionStmt => "local function",
        _ => "method",
    }
}

/// `?.` token of a conditional access
fn question_dot(node: Node<'_>) -> Option<Span> {
    let receiver_end = node.child(0)?.span().end();
    node.tokens()
        .iter()
        .find(|t| t.kind == TokenKind::QuestionDot && t.span.start >= receiver_end)
        .map(|t| t.span)
}

/// Where a node adds a path, if it does
fn increment(node: Node<'_>) -> Option<Span> {
    match node.kind() {
        K::IfStmt | K::WhileStmt | K::DoStmt | K::ForStmt | K::ForEachStmt | K::CaseLabel | K::ConditionalExpr => {
            node.token_span()
        }
        K::ConditionalAccessExpr | K::ConditionalElementAccessExpr => question_dot(node),
        K::SwitchExprArm => {
            let pattern = node.child(0)?;
            (pattern.kind() != K::DiscardPattern).then(|| pattern.span())
        }
        K::BinaryExpr => match node.token_kind()? {
            TokenKind::AmpAmp | TokenKind::PipePipe | TokenKind::QuestionQuestion => node.token_span(),
            _ => None,
        },
        K::AssignmentExpr if node.token_kind() == Some(TokenKind::QuestionQuestionEq) => node.token_span(),
        _ => None,
    }
}

/// Each point adding to the complexity of `member`; nested local functions are measured on their own
pub(crate) fn complexity_points(member: Node<'_>) -> Vec<Span> {
    let root = member.id();
    member
        .descendants()
        .pruned(|n| n.id() != root && n.kind() == K::LocalFunctionStmt)
        .filter(|n| n.id() != root)
        .filter_map(increment)
        .collect()
}

impl Rule for FunctionComplexity {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn triggers(&self) -> &[SyntaxKind] {
        &[
            K::MethodDecl,
            K::ConstructorDecl,
            K::DestructorDecl,
            K::PropertyDecl,
            K::AccessorDecl,
            K::LocalFunctionStmt,
        ]
    }

    fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
        if !has_body(node) {
            return Ok(());
        }
        let maximum = ctx.parameter_u64("maximum")?;
        let points = complexity_points(node);
        let complexity = points.len() as u64 + 1;
        if complexity <= maximum {
            return Ok(());
        }
        let location = node.token_span().unwrap_or_else(|| node.span());
        let mut issue = Issue::new(
            location,
            format!(
                "The Cyclomatic Complexity of this {} is {} which is greater than {} authorized.",
                kind_word(node),
                complexity,
                maximum
            ),
        );
        for point in points {
            issue = issue.with_secondary(point, Some("+1".to_string()));
        }
        ctx.report(issue);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::Deadline;
    use crate::dispatch::{ActiveRule, Dispatcher};
    use crate::rules::testing;
    use crate::semantic::SemanticModel;
    use crate::syntax::{parse, ParseOptions};
    use std::collections::HashMap;
    use std::path::Path;

    fn points(text: &str) -> usize {
        let tree = parse(text, &ParseOptions::default());
        let method = tree.preorder().find(|n| n.kind() == K::MethodDecl).unwrap();
        complexity_points(method).len()
    }

    #[test]
    fn test_counts_branches_and_operators() {
        assert_eq!(points("class C { void M() { } }"), 0);
        assert_eq!(points("class C { void M(bool a, bool b) { if (a && b || a) { } } }"), 3);
        assert_eq!(points("class C { void M(int x) { while (x > 0) { x--; } do { } while (false); } }"), 2);
        assert_eq!(points("class C { void M(int[] xs) { foreach (var x in xs) { } for (;;) { } } }"), 2);
        assert_eq!(points("class C { void M(int x) { switch (x) { case 1: case 2: break; default: break; } } }"), 2);
        assert_eq!(points("class C { int M(int x) => x switch { 1 => 1, 2 => 2, _ => 0 }; }"), 2);
        assert_eq!(points("class C { int? M(string s) { s ??= \"\"; return s?.Length ?? (s == null ? 0 : 1); } }"), 4);
    }

    #[test]
    fn test_lambdas_count_and_local_functions_do_not() {
        assert_eq!(points("class C { void M(bool a) { Run(() => { if (a) { } }); } }"), 1);
        assert_eq!(points("class C { void M(bool a) { void L() { if (a) { } } L(); } }"), 0);
    }

    fn complex_method(branches: usize) -> String {
        let body: String = (0..branches).map(|i| format!("        if (a == {}) {{ }}\n", i)).collect();
        format!("class C\n{{\n    void M(int a)\n    {{\n{}    }}\n}}\n", body)
    }

    #[test]
    fn test_reports_above_maximum() {
        let rule = FunctionComplexity::new();
        assert!(testing::lines(&rule, &complex_method(9)).is_empty());
        let diags = testing::check(&rule, &complex_method(10));
        assert_eq!(diags.len(), 1);
        assert_eq!(
            diags[0].message,
            "The Cyclomatic Complexity of this method is 11 which is greater than 10 authorized."
        );
        assert_eq!(diags[0].location.line, 3);
        assert_eq!(diags[0].secondary.len(), 10);
        assert_eq!(diags[0].secondary[0].message.as_deref(), Some("+1"));
    }

    #[test]
    fn test_maximum_parameter() {
        let rule = FunctionComplexity::new();
        let text = complex_method(3);
        let tree = parse(&text, &ParseOptions::default());
        let model = SemanticModel::bind(&tree);
        let mut parameters = HashMap::new();
        parameters.insert("maximum".to_string(), json!(2));
        let active = ActiveRule::new(&rule).with_parameters(parameters);
        let output = Dispatcher::new(vec![active])
            .run(Path::new("test.cs"), &tree, &model, Deadline::none())
            .unwrap();
        assert_eq!(output.issues.len(), 1);
        assert!(output.issues[0].issue.message.contains("is 4 which is greater than 2"));
    }
}
