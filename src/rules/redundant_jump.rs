//! Jump statements that go where control would flow anyway

use super::{has_body, EXECUTABLE_MEMBERS};
use crate::diagnostic::{Fix, TextEdit};
use crate::dispatch::RuleContext;
use crate::reporter::Issue;
use crate::rule::{Rule, RuleCategory, RuleError, RuleMeta};
use crate::syntax::{Node, Span, SyntaxKind, SyntaxTree};

use SyntaxKind as K;

pub struct RedundantJumpStatement {
    meta: RuleMeta,
}

impl RedundantJumpStatement {
    pub fn new() -> Self {
        Self {
            meta: RuleMeta::new(
                "redundant-jump-statement",
                "RedundantJumpStatement",
                "Jump statements should not be redundant",
            )
            .with_category(RuleCategory::Style)
            .with_tag("redundant")
            .fixable()
            .with_example_bad("void M()\n{\n    Foo();\n    return;\n}")
            .with_example_good("void M()\n{\n    Foo();\n}"),
        }
    }
}

impl Default for RedundantJumpStatement {
    fn default() -> Self {
        Self::new()
    }
}

/// Jumps this rule may report; `break` in a switch section and `yield break` are required
fn candidate(jump: Node<'_>) -> bool {
    let parent = jump.parent();
    if parent.is_some_and(|p| p.kind() == K::SwitchSection && p.statements().last().map(|s| s.id()) == Some(jump.id())) {
        return false;
    }
    match jump.kind() {
        K::ReturnStmt => jump.child_count() == 0,
        K::ContinueStmt | K::GotoStmt => true,
        K::BreakStmt => parent.map_or(true, |p| p.kind() != K::SwitchSection),
        _ => false,
    }
}

/// The statement's own line when nothing else is on it, otherwise just the statement
fn removal_span(tree: &SyntaxTree, statement: Span) -> Span {
    let text = tree.text();
    let start = statement.start as usize;
    let end = statement.end() as usize;
    let line_start = text[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = text[end..].find('\n').map_or(text.len(), |i| end + i + 1);
    let before_blank = text[line_start..start].trim().is_empty();
    let after_blank = text[end..line_end].trim().is_empty();
    if before_blank && after_blank {
        Span::from_bounds(line_start as u32, line_end as u32)
    } else {
        statement
    }
}

impl Rule for RedundantJumpStatement {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn triggers(&self) -> &[SyntaxKind] {
        EXECUTABLE_MEMBERS
    }

    fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
        if !has_body(node) {
            return Ok(());
        }
        let cfg = ctx.cfg_for(node);
        let tree = ctx.tree();
        for jump in cfg.jumps() {
            if jump.target != jump.fallthrough {
                continue;
            }
            let statement = tree.node(jump.node);
            let reachable = cfg.block_of(jump.node).is_some_and(|b| cfg.is_reachable(b));
            if !reachable || !candidate(statement) {
                continue;
            }
            let mut issue = Issue::new(statement.span(), "Remove this redundant jump.");
            if statement.parent().is_some_and(|p| p.kind() == K::Block) && !statement.contains_comments() {
                issue = issue.with_fix(Fix::safe(
                    "Remove the redundant jump",
                    vec![TextEdit::delete(removal_span(tree, statement.span()))],
                ));
            }
            ctx.report(issue);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixer::{FixMode, Fixer};
    use crate::rules::testing;

    fn wrap(body: &str) -> String {
        format!("class C\n{{\n    void M(bool a)\n    {{\n{}\n    }}\n}}\n", body)
    }

    #[test]
    fn test_trailing_return_and_continue() {
        let rule = RedundantJumpStatement::new();
        assert_eq!(
            testing::lines(&rule, &wrap("        Foo();\n        return;")),
            vec![(6, "Remove this redundant jump.".to_string())]
        );
        assert_eq!(
            testing::spans(&rule, &wrap("        while (a) { Foo(); continue; }")),
            vec!["continue;"]
        );
        assert_eq!(testing::spans(&rule, &wrap("        goto L;\n        L: Foo();")), vec!["goto L;"]);
    }

    #[test]
    fn test_required_jumps() {
        let rule = RedundantJumpStatement::new();
        for body in [
            "        if (a) { return; }\n        Foo();",
            "        while (a) { if (a) { continue; } Foo(); }",
            "        while (a) { Foo(); break; }",
            "        switch (1) { case 1: Foo(); break; }",
            "        try { Foo(); return; } finally { Bar(); }\n        Foo();",
            "        using (var s = new MemoryStream()) { return; }\n        Foo();",
        ] {
            assert!(testing::lines(&rule, &wrap(body)).is_empty(), "{}", body);
        }
    }

    #[test]
    fn test_jumps_leaving_finally_regions() {
        let rule = RedundantJumpStatement::new();
        for body in [
            "        try { Foo(); return; } finally { Bar(); }",
            "        try { return; } finally { }",
            "        using (var s = new MemoryStream()) { return; }",
            "        while (a) { using (var s = new MemoryStream()) { Foo(); continue; } }",
        ] {
            assert_eq!(testing::lines(&rule, &wrap(body)), vec![(5, "Remove this redundant jump.".to_string())], "{}", body);
        }
    }

    #[test]
    fn test_fix_removes_line() {
        let text = wrap("        Foo();\n        return;");
        let diags = testing::check(&RedundantJumpStatement::new(), &text);
        let fixed = Fixer::apply(&text, &diags, FixMode::SafeOnly);
        assert_eq!(fixed.applied, 1);
        assert_eq!(fixed.text, wrap("        Foo();"));
    }

    #[test]
    fn test_fix_keeps_shared_line() {
        let text = wrap("        while (a) { Foo(); continue; }");
        let diags = testing::check(&RedundantJumpStatement::new(), &text);
        let fixed = Fixer::apply(&text, &diags, FixMode::SafeOnly);
        assert_eq!(fixed.text, wrap("        while (a) { Foo();  }"));
    }
}
