//! Explicit disposal of a resource that is already disposed

use super::disposable_not_disposed::member_findings;
use super::EXECUTABLE_MEMBERS;
use crate::dataflow::disposal::DisposalIssue;
use crate::dispatch::RuleContext;
use crate::reporter::Issue;
use crate::rule::{Rule, RuleCategory, RuleError, RuleMeta};
use crate::syntax::{Node, SyntaxKind};

pub struct DisposedMoreThanOnce {
    meta: RuleMeta,
}

impl DisposedMoreThanOnce {
    pub fn new() -> Self {
        Self {
            meta: RuleMeta::new(
                "objects-disposed-more-than-once",
                "ObjectsShouldNotBeDisposedMoreThanOnce",
                "Objects should not be disposed more than once",
            )
            .with_category(RuleCategory::Correctness)
            .with_tag("resources")
            .with_related("disposable-not-disposed")
            .with_example_bad("using (var s = new MemoryStream()) { s.Dispose(); }")
            .with_example_good("using (var s = new MemoryStream()) { }"),
        }
    }
}

impl Default for DisposedMoreThanOnce {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for DisposedMoreThanOnce {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn triggers(&self) -> &[SyntaxKind] {
        EXECUTABLE_MEMBERS
    }

    fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
        for finding in member_findings(ctx, node)? {
            if finding.issue != DisposalIssue::DisposedTwice {
                continue;
            }
            let name = &ctx.model().symbol(finding.symbol).name;
            ctx.report(Issue::new(
                ctx.tree().node(finding.node).span(),
                format!(
                    "Resource '{}' has already been disposed explicitly or through a using statement implicitly. Remove the redundant disposal.",
                    name
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing;

    fn wrap(body: &str) -> String {
        format!("using System.IO;\nclass C\n{{\n void M(Stream p)\n {{\n{}\n }}\n}}\n", body)
    }

    #[test]
    fn test_second_dispose_is_reported() {
        let rule = DisposedMoreThanOnce::new();
        let text = wrap("var fs = new FileStream(\"a\");\nfs.Dispose();\nfs.Dispose();");
        let found = testing::lines(&rule, &text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 8);
        assert!(found[0].1.starts_with("Resource 'fs' has already been disposed"));
        assert_eq!(testing::spans(&rule, &text), vec!["fs.Dispose()"]);
    }

    #[test]
    fn test_dispose_inside_using() {
        let rule = DisposedMoreThanOnce::new();
        let text = wrap("using (var s = new MemoryStream())\n{\ns.Close();\n}");
        assert_eq!(testing::spans(&rule, &text), vec!["s.Close()"]);
        assert_eq!(testing::lines(&rule, &wrap("p.Dispose();\np.Dispose();")).len(), 1);
    }

    #[test]
    fn test_single_dispose_per_path() {
        let rule = DisposedMoreThanOnce::new();
        for body in [
            "var fs = new FileStream(\"a\");\nfs.Dispose();",
            "var fs = new FileStream(\"a\");\nif (p == null) { fs.Dispose(); } else { fs.Close(); }",
            "using (var s = new MemoryStream()) { }",
            "var fs = new FileStream(\"a\");\nfs.Dispose();\nfs = new FileStream(\"b\");\nfs.Dispose();",
        ] {
            assert!(testing::lines(&rule, &wrap(body)).is_empty(), "{}", body);
        }
    }
}
