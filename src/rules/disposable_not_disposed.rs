//! Locally created disposables that are never disposed

use super::{has_body, EXECUTABLE_MEMBERS};
use crate::dataflow::disposal::{disposal_findings, DisposalFinding, DisposalIssue};
use crate::dispatch::RuleContext;
use crate::reporter::Issue;
use crate::rule::{ReportPolicy, Rule, RuleCategory, RuleError, RuleMeta};
use crate::syntax::{Node, SyntaxKind};

use SyntaxKind as K;

pub struct DisposableNotDisposed {
    meta: RuleMeta,
}

impl DisposableNotDisposed {
    pub fn new() -> Self {
        Self {
            meta: RuleMeta::new(
                "disposable-not-disposed",
                "DisposableNotDisposed",
                "\"IDisposables\" created locally should be disposed",
            )
            .with_category(RuleCategory::Correctness)
            .with_report_policy(ReportPolicy::OncePerLocation)
            .with_tag("resources")
            .with_related("objects-disposed-more-than-once")
            .with_example_bad("var fs = new FileStream(path, FileMode.Open);")
            .with_example_good("using var fs = new FileStream(path, FileMode.Open);"),
        }
    }
}

impl Default for DisposableNotDisposed {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the disposal analysis over one member, or nothing when it has no body
pub(crate) fn member_findings(
    ctx: &RuleContext<'_>,
    member: Node<'_>,
) -> Result<Vec<DisposalFinding>, RuleError> {
    if !has_body(member) {
        return Ok(Vec::new());
    }
    let cfg = ctx.cfg_for(member);
    Ok(disposal_findings(ctx.tree(), ctx.model(), member, &cfg, ctx.deadline())?)
}

/// The declarator or assignment storing a creation, else the creation itself
fn leak_location(creation: Node<'_>) -> Node<'_> {
    match creation.outer_parenthesized().parent() {
        Some(parent) if matches!(parent.kind(), K::VariableDeclarator | K::AssignmentExpr) => parent,
        _ => creation,
    }
}

impl Rule for DisposableNotDisposed {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn triggers(&self) -> &[SyntaxKind] {
        EXECUTABLE_MEMBERS
    }

    fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
        for finding in member_findings(ctx, node)? {
            if finding.issue != DisposalIssue::NotDisposed {
                continue;
            }
            let name = &ctx.model().symbol(finding.symbol).name;
            let location = leak_location(ctx.tree().node(finding.node));
            ctx.report(
                Issue::new(
                    location.span(),
                    format!("Dispose '{}' when it is no longer needed.", name),
                )
                .with_symbol(finding.symbol),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing;

    fn wrap(body: &str) -> String {
        format!(
            "using System.IO;\nclass C\n{{\n void M(bool c)\n {{\n{}\n }}\n}}\n",
            body
        )
    }

    #[test]
    fn test_reports_declarator() {
        let rule = DisposableNotDisposed::new();
        let text = wrap("var fs1 = new FileStream(@\"c:\\foo.txt\", FileMode.Open);\nfs1.WriteByte(1);");
        assert_eq!(
            testing::lines(&rule, &text),
            vec![(6, "Dispose 'fs1' when it is no longer needed.".to_string())]
        );
        assert_eq!(
            testing::spans(&rule, &text),
            vec!["fs1 = new FileStream(@\"c:\\foo.txt\", FileMode.Open)"]
        );
    }

    #[test]
    fn test_reassignment_reports_assignment() {
        let rule = DisposableNotDisposed::new();
        let text = wrap("FileStream fs = null;\nfs = new FileStream(\"a\");\nfs = new FileStream(\"b\");\nfs.Dispose();");
        assert_eq!(testing::spans(&rule, &text), vec!["fs = new FileStream(\"a\")"]);
    }

    #[test]
    fn test_compliant_usages() {
        let rule = DisposableNotDisposed::new();
        for body in [
            "using (var fs = new FileStream(\"a\")) { }",
            "var fs = new FileStream(\"a\");\nfs.Dispose();",
            "var fs = new FileStream(\"a\");\nreturn;",
            "var s = new MemoryStream();\nvar reader = new StreamReader(s);\nreader.Dispose();",
            "var list = new System.Collections.Generic.List<int>();",
        ] {
            let found = testing::lines(&rule, &wrap(body));
            if body.contains("return;") {
                assert_eq!(found.len(), 1, "{}", body);
            } else {
                assert!(found.is_empty(), "{}: {:?}", body, found);
            }
        }
    }

    #[test]
    fn test_local_functions_are_separate_members() {
        let rule = DisposableNotDisposed::new();
        let text = wrap("void Local()\n{\nvar fs = new FileStream(\"a\");\n}\nLocal();");
        assert_eq!(testing::lines(&rule, &text).len(), 1);
    }
}
