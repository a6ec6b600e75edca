//! Dereferences of variables that are null on some path
//!
//! Both rules share the nullness analysis and differ only in which kind of
//! dereference they report.

use super::{has_body, EXECUTABLE_MEMBERS};
use crate::dataflow::nullness::{null_dereferences, DereferenceKind};
use crate::dispatch::RuleContext;
use crate::reporter::Issue;
use crate::rule::{Rule, RuleCategory, RuleError, RuleMeta};
use crate::syntax::{Node, SyntaxKind};

fn report_dereferences(ctx: &RuleContext<'_>, member: Node<'_>, kind: DereferenceKind) -> Result<(), RuleError> {
    if !has_body(member) {
        return Ok(());
    }
    let cfg = ctx.cfg_for(member);
    for found in null_dereferences(ctx.tree(), ctx.model(), member, &cfg, ctx.deadline())? {
        if found.kind != kind {
            continue;
        }
        let name = &ctx.model().symbol(found.symbol).name;
        ctx.report(
            Issue::new(
                ctx.tree().node(found.node).span(),
                format!("'{}' is null on at least one execution path.", name),
            )
            .with_symbol(found.symbol),
        );
    }
    Ok(())
}

pub struct NullPointerDereference {
    meta: RuleMeta,
}

impl NullPointerDereference {
    pub fn new() -> Self {
        Self {
            meta: RuleMeta::new(
                "null-pointer-dereference",
                "NullPointerDereference",
                "Null pointers should not be dereferenced",
            )
            .with_category(RuleCategory::Correctness)
            .with_tag("symbolic-execution")
            .with_related("empty-nullable-value-access")
            .with_example_bad("string s = null;\nvar n = s.Length;")
            .with_example_good("string s = null;\nvar n = s?.Length ?? 0;"),
        }
    }
}

impl Default for NullPointerDereference {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for NullPointerDereference {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn triggers(&self) -> &[SyntaxKind] {
        EXECUTABLE_MEMBERS
    }

    fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
        report_dereferences(ctx, node, DereferenceKind::Reference)
    }
}

pub struct EmptyNullableValueAccess {
    meta: RuleMeta,
}

impl EmptyNullableValueAccess {
    pub fn new() -> Self {
        Self {
            meta: RuleMeta::new(
                "empty-nullable-value-access",
                "EmptyNullableValueAccess",
                "Empty nullable value should not be accessed",
            )
            .with_category(RuleCategory::Correctness)
            .with_tag("symbolic-execution")
            .with_related("null-pointer-dereference")
            .with_example_bad("int? v = null;\nvar x = v.Value;")
            .with_example_good("int? v = null;\nvar x = v.GetValueOrDefault();"),
        }
    }
}

impl Default for EmptyNullableValueAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for EmptyNullableValueAccess {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn triggers(&self) -> &[SyntaxKind] {
        EXECUTABLE_MEMBERS
    }

    fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
        report_dereferences(ctx, node, DereferenceKind::NullableValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing;

    fn wrap(body: &str) -> String {
        format!("class C\n{{\n void M(bool c, string p)\n {{\n{}\n }}\n}}\n", body)
    }

    #[test]
    fn test_reference_dereference() {
        let rule = NullPointerDereference::new();
        let text = wrap("string s = null;\nif (c) { s = \"a\"; }\nint n = s.Length;");
        assert_eq!(
            testing::lines(&rule, &text),
            vec![(7, "'s' is null on at least one execution path.".to_string())]
        );
        assert_eq!(testing::spans(&rule, &text), vec!["s"]);
    }

    #[test]
    fn test_kinds_are_split_between_rules() {
        let text = wrap("int? v = null;\nstring s = null;\nvar x = v.Value;\nvar y = s.Length;");
        assert_eq!(testing::lines(&NullPointerDereference::new(), &text)[0].0, 8);
        assert_eq!(testing::lines(&NullPointerDereference::new(), &text).len(), 1);
        let nullable = testing::lines(&EmptyNullableValueAccess::new(), &text);
        assert_eq!(nullable, vec![(7, "'v' is null on at least one execution path.".to_string())]);
    }

    #[test]
    fn test_guarded_accesses_are_silent() {
        let rule = NullPointerDereference::new();
        assert!(testing::lines(&rule, &wrap("if (p == null) { return; }\nint n = p.Length;")).is_empty());
        assert!(testing::lines(&rule, &wrap("string s = null;\nvar n = s?.Length;")).is_empty());
        let nullable = EmptyNullableValueAccess::new();
        assert!(testing::lines(&nullable, &wrap("int? v = null;\nif (v.HasValue) { var x = v.Value; }")).is_empty());
    }

    #[test]
    fn test_accessor_bodies_are_analysed() {
        let rule = NullPointerDereference::new();
        let text = "class C\n{\n int P\n {\n get { string s = null; return s.Length; }\n }\n}\n";
        assert_eq!(testing::lines(&rule, text).len(), 1);
    }
}
