//! Values stored in locals that are never read

use super::{has_body, EXECUTABLE_MEMBERS};
use crate::dataflow::liveness::dead_stores;
use crate::dispatch::RuleContext;
use crate::reporter::Issue;
use crate::rule::{Rule, RuleCategory, RuleError, RuleMeta};
use crate::syntax::{Node, SyntaxKind};

pub struct DeadStore {
    meta: RuleMeta,
}

impl DeadStore {
    pub fn new() -> Self {
        Self {
            meta: RuleMeta::new("dead-store", "DeadStores", "Unused assignments should be removed")
                .with_category(RuleCategory::Suspicious)
                .with_tag("unused")
                .with_rationale("A value that is overwritten or goes out of scope before being read is wasted work, and often a bug.")
                .with_example_bad("int x = Compute();\nx = 6;\nUse(x);")
                .with_example_good("int x = 6;\nUse(x);"),
        }
    }
}

impl Default for DeadStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule for DeadStore {
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
        for store in dead_stores(ctx.tree(), ctx.model(), node, &cfg, ctx.deadline())? {
            let name = &ctx.model().symbol(store.symbol).name;
            ctx.report(Issue::new(
                ctx.tree().node(store.node).span(),
                format!("Remove this useless assignment to local variable '{}'.", name),
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
        format!("class C\n{{\n void M(bool c)\n {{\n{}\n }}\n}}\n", body)
    }

    #[test]
    fn test_overwritten_and_trailing_stores() {
        let rule = DeadStore::new();
        let text = wrap("int x = Compute();\nx = 6;\nUse(x);\nx = 10;");
        assert_eq!(
            testing::lines(&rule, &text),
            vec![
                (5, "Remove this useless assignment to local variable 'x'.".to_string()),
                (8, "Remove this useless assignment to local variable 'x'.".to_string()),
            ]
        );
        assert_eq!(testing::spans(&rule, &text), vec!["x = Compute()", "x = 10"]);
    }

    #[test]
    fn test_live_stores_are_silent() {
        let rule = DeadStore::new();
        for body in [
            "int x = 0;\nx = 6;\nUse(x);",
            "int x = 5;\nif (c) { x = 7; }\nUse(x);",
            "int x = 5;\nRun(() => Use(x));\nx = 6;",
        ] {
            assert!(testing::lines(&rule, &wrap(body)).is_empty(), "{}", body);
        }
    }
}
