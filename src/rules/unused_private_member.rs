//! Private members and nested types nothing in the file refers to
//!
//! Candidates are collected while walking declarations; whether they are used
//! is only known once the whole file has been seen, so reporting happens in
//! `finalize`.

use crate::dispatch::RuleContext;
use crate::reporter::Issue;
use crate::rule::{ReportPolicy, Rule, RuleCategory, RuleError, RuleMeta};
use crate::semantic::{Accessibility, SemanticModel, SymbolId, SymbolKind};
use crate::syntax::{Keyword, Node, SyntaxKind, SyntaxTree, TokenKind};
use std::collections::HashSet;

use SyntaxKind as K;

pub struct UnusedPrivateMember {
    meta: RuleMeta,
}

impl UnusedPrivateMember {
    pub fn new() -> Self {
        Self {
            meta: RuleMeta::new(
                "unused-private-member",
                "UnusedPrivateMember",
                "Unused private types or members should be removed",
            )
            .with_category(RuleCategory::Style)
            .with_report_policy(ReportPolicy::OncePerSymbol)
            .with_tag("unused")
            .with_example_bad("class C\n{\n    private int unused;\n}")
            .with_example_good("class C\n{\n}"),
        }
    }
}

impl Default for UnusedPrivateMember {
    fn default() -> Self {
        Self::new()
    }
}

/// Declarations found so far, in source order
#[derive(Default)]
struct Candidates(Vec<SymbolId>);

fn kind_word(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::Field | SymbolKind::Constant => "field",
        SymbolKind::Method => "method",
        SymbolKind::Property => "property",
        SymbolKind::Constructor => "constructor",
        _ => "type",
    }
}

/// Node carrying the attribute lists and modifiers of a declaration
fn declaring_node(node: Node<'_>) -> Node<'_> {
    if node.kind() == K::VariableDeclarator {
        if let Some(field) = node.parent().and_then(|d| d.parent()) {
            return field;
        }
    }
    node
}

fn parameter_count(node: Node<'_>) -> (usize, bool) {
    let Some(list) = node.child_of_kind(K::ParameterList) else {
        return (0, false);
    };
    let params: Vec<Node<'_>> = list.children_of_kind(K::Parameter).collect();
    let variadic = params.last().is_some_and(|p| p.text().trim_start().starts_with("params"));
    (params.len(), variadic)
}

fn argument_count(node: Node<'_>) -> Option<usize> {
    node.child_of_kind(K::ArgumentList)
        .map(|list| list.children_of_kind(K::Argument).count())
}

/// Simple name of a type reference, without namespace or type arguments
fn simple_type_name(text: &str) -> &str {
    let text = text.split('<').next().unwrap_or(text);
    text.rsplit('.').next().unwrap_or(text).trim()
}

impl UnusedPrivateMember {
    fn is_candidate(model: &SemanticModel, node: Node<'_>, symbol: SymbolId) -> bool {
        let sym = model.symbol(symbol);
        if sym.accessibility != Accessibility::Private || sym.modifiers.is_extern || sym.modifiers.is_event {
            return false;
        }
        if sym.kind.is_type() && sym.container.map_or(true, |c| !model.symbol(c).kind.is_type()) {
            return false;
        }
        if declaring_node(node).child_of_kind(K::AttributeList).is_some() {
            return false;
        }
        if sym.kind == SymbolKind::Constructor && parameter_count(node).0 == 0 {
            return false;
        }
        let mut container = sym.container;
        while let Some(c) = container {
            let outer = model.symbol(c);
            if outer.kind.is_type() && outer.modifiers.is_partial {
                return false;
            }
            container = outer.container;
        }
        true
    }

    /// Whether some `new T(..)` or `this(..)` can call the constructor
    fn constructor_called(tree: &SyntaxTree, model: &SemanticModel, symbol: SymbolId) -> bool {
        let sym = model.symbol(symbol);
        let declaration = tree.node(sym.declaration);
        let (count, variadic) = parameter_count(declaration);
        let accepts = |args: usize| args == count || (variadic && args + 1 >= count);
        let type_name = sym.container.map(|c| model.symbol(c).name.as_str()).unwrap_or("");
        let same_type = |node: Node<'_>| {
            node.nearest_ancestor(|k| k.is_type_declaration())
                .and_then(|t| model.declared_symbol(t.id()))
                == sym.container
        };

        tree.preorder().any(|node| match node.kind() {
            K::ObjectCreationExpr => {
                node.child(0).is_some_and(|t| simple_type_name(t.text()) == type_name)
                    && accepts(argument_count(node).unwrap_or(0))
            }
            K::ImplicitObjectCreationExpr => same_type(node) && accepts(argument_count(node).unwrap_or(0)),
            K::ConstructorInitializer => {
                node.token_kind() == Some(TokenKind::Keyword(Keyword::This))
                    && !node.is_descendant_of(declaration)
                    && same_type(node)
                    && accepts(argument_count(node).unwrap_or(0))
            }
            _ => false,
        })
    }
}

impl Rule for UnusedPrivateMember {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn triggers(&self) -> &[SyntaxKind] {
        &[
            K::VariableDeclarator,
            K::MethodDecl,
            K::PropertyDecl,
            K::ConstructorDecl,
            K::ClassDecl,
            K::StructDecl,
            K::InterfaceDecl,
            K::RecordDecl,
            K::EnumDecl,
        ]
    }

    fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
        let model = ctx.model();
        let Some(symbol) = model.declared_symbol(node.id()) else {
            return Ok(());
        };
        let kind = model.symbol(symbol).kind;
        let member_like = kind.is_type() || kind.is_member();
        if member_like && kind != SymbolKind::EnumMember && Self::is_candidate(model, node, symbol) {
            ctx.with_state(|candidates: &mut Candidates| candidates.0.push(symbol));
        }
        Ok(())
    }

    fn finalize(&self, ctx: &RuleContext<'_>) -> Result<(), RuleError> {
        let candidates = ctx.with_state(|c: &mut Candidates| std::mem::take(&mut c.0));
        if candidates.is_empty() {
            return Ok(());
        }
        let (tree, model) = (ctx.tree(), ctx.model());
        let key = |s: SymbolId| {
            let sym = model.symbol(s);
            (sym.container, sym.name.clone(), sym.kind)
        };

        let mut used = HashSet::new();
        for (node, target) in model.references() {
            let declaration = tree.node(model.symbol(target).declaration);
            if !tree.node(node).is_descendant_of(declaration) {
                used.insert(key(target));
            }
        }
        let unresolved: HashSet<&str> = model.unresolved().iter().map(|(_, name)| name.as_str()).collect();

        for symbol in candidates {
            ctx.deadline().check()?;
            let sym = model.symbol(symbol);
            let is_used = match sym.kind {
                SymbolKind::Constructor => Self::constructor_called(tree, model, symbol),
                _ => used.contains(&key(symbol)) || unresolved.contains(sym.name.as_str()),
            };
            if is_used {
                continue;
            }
            ctx.report(
                Issue::new(
                    sym.name_span,
                    format!("Remove the unused private {} '{}'.", kind_word(sym.kind), sym.name),
                )
                .with_symbol(symbol),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing;

    #[test]
    fn test_unused_members_are_reported() {
        let rule = UnusedPrivateMember::new();
        let text = "class C\n{\n    private int a, b;\n    private int P { get; set; }\n    private void M() { }\n    private class Nested { }\n    public int Use() => b;\n}\n";
        assert_eq!(
            testing::lines(&rule, text),
            vec![
                (3, "Remove the unused private field 'a'.".to_string()),
                (4, "Remove the unused private property 'P'.".to_string()),
                (5, "Remove the unused private method 'M'.".to_string()),
                (6, "Remove the unused private type 'Nested'.".to_string()),
            ]
        );
        assert_eq!(testing::spans(&rule, text), vec!["a", "P", "M", "Nested"]);
    }

    #[test]
    fn test_recursion_does_not_count_as_use() {
        let rule = UnusedPrivateMember::new();
        let text = "class C\n{\n    private int F(int n) => n == 0 ? 0 : F(n - 1);\n}\n";
        assert_eq!(testing::spans(&rule, text), vec!["F"]);
    }

    #[test]
    fn test_used_or_exempt_members() {
        let rule = UnusedPrivateMember::new();
        for text in [
            "class C { private int f; public int G() => this.f; }",
            "class C { private void M() { } public void N() { M(); } }",
            "partial class C { private int f; }",
            "class C { [Obsolete] private int f; }",
            "class C { private extern void M(); }",
            "class C { private event System.Action E; }",
            "class C { private C() { } }",
            "class C { private class N { } public object O() => new N(); }",
            "class C { private C(int x) { } public static C Make() => new C(1); }",
            "class C { private C(int x) { } public C() : this(1) { } }",
            "class C { int IFoo.Bar() => 1; }",
            "public class C { public int f; }",
        ] {
            assert!(testing::lines(&rule, text).is_empty(), "{}", text);
        }
    }

    #[test]
    fn test_constructor_argument_count_must_match() {
        let rule = UnusedPrivateMember::new();
        let text = "class C\n{\n    private C(int x) { }\n    public static C Make() => new C();\n    public C(string s, int y) { }\n}\n";
        assert_eq!(
            testing::lines(&rule, text),
            vec![(3, "Remove the unused private constructor 'C'.".to_string())]
        );
    }
}
