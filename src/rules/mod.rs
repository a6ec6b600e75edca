//! Built-in rules

pub mod boolean_literal;
pub mod dead_store;
pub mod disposable_not_disposed;
pub mod disposed_more_than_once;
pub mod for_loop_increment;
pub mod function_complexity;
pub mod null_dereference;
pub mod redundant_jump;
pub mod unused_private_member;

use crate::rule::Rule;
use crate::syntax::{Node, SyntaxKind};

use SyntaxKind as K;

/// Members that own an executable body
pub(crate) const EXECUTABLE_MEMBERS: &[SyntaxKind] = &[
    K::MethodDecl,
    K::ConstructorDecl,
    K::DestructorDecl,
    K::PropertyDecl,
    K::AccessorDecl,
    K::LocalFunctionStmt,
];

/// Every built-in rule, in registration order
pub fn builtin() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(boolean_literal::BooleanLiteralUnnecessary::new()),
        Box::new(for_loop_increment::ForLoopIncrementSign::new()),
        Box::new(disposable_not_disposed::DisposableNotDisposed::new()),
        Box::new(disposed_more_than_once::DisposedMoreThanOnce::new()),
        Box::new(null_dereference::NullPointerDereference::new()),
        Box::new(null_dereference::EmptyNullableValueAccess::new()),
        Box::new(redundant_jump::RedundantJumpStatement::new()),
        Box::new(unused_private_member::UnusedPrivateMember::new()),
        Box::new(function_complexity::FunctionComplexity::new()),
        Box::new(dead_store::DeadStore::new()),
    ]
}

/// Whether a member has a body of its own to analyse. Properties with
/// accessor lists are analysed per accessor.
pub(crate) fn has_body(member: Node<'_>) -> bool {
    member.children().any(|c| match c.kind() {
        K::Block => member.kind() != K::PropertyDecl,
        K::ArrowBody => true,
        _ => false,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::dataflow::Deadline;
    use crate::diagnostic::Diagnostic;
    use crate::dispatch::{ActiveRule, Dispatcher};
    use crate::reporter::Reporter;
    use crate::rule::Rule;
    use crate::semantic::SemanticModel;
    use crate::suppression::Suppressions;
    use crate::syntax::{parse, ParseOptions};
    use std::path::Path;

    /// Run one rule over `text` and return its diagnostics
    pub fn check(rule: &dyn Rule, text: &str) -> Vec<Diagnostic> {
        let tree = parse(text, &ParseOptions::default());
        let model = SemanticModel::bind(&tree);
        let output = Dispatcher::new(vec![ActiveRule::new(rule)])
            .run(Path::new("test.cs"), &tree, &model, Deadline::none())
            .unwrap();
        assert!(output.failures.is_empty(), "rule failed: {:?}", output.failures);
        let suppressions = Suppressions::from_tree(&tree);
        Reporter::new(Path::new("test.cs"), &tree, &suppressions).finish(output.issues)
    }

    /// (line, message) pairs
    pub fn lines(rule: &dyn Rule, text: &str) -> Vec<(usize, String)> {
        check(rule, text)
            .into_iter()
            .map(|d| (d.location.line, d.message))
            .collect()
    }

    /// Text covered by each primary location
    pub fn spans(rule: &dyn Rule, text: &str) -> Vec<String> {
        check(rule, text)
            .into_iter()
            .map(|d| text[d.location.span.range()].to_string())
            .collect()
    }
}
