//! Reads and writes of locals and parameters inside one operation

use crate::semantic::{SemanticModel, SymbolId};
use crate::syntax::{Node, NodeId, SyntaxKind, TokenKind};
use std::collections::BTreeSet;

use SyntaxKind as K;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    /// Plain `=` assignment or declaration
    Write,
    /// Compound assignment, increment, `ref`
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub symbol: SymbolId,
    /// Identifier for reads; the writing node for writes
    pub node: NodeId,
    pub kind: AccessKind,
}

/// Accesses performed by a CFG operation or branch condition, in evaluation order.
/// Lambda and local function bodies are not entered.
pub fn variable_accesses(model: &SemanticModel, op: Node<'_>) -> Vec<Access> {
    let mut out = Vec::new();
    let mut collector = Collector { model, out: &mut out };
    collector.operation(op);
    out
}

/// Variables referenced inside nested lambdas and local functions under `body`
pub fn captured_symbols(model: &SemanticModel, body: Node<'_>) -> BTreeSet<SymbolId> {
    let mut captured = BTreeSet::new();
    for nested in body
        .descendants()
        .filter(|n| n.id() != body.id() && n.kind().is_nested_function())
    {
        for node in nested.descendants() {
            if node.kind() == K::IdentifierName {
                if let Some(symbol) = model.referenced_symbol(node.id()) {
                    if model.symbol(symbol).kind.is_variable() {
                        captured.insert(symbol);
                    }
                }
            }
        }
    }
    captured
}

/// The local or parameter an expression denotes, looking through parentheses
pub fn variable_of(model: &SemanticModel, expr: Node<'_>) -> Option<SymbolId> {
    let expr = expr.unparenthesized();
    if expr.kind() != K::IdentifierName {
        return None;
    }
    model
        .referenced_symbol(expr.id())
        .filter(|&s| model.symbol(s).kind.is_variable())
}

struct Collector<'m, 'o> {
    model: &'m SemanticModel,
    out: &'o mut Vec<Access>,
}

impl Collector<'_, '_> {
    fn push(&mut self, symbol: SymbolId, node: Node<'_>, kind: AccessKind) {
        self.out.push(Access {
            symbol,
            node: node.id(),
            kind,
        });
    }

    fn declared(&mut self, node: Node<'_>) {
        if let Some(symbol) = self.model.declared_symbol(node.id()) {
            self.push(symbol, node, AccessKind::Write);
        }
    }

    fn operation(&mut self, op: Node<'_>) {
        match op.kind() {
            K::VariableDeclarator => {
                if let Some(init) = op.child(0) {
                    self.expr(init);
                    self.declared(op);
                }
                // uninitialised declarations define nothing
            }
            K::ForEachStmt | K::CatchDeclaration => self.declared(op),
            K::UsingStmt => {
                // implicit disposal reads the resource
                if let Some(resource) = op.child(0) {
                    if resource.kind() == K::VariableDeclaration {
                        for declarator in resource.children_of_kind(K::VariableDeclarator) {
                            if let Some(symbol) = self.model.declared_symbol(declarator.id()) {
                                self.push(symbol, declarator, AccessKind::Read);
                            }
                        }
                    } else if let Some(symbol) = variable_of(self.model, resource) {
                        self.push(symbol, resource, AccessKind::Read);
                    }
                }
            }
            K::CaseLabel => {
                for child in op.children() {
                    self.expr(child);
                }
            }
            _ => self.expr(op),
        }
    }

    fn expr(&mut self, node: Node<'_>) {
        match node.kind() {
            kind if kind.is_nested_function() => {}
            K::IdentifierName => {
                if let Some(symbol) = variable_of(self.model, node) {
                    self.push(symbol, node, AccessKind::Read);
                }
            }
            K::AssignmentExpr => {
                let (Some(target), Some(value)) = (node.child(0), node.child(1)) else {
                    return;
                };
                let plain = node.token_kind() == Some(TokenKind::Eq);
                match variable_of(self.model, target) {
                    Some(symbol) if plain => {
                        self.expr(value);
                        self.push(symbol, node, AccessKind::Write);
                    }
                    Some(symbol) => {
                        self.push(symbol, target.unparenthesized(), AccessKind::Read);
                        self.expr(value);
                        self.push(symbol, node, AccessKind::ReadWrite);
                    }
                    None => {
                        self.expr(target);
                        self.expr(value);
                    }
                }
            }
            K::PrefixUnaryExpr | K::PostfixUnaryExpr
                if matches!(node.token_kind(), Some(TokenKind::PlusPlus | TokenKind::MinusMinus)) =>
            {
                match node.child(0).and_then(|o| variable_of(self.model, o)) {
                    Some(symbol) => {
                        if let Some(operand) = node.child(0) {
                            self.push(symbol, operand.unparenthesized(), AccessKind::Read);
                        }
                        self.push(symbol, node, AccessKind::ReadWrite);
                    }
                    None => self.children(node),
                }
            }
            K::Argument => {
                let Some(value) = node.child(0) else {
                    return;
                };
                match node.token_kind() {
                    Some(TokenKind::Keyword(crate::syntax::Keyword::Out)) => {
                        if value.kind() == K::DeclarationExpr {
                            self.declared(value);
                        } else if let Some(symbol) = variable_of(self.model, value) {
                            self.push(symbol, node, AccessKind::Write);
                        } else {
                            self.expr(value);
                        }
                    }
                    Some(TokenKind::Keyword(crate::syntax::Keyword::Ref)) => {
                        if let Some(symbol) = variable_of(self.model, value) {
                            self.push(symbol, value.unparenthesized(), AccessKind::Read);
                            self.push(symbol, node, AccessKind::ReadWrite);
                        } else {
                            self.expr(value);
                        }
                    }
                    _ => self.expr(value),
                }
            }
            K::DeclarationExpr | K::DeclarationPattern | K::VarPattern => {
                self.children(node);
                self.declared(node);
            }
            _ => self.children(node),
        }
    }

    fn children(&mut self, node: Node<'_>) {
        for child in node.children() {
            if !child.kind().is_type() {
                self.expr(child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, ParseOptions, SyntaxTree};

    fn accesses_of(body: &str, op_text: &str) -> Vec<(String, AccessKind)> {
        let text = format!("class C {{ void M(int p, ref int r) {{ int a = 0, b = 1; {} }} }}", body);
        let tree: SyntaxTree = parse(&text, &ParseOptions::default());
        let model = SemanticModel::bind(&tree);
        let op = tree.preorder().find(|n| n.text() == op_text).unwrap();
        variable_accesses(&model, op)
            .into_iter()
            .map(|a| (model.symbol(a.symbol).name.clone(), a.kind))
            .collect()
    }

    #[test]
    fn test_assignment_order() {
        assert_eq!(
            accesses_of("a = b + p;", "a = b + p"),
            vec![
                ("b".to_string(), AccessKind::Read),
                ("p".to_string(), AccessKind::Read),
                ("a".to_string(), AccessKind::Write),
            ]
        );
        assert_eq!(
            accesses_of("a += b;", "a += b"),
            vec![
                ("a".to_string(), AccessKind::Read),
                ("b".to_string(), AccessKind::Read),
                ("a".to_string(), AccessKind::ReadWrite),
            ]
        );
    }

    #[test]
    fn test_declarator_and_out_arguments() {
        assert_eq!(
            accesses_of("int c = a;", "c = a"),
            vec![("a".to_string(), AccessKind::Read), ("c".to_string(), AccessKind::Write)]
        );
        assert_eq!(
            accesses_of("Parse(b, out a, out var d);", "Parse(b, out a, out var d)"),
            vec![
                ("b".to_string(), AccessKind::Read),
                ("a".to_string(), AccessKind::Write),
                ("d".to_string(), AccessKind::Write),
            ]
        );
    }

    #[test]
    fn test_lambda_bodies_are_not_entered() {
        assert_eq!(
            accesses_of("Run(() => a++);", "Run(() => a++)"),
            Vec::<(String, AccessKind)>::new()
        );
        let text = "class C { void M() { int a = 0; Run(() => a++); int b = 1; } }";
        let tree = parse(text, &ParseOptions::default());
        let model = SemanticModel::bind(&tree);
        let body = tree.preorder().find(|n| n.kind() == K::Block).unwrap();
        let captured: Vec<String> = captured_symbols(&model, body)
            .into_iter()
            .map(|s| model.symbol(s).name.clone())
            .collect();
        assert_eq!(captured, vec!["a".to_string()]);
    }
}
