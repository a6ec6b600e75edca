//! Forward disposal-state analysis of locally created disposables

use super::access::{captured_symbols, variable_of};
use super::{solve, Analysis, Deadline, Direction, Timeout};
use crate::cfg::{BasicBlock, ControlFlowGraph};
use crate::semantic::{KnownTypes, SemanticModel, SymbolId, SymbolKind};
use crate::syntax::{Keyword, Node, NodeId, SyntaxKind, SyntaxTree, TokenKind};
use std::collections::{BTreeMap, BTreeSet};

use SyntaxKind as K;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    NotCreated,
    Created,
    Disposed,
    Escaped,
    Unknown,
}

impl Disposal {
    pub fn join(self, other: Disposal) -> Disposal {
        use Disposal::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Escaped, _) | (_, Escaped) => Escaped,
            (NotCreated, x) | (x, NotCreated) => x,
            _ => Unknown,
        }
    }
}

/// Disposal state plus the creations that may be live
#[derive(Debug, Clone, PartialEq, Eq)]
struct Tracked {
    value: Disposal,
    sites: BTreeSet<NodeId>,
}

impl Tracked {
    fn of(value: Disposal) -> Self {
        Self {
            value,
            sites: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposalState {
    reached: bool,
    vars: BTreeMap<SymbolId, Tracked>,
}

impl DisposalState {
    fn unreached() -> Self {
        Self {
            reached: false,
            vars: BTreeMap::new(),
        }
    }

    pub fn get(&self, symbol: SymbolId) -> Disposal {
        self.vars.get(&symbol).map_or(Disposal::NotCreated, |t| t.value)
    }

    fn set(&mut self, symbol: SymbolId, value: Disposal) {
        if value == Disposal::NotCreated {
            self.vars.remove(&symbol);
        } else {
            self.vars.insert(symbol, Tracked::of(value));
        }
    }

    fn join(&self, other: &DisposalState) -> DisposalState {
        if !self.reached {
            return other.clone();
        }
        if !other.reached {
            return self.clone();
        }
        let mut vars = BTreeMap::new();
        let keys: BTreeSet<SymbolId> = self.vars.keys().chain(other.vars.keys()).copied().collect();
        for symbol in keys {
            let value = self.get(symbol).join(other.get(symbol));
            if value == Disposal::NotCreated {
                continue;
            }
            let mut tracked = Tracked::of(value);
            if value == Disposal::Created {
                for side in [&self.vars, &other.vars] {
                    if let Some(t) = side.get(&symbol) {
                        tracked.sites.extend(t.sites.iter().copied());
                    }
                }
            }
            vars.insert(symbol, tracked);
        }
        DisposalState { reached: true, vars }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DisposalIssue {
    /// Created and neither disposed nor handed off
    NotDisposed,
    /// Disposed explicitly after an earlier or implicit disposal
    DisposedTwice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisposalFinding {
    pub symbol: SymbolId,
    /// Creation expression for leaks, dispose invocation for double disposal
    pub node: NodeId,
    pub issue: DisposalIssue,
}

pub struct DisposalAnalysis<'a> {
    tree: &'a SyntaxTree,
    model: &'a SemanticModel,
    member: NodeId,
    captured: BTreeSet<SymbolId>,
}

impl<'a> DisposalAnalysis<'a> {
    pub fn new(tree: &'a SyntaxTree, model: &'a SemanticModel, member: Node<'a>) -> Self {
        Self {
            tree,
            model,
            member: member.id(),
            captured: captured_symbols(model, member),
        }
    }

    fn tracked(&self, symbol: SymbolId) -> bool {
        let sym = self.model.symbol(symbol);
        sym.kind.is_variable() && !self.captured.contains(&symbol) && self.model.is_disposable(&sym.ty)
    }

    fn tracked_var(&self, expr: Node<'_>) -> Option<SymbolId> {
        variable_of(self.model, expr).filter(|&s| self.tracked(s))
    }

    fn declared_var(&self, node: Node<'_>) -> Option<SymbolId> {
        self.model.declared_symbol(node.id()).filter(|&s| self.tracked(s))
    }

    /// `new T(..)` of a disposable type
    fn creation(&self, expr: Node<'_>) -> Option<NodeId> {
        let expr = expr.unparenthesized();
        (expr.kind() == K::ObjectCreationExpr && self.model.is_disposable(&self.model.type_of(expr)))
            .then(|| expr.id())
    }

    /// Disposed implicitly by a `using` declaration or an enclosing `using` statement
    fn using_owned(&self, symbol: SymbolId, at: Node<'_>) -> bool {
        if self.model.symbol(symbol).modifiers.is_using {
            return true;
        }
        at.ancestors()
            .take_while(|a| a.id() != self.member)
            .filter(|a| a.kind() == K::UsingStmt)
            .any(|using| {
                let in_body = using.child(1).is_some_and(|body| at.is_descendant_of(body));
                in_body && using.child(0).and_then(|r| variable_of(self.model, r)) == Some(symbol)
            })
    }
}

impl Analysis for DisposalAnalysis<'_> {
    type State = DisposalState;

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn boundary_state(&self) -> DisposalState {
        let mut state = DisposalState {
            reached: true,
            vars: BTreeMap::new(),
        };
        if let Some(owner) = self.model.declared_symbol(self.member) {
            for (id, symbol) in self.model.symbols().iter() {
                if symbol.kind == SymbolKind::Parameter && symbol.container == Some(owner) && self.tracked(id) {
                    state.set(id, Disposal::Unknown);
                }
            }
        }
        state
    }

    fn bottom(&self) -> DisposalState {
        DisposalState::unreached()
    }

    fn join(&self, left: &DisposalState, right: &DisposalState) -> DisposalState {
        left.join(right)
    }

    fn transfer_block(&self, _cfg: &ControlFlowGraph, block: &BasicBlock, state: &mut DisposalState) {
        Walker {
            analysis: self,
            findings: None,
        }
        .block(block, state);
    }
}

struct Walker<'a, 'f> {
    analysis: &'a DisposalAnalysis<'a>,
    findings: Option<&'f mut Vec<DisposalFinding>>,
}

impl Walker<'_, '_> {
    fn report(&mut self, symbol: SymbolId, node: NodeId, issue: DisposalIssue) {
        if let Some(findings) = self.findings.as_deref_mut() {
            findings.push(DisposalFinding { symbol, node, issue });
        }
    }

    fn block(&mut self, block: &BasicBlock, state: &mut DisposalState) {
        if !state.reached {
            return;
        }
        let tree = self.analysis.tree;
        for &op in &block.operations {
            self.operation(tree.node(op), state);
        }
        if let Some(branch) = block.branch {
            let node = tree.node(branch);
            if node.kind() == K::CaseLabel {
                if let Some(filter) = node.child_of_kind(K::WhenClause) {
                    self.visit(filter, state);
                }
            } else if !is_foreach_collection(node) {
                self.visit(node, state);
            }
        }
    }

    fn operation(&mut self, op: Node<'_>, state: &mut DisposalState) {
        let analysis = self.analysis;
        match op.kind() {
            K::VariableDeclarator => {
                let Some(init) = op.child(0) else {
                    return;
                };
                let site = analysis.creation(init);
                match site {
                    Some(_) => self.visit_children(init.unparenthesized(), state),
                    None => self.visit(init, state),
                }
                if let Some(symbol) = analysis.declared_var(op) {
                    self.assign(symbol, site, state);
                }
            }
            K::ForEachStmt => {
                if let Some(symbol) = analysis.declared_var(op) {
                    state.set(symbol, Disposal::NotCreated);
                }
            }
            K::CatchDeclaration => {}
            K::UsingStmt => {
                let Some(resource) = op.child(0) else {
                    return;
                };
                let symbols: Vec<SymbolId> = if resource.kind() == K::VariableDeclaration {
                    resource
                        .children_of_kind(K::VariableDeclarator)
                        .filter_map(|d| analysis.declared_var(d))
                        .collect()
                } else {
                    analysis.tracked_var(resource).into_iter().collect()
                };
                for symbol in symbols {
                    state.set(symbol, Disposal::Disposed);
                }
            }
            _ if is_using_resource(op) || is_foreach_collection(op) => {
                if analysis.tracked_var(op).is_none() {
                    self.visit(op, state);
                }
            }
            _ => self.visit(op, state),
        }
    }

    /// A variable now holds a fresh creation (`site`) or some other value
    fn assign(&mut self, symbol: SymbolId, site: Option<NodeId>, state: &mut DisposalState) {
        if let Some(previous) = state.vars.get(&symbol) {
            if previous.value == Disposal::Created {
                let sites: Vec<NodeId> = previous.sites.iter().copied().collect();
                for earlier in sites {
                    self.report(symbol, earlier, DisposalIssue::NotDisposed);
                }
            }
        }
        let owned_implicitly = self.analysis.model.symbol(symbol).modifiers.is_using;
        match site {
            Some(_) if owned_implicitly => state.set(symbol, Disposal::Unknown),
            Some(site) => {
                let mut tracked = Tracked::of(Disposal::Created);
                tracked.sites.insert(site);
                state.vars.insert(symbol, tracked);
            }
            None => state.set(symbol, Disposal::NotCreated),
        }
    }

    fn dispose(&mut self, symbol: SymbolId, invocation: Node<'_>, state: &mut DisposalState) {
        let already = state.get(symbol) == Disposal::Disposed
            || self.analysis.using_owned(symbol, invocation);
        if already {
            self.report(symbol, invocation.id(), DisposalIssue::DisposedTwice);
        }
        state.set(symbol, Disposal::Disposed);
    }

    fn escape(&mut self, symbol: SymbolId, state: &mut DisposalState) {
        state.set(symbol, Disposal::Escaped);
    }

    fn visit(&mut self, node: Node<'_>, state: &mut DisposalState) {
        let analysis = self.analysis;
        match node.kind() {
            kind if kind.is_nested_function() || kind.is_type() => {}
            K::IdentifierName => {
                if let Some(symbol) = analysis.tracked_var(node) {
                    self.escape(symbol, state);
                }
            }
            K::MemberAccessExpr
            | K::ConditionalAccessExpr
            | K::ElementAccessExpr
            | K::ConditionalElementAccessExpr => {
                // using an object is not handing it off
                for (i, child) in node.children().enumerate() {
                    if i == 0 && analysis.tracked_var(child).is_some() {
                        continue;
                    }
                    self.visit(child, state);
                }
            }
            K::InvocationExpr => {
                let disposed = node.child(0).and_then(|callee| {
                    let is_dispose = matches!(callee.kind(), K::MemberAccessExpr | K::ConditionalAccessExpr)
                        && callee.name().is_some_and(KnownTypes::is_dispose_method);
                    if is_dispose {
                        callee.child(0).and_then(|r| analysis.tracked_var(r))
                    } else {
                        None
                    }
                });
                match disposed {
                    Some(symbol) => {
                        if let Some(args) = node.child(1) {
                            self.visit(args, state);
                        }
                        self.dispose(symbol, node, state);
                    }
                    None => self.visit_children(node, state),
                }
            }
            K::BinaryExpr if matches!(node.token_kind(), Some(TokenKind::EqEq | TokenKind::BangEq)) => {
                self.visit_compared(node, state)
            }
            K::IsPatternExpr => self.visit_compared(node, state),
            K::AssignmentExpr => {
                let (Some(target), Some(value)) = (node.child(0), node.child(1)) else {
                    return;
                };
                match analysis.tracked_var(target) {
                    Some(symbol) if node.token_kind() == Some(TokenKind::Eq) => {
                        if analysis.tracked_var(value) == Some(symbol) {
                            return;
                        }
                        let site = analysis.creation(value);
                        match site {
                            Some(_) => self.visit_children(value.unparenthesized(), state),
                            None => self.visit(value, state),
                        }
                        self.assign(symbol, site, state);
                    }
                    Some(_) => self.visit(value, state),
                    None => {
                        self.visit(target, state);
                        self.visit(value, state);
                    }
                }
            }
            K::Argument => {
                let Some(value) = node.child(0) else {
                    return;
                };
                let by_ref = matches!(
                    node.token_kind(),
                    Some(TokenKind::Keyword(Keyword::Out | Keyword::Ref))
                );
                match analysis.tracked_var(value) {
                    Some(symbol) if by_ref => self.escape(symbol, state),
                    _ => self.visit(value, state),
                }
            }
            _ => self.visit_children(node, state),
        }
    }

    fn visit_children(&mut self, node: Node<'_>, state: &mut DisposalState) {
        for child in node.children() {
            self.visit(child, state);
        }
    }

    /// Comparing or type-testing a variable does not hand it off
    fn visit_compared(&mut self, node: Node<'_>, state: &mut DisposalState) {
        for child in node.children() {
            if self.analysis.tracked_var(child).is_none() && !child.kind().is_pattern() {
                self.visit(child, state);
            }
        }
    }
}

fn is_foreach_collection(node: Node<'_>) -> bool {
    node.parent()
        .is_some_and(|p| p.kind() == K::ForEachStmt && p.child(1).map(|c| c.id()) == Some(node.id()))
}

fn is_using_resource(node: Node<'_>) -> bool {
    node.parent()
        .is_some_and(|p| p.kind() == K::UsingStmt && p.child(0).map(|c| c.id()) == Some(node.id()))
}

/// Leaked creations and repeated disposals in one member, ordered by position
pub fn disposal_findings(
    tree: &SyntaxTree,
    model: &SemanticModel,
    member: Node<'_>,
    cfg: &ControlFlowGraph,
    deadline: &Deadline,
) -> Result<Vec<DisposalFinding>, Timeout> {
    let analysis = DisposalAnalysis::new(tree, model, member);
    let results = solve(cfg, &analysis, deadline)?;
    let mut findings = Vec::new();
    for block in cfg.blocks().iter().filter(|b| b.reachable) {
        let mut state = results.entry_state(block.id).clone();
        Walker {
            analysis: &analysis,
            findings: Some(&mut findings),
        }
        .block(block, &mut state);
    }
    let at_exit = results.entry_state(cfg.exit());
    if at_exit.reached {
        for (&symbol, tracked) in &at_exit.vars {
            if tracked.value == Disposal::Created && !model.symbol(symbol).modifiers.is_using {
                for &site in &tracked.sites {
                    findings.push(DisposalFinding {
                        symbol,
                        node: site,
                        issue: DisposalIssue::NotDisposed,
                    });
                }
            }
        }
    }
    let mut seen = BTreeSet::new();
    findings.retain(|f| seen.insert((f.node, f.issue)));
    findings.sort_by_key(|f| tree.node(f.node).span().start);
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg;
    use crate::syntax::{parse, ParseOptions};

    fn findings(params: &str, body: &str) -> Vec<(String, DisposalIssue, usize)> {
        let text = format!(
            "using System.IO;\nclass C {{\n void M({}) {{\n{}\n }}\n}}",
            params, body
        );
        let tree = parse(&text, &ParseOptions::default());
        let model = SemanticModel::bind(&tree);
        let method = tree.preorder().find(|n| n.kind() == K::MethodDecl).unwrap();
        let graph = cfg::build(method);
        disposal_findings(&tree, &model, method, &graph, &Deadline::none())
            .unwrap()
            .into_iter()
            .map(|f| (model.symbol(f.symbol).name.clone(), f.issue, tree.node(f.node).line()))
            .collect()
    }

    #[test]
    fn test_lattice_join() {
        use Disposal::*;
        assert_eq!(Created.join(Disposed), Unknown);
        assert_eq!(NotCreated.join(Created), Created);
        assert_eq!(Escaped.join(Disposed), Escaped);
        assert_eq!(Disposed.join(Disposed), Disposed);
        assert_eq!(Created.join(Unknown), Unknown);
    }

    #[test]
    fn test_created_but_never_disposed() {
        assert_eq!(
            findings("", "var fs = new FileStream(\"a\", FileMode.Open);\nfs.WriteByte(1);"),
            vec![("fs".to_string(), DisposalIssue::NotDisposed, 4)]
        );
        assert_eq!(
            findings("bool c", "FileStream fs = null;\nif (c) { fs = new FileStream(\"a\"); }"),
            vec![("fs".to_string(), DisposalIssue::NotDisposed, 5)]
        );
    }

    #[test]
    fn test_disposed_escaped_or_using_are_silent() {
        assert!(findings("", "var fs = new FileStream(\"a\");\nfs.Dispose();").is_empty());
        assert!(findings("", "var fs = new FileStream(\"a\");\nKeep(fs);").is_empty());
        assert!(findings("", "using (var fs = new FileStream(\"a\")) { fs.WriteByte(1); }").is_empty());
        assert!(findings("", "using var fs = new FileStream(\"a\");\nfs.WriteByte(1);").is_empty());
        assert!(findings("", "var fs = new FileStream(\"a\");\nif (fs != null) { fs.Close(); }").is_empty());
    }

    #[test]
    fn test_reassignment_leaks_earlier_instance() {
        assert_eq!(
            findings("", "var s = new MemoryStream();\ns = new MemoryStream();\ns.Dispose();"),
            vec![("s".to_string(), DisposalIssue::NotDisposed, 4)]
        );
    }

    #[test]
    fn test_disposed_more_than_once() {
        assert_eq!(
            findings("", "var fs = new FileStream(\"a\");\nfs.Dispose();\nfs.Dispose();"),
            vec![("fs".to_string(), DisposalIssue::DisposedTwice, 6)]
        );
        assert_eq!(
            findings("", "var s = new MemoryStream();\nusing (s) { }\ns.Dispose();"),
            vec![("s".to_string(), DisposalIssue::DisposedTwice, 6)]
        );
        assert_eq!(
            findings("", "using (var s = new MemoryStream())\n{\ns.Dispose();\n}"),
            vec![("s".to_string(), DisposalIssue::DisposedTwice, 6)]
        );
        assert_eq!(
            findings("Stream p", "p.Dispose();\np.Dispose();"),
            vec![("p".to_string(), DisposalIssue::DisposedTwice, 5)]
        );
    }
}
