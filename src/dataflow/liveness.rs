//! Backward live-variable analysis and dead-store detection

use super::access::{captured_symbols, variable_accesses, Access, AccessKind};
use super::{solve, Analysis, Deadline, Direction, Timeout};
use crate::cfg::{BasicBlock, ControlFlowGraph};
use crate::semantic::{SemanticModel, SymbolId, SymbolKind};
use crate::syntax::{Keyword, Node, NodeId, SyntaxKind, SyntaxTree, TokenKind};
use std::collections::BTreeSet;

use SyntaxKind as K;

/// Initial values that are conventionally written and then overwritten
const DEFAULT_VALUES: &[&str] = &[
    "null",
    "true",
    "false",
    "0",
    "1",
    "-1",
    "\"\"",
    "default",
    "string.Empty",
    "String.Empty",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSet {
    reached: bool,
    live: BTreeSet<SymbolId>,
}

impl LiveSet {
    pub fn contains(&self, symbol: SymbolId) -> bool {
        self.live.contains(&symbol)
    }

    fn apply(&mut self, access: &Access) {
        match access.kind {
            AccessKind::Write => {
                self.live.remove(&access.symbol);
            }
            AccessKind::Read | AccessKind::ReadWrite => {
                self.live.insert(access.symbol);
            }
        }
    }
}

pub struct LivenessAnalysis<'a> {
    tree: &'a SyntaxTree,
    model: &'a SemanticModel,
}

impl<'a> LivenessAnalysis<'a> {
    pub fn new(tree: &'a SyntaxTree, model: &'a SemanticModel) -> Self {
        Self { tree, model }
    }

    /// Accesses of a block in program order
    fn block_accesses(&self, block: &BasicBlock) -> Vec<Access> {
        let mut accesses = Vec::new();
        for &op in block.operations.iter().chain(block.branch.iter()) {
            accesses.extend(variable_accesses(self.model, self.tree.node(op)));
        }
        accesses
    }
}

impl Analysis for LivenessAnalysis<'_> {
    type State = LiveSet;

    fn direction(&self) -> Direction {
        Direction::Backward
    }

    fn boundary_state(&self) -> LiveSet {
        LiveSet {
            reached: true,
            live: BTreeSet::new(),
        }
    }

    fn bottom(&self) -> LiveSet {
        LiveSet {
            reached: false,
            live: BTreeSet::new(),
        }
    }

    fn join(&self, left: &LiveSet, right: &LiveSet) -> LiveSet {
        LiveSet {
            reached: left.reached || right.reached,
            live: left.live.union(&right.live).copied().collect(),
        }
    }

    fn transfer_block(&self, _cfg: &ControlFlowGraph, block: &BasicBlock, state: &mut LiveSet) {
        for access in self.block_accesses(block).iter().rev() {
            state.apply(access);
        }
    }
}

/// A value written to a local and never read afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadStore {
    pub symbol: SymbolId,
    /// Assignment expression or variable declarator
    pub node: NodeId,
}

/// Locals whose stores cannot be judged by path-insensitive liveness
fn excluded_locals(model: &SemanticModel, member: Node<'_>) -> BTreeSet<SymbolId> {
    let mut excluded = captured_symbols(model, member);
    for node in member.descendants() {
        match node.kind() {
            K::Argument
                if matches!(
                    node.token_kind(),
                    Some(TokenKind::Keyword(Keyword::Ref | Keyword::Out | Keyword::In))
                ) =>
            {
                if let Some(symbol) = node.child(0).and_then(|v| super::access::variable_of(model, v)) {
                    excluded.insert(symbol);
                }
            }
            K::CatchClause | K::FinallyClause => {
                for inner in node.descendants() {
                    if inner.kind() == K::IdentifierName {
                        if let Some(symbol) = model.referenced_symbol(inner.id()) {
                            excluded.insert(symbol);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    excluded
}

fn is_default_value(value: Node<'_>) -> bool {
    let compact: String = value.unparenthesized().text().split_whitespace().collect();
    DEFAULT_VALUES.contains(&compact.as_str())
}

/// The stored value when `access` is a plain store worth reporting
fn stored_value<'t>(tree: &'t SyntaxTree, access: &Access) -> Option<Node<'t>> {
    let node = tree.node(access.node);
    match node.kind() {
        K::VariableDeclarator => node.child(0),
        K::AssignmentExpr if node.token_kind() == Some(TokenKind::Eq) => node.child(1),
        _ => None,
    }
}

/// Dead stores in one member, ordered by position
pub fn dead_stores(
    tree: &SyntaxTree,
    model: &SemanticModel,
    member: Node<'_>,
    cfg: &ControlFlowGraph,
    deadline: &Deadline,
) -> Result<Vec<DeadStore>, Timeout> {
    let analysis = LivenessAnalysis::new(tree, model);
    let results = solve(cfg, &analysis, deadline)?;
    let excluded = excluded_locals(model, member);
    let reportable = |symbol: SymbolId| {
        let sym = model.symbol(symbol);
        sym.kind == SymbolKind::Local
            && !sym.modifiers.is_using
            && !sym.modifiers.is_const
            && !excluded.contains(&symbol)
    };

    let mut stores = Vec::new();
    for block in cfg.blocks().iter().filter(|b| b.reachable) {
        let mut live = results.exit_state(block.id).clone();
        for access in analysis.block_accesses(block).iter().rev() {
            if access.kind == AccessKind::Write && !live.contains(access.symbol) && reportable(access.symbol) {
                if let Some(value) = stored_value(tree, access) {
                    if !is_default_value(value) {
                        stores.push(DeadStore {
                            symbol: access.symbol,
                            node: access.node,
                        });
                    }
                }
            }
            live.apply(access);
        }
    }
    stores.sort_by_key(|s| tree.node(s.node).span().start);
    stores.dedup_by_key(|s| s.node);
    Ok(stores)
}
