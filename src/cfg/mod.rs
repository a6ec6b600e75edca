//! Per-member control-flow graphs

pub mod builder;

pub use builder::build;

use crate::syntax::NodeId;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Entry,
    /// Normal completion and returns
    Exit,
    /// Uncaught exceptions
    ExceptionExit,
    Normal,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub kind: BlockKind,
    /// Syntax-level operations in evaluation order
    pub operations: Vec<NodeId>,
    /// Condition evaluated at the end of the block; its `True`/`False` edges refer to it
    pub branch: Option<NodeId>,
    pub reachable: bool,
}

impl BasicBlock {
    /// No operations, no condition: control only passes through
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.branch.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Fallthrough,
    True,
    False,
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

/// Where a jump statement goes, and where control would go without it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpInfo {
    pub node: NodeId,
    pub target: BlockId,
    pub fallthrough: BlockId,
}

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    owner: NodeId,
    blocks: Vec<BasicBlock>,
    edges: Vec<Edge>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    entry: BlockId,
    exit: BlockId,
    exception_exit: BlockId,
    jumps: Vec<JumpInfo>,
    locations: HashMap<NodeId, BlockId>,
}

impl ControlFlowGraph {
    pub(crate) fn new(
        owner: NodeId,
        blocks: Vec<BasicBlock>,
        edges: Vec<Edge>,
        entry: BlockId,
        exit: BlockId,
        exception_exit: BlockId,
        jumps: Vec<JumpInfo>,
    ) -> Self {
        let mut successors = vec![Vec::new(); blocks.len()];
        let mut predecessors = vec![Vec::new(); blocks.len()];
        for (i, edge) in edges.iter().enumerate() {
            successors[edge.from.index()].push(i);
            predecessors[edge.to.index()].push(i);
        }
        let mut locations = HashMap::new();
        for block in &blocks {
            for &op in block.operations.iter().chain(block.branch.iter()) {
                locations.entry(op).or_insert(block.id);
            }
        }
        Self {
            owner,
            blocks,
            edges,
            successors,
            predecessors,
            entry,
            exit,
            exception_exit,
            jumps,
            locations,
        }
    }

    /// The member declaration this graph was built for
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn exit(&self) -> BlockId {
        self.exit
    }

    pub fn exception_exit(&self) -> BlockId {
        self.exception_exit
    }

    pub fn successors(&self, id: BlockId) -> impl Iterator<Item = &Edge> + '_ {
        self.successors[id.index()].iter().map(|&e| &self.edges[e])
    }

    pub fn predecessors(&self, id: BlockId) -> impl Iterator<Item = &Edge> + '_ {
        self.predecessors[id.index()].iter().map(|&e| &self.edges[e])
    }

    pub fn jumps(&self) -> &[JumpInfo] {
        &self.jumps
    }

    pub fn jump(&self, node: NodeId) -> Option<&JumpInfo> {
        self.jumps.iter().find(|j| j.node == node)
    }

    /// Block holding an operation or branch condition
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.locations.get(&node).copied()
    }

    pub fn is_reachable(&self, id: BlockId) -> bool {
        self.block(id).reachable
    }

    /// Reachable blocks in reverse post-order from the entry
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut order = self.postorder();
        order.reverse();
        order
    }

    /// Reachable blocks in post-order from the entry
    pub fn postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        visited[self.entry.index()] = true;
        while let Some((block, next)) = stack.pop() {
            let succ = &self.successors[block.index()];
            if next < succ.len() {
                stack.push((block, next + 1));
                let target = self.edges[succ[next]].to;
                if !visited[target.index()] {
                    visited[target.index()] = true;
                    stack.push((target, 0));
                }
            } else {
                order.push(block);
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, ParseOptions, SyntaxKind, SyntaxTree};

    fn method_cfg(tree: &SyntaxTree) -> ControlFlowGraph {
        let method = tree
            .preorder()
            .find(|n| n.kind() == SyntaxKind::MethodDecl)
            .unwrap();
        build(method)
    }

    #[test]
    fn test_orders_cover_reachable_blocks() {
        let tree = parse(
            "class C { void M(bool c) { if (c) { A(); } else { B(); } C(); } }",
            &ParseOptions::default(),
        );
        let cfg = method_cfg(&tree);
        let rpo = cfg.reverse_postorder();
        assert_eq!(rpo[0], cfg.entry());
        assert_eq!(rpo.len(), cfg.postorder().len());
        assert!(rpo.iter().all(|&b| cfg.is_reachable(b)));
        assert_eq!(*rpo.last().unwrap(), cfg.exit());
    }
}
