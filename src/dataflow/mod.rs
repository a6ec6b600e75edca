//! Worklist fixed-point solver and the flow analyses built on it

pub mod access;
pub mod disposal;
pub mod liveness;
pub mod nullness;

use crate::cfg::{BasicBlock, BlockId, BlockKind, ControlFlowGraph, Edge};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Analysis ran past its per-file budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("analysis exceeded its time budget of {budget_ms} ms")]
pub struct Timeout {
    pub budget_ms: u64,
}

/// Cooperative per-file deadline
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
    budget_ms: u64,
}

impl Deadline {
    pub fn none() -> Self {
        Self {
            at: None,
            budget_ms: 0,
        }
    }

    /// `0` disables the deadline
    pub fn after_ms(budget_ms: u64) -> Self {
        if budget_ms == 0 {
            return Self::none();
        }
        Self {
            at: Instant::now().checked_add(Duration::from_millis(budget_ms)),
            budget_ms,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    pub fn check(&self) -> Result<(), Timeout> {
        if self.is_expired() {
            Err(Timeout {
                budget_ms: self.budget_ms,
            })
        } else {
            Ok(())
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A monotone data-flow problem over a control-flow graph.
///
/// `bottom()` is the identity of `join` and marks blocks no path has reached yet.
pub trait Analysis {
    type State: Clone + PartialEq;

    fn direction(&self) -> Direction;

    /// State at the entry (forward) or at the exits (backward)
    fn boundary_state(&self) -> Self::State;

    fn bottom(&self) -> Self::State;

    fn join(&self, left: &Self::State, right: &Self::State) -> Self::State;

    /// Forward: program-order transfer. Backward: from block end to block start.
    fn transfer_block(&self, cfg: &ControlFlowGraph, block: &BasicBlock, state: &mut Self::State);

    /// Refine a state flowing along one edge
    fn transfer_edge(&self, _cfg: &ControlFlowGraph, _edge: &Edge, state: &Self::State) -> Self::State {
        state.clone()
    }
}

/// Fixed-point states per block, in program order: `entry` is before the
/// block's first operation and `exit` after its branch, whatever the direction.
#[derive(Debug, Clone)]
pub struct DataflowResults<S> {
    pub entry: Vec<S>,
    pub exit: Vec<S>,
    pub iterations: usize,
}

impl<S> DataflowResults<S> {
    pub fn entry_state(&self, block: BlockId) -> &S {
        &self.entry[block.index()]
    }

    pub fn exit_state(&self, block: BlockId) -> &S {
        &self.exit[block.index()]
    }
}

pub fn solve<A: Analysis>(
    cfg: &ControlFlowGraph,
    analysis: &A,
    deadline: &Deadline,
) -> Result<DataflowResults<A::State>, Timeout> {
    let count = cfg.blocks().len();
    let mut entry = vec![analysis.bottom(); count];
    let mut exit = vec![analysis.bottom(); count];
    let direction = analysis.direction();

    let order = match direction {
        Direction::Forward => cfg.reverse_postorder(),
        Direction::Backward => cfg.postorder(),
    };
    let mut queued = vec![false; count];
    let mut worklist: VecDeque<BlockId> = VecDeque::with_capacity(order.len());
    for &block in &order {
        queued[block.index()] = true;
        worklist.push_back(block);
    }

    let mut iterations = 0;
    while let Some(id) = worklist.pop_front() {
        deadline.check()?;
        iterations += 1;
        queued[id.index()] = false;
        let block = cfg.block(id);

        match direction {
            Direction::Forward => {
                let mut input = if id == cfg.entry() {
                    analysis.boundary_state()
                } else {
                    analysis.bottom()
                };
                for edge in cfg.predecessors(id) {
                    let refined = analysis.transfer_edge(cfg, edge, &exit[edge.from.index()]);
                    input = analysis.join(&input, &refined);
                }
                let mut output = input.clone();
                analysis.transfer_block(cfg, block, &mut output);
                entry[id.index()] = input;
                if output != exit[id.index()] {
                    exit[id.index()] = output;
                    for edge in cfg.successors(id) {
                        let next = edge.to;
                        if !queued[next.index()] && cfg.is_reachable(next) {
                            queued[next.index()] = true;
                            worklist.push_back(next);
                        }
                    }
                }
            }
            Direction::Backward => {
                let mut input = if matches!(block.kind, BlockKind::Exit | BlockKind::ExceptionExit) {
                    analysis.boundary_state()
                } else {
                    analysis.bottom()
                };
                for edge in cfg.successors(id) {
                    let refined = analysis.transfer_edge(cfg, edge, &entry[edge.to.index()]);
                    input = analysis.join(&input, &refined);
                }
                let mut output = input.clone();
                analysis.transfer_block(cfg, block, &mut output);
                exit[id.index()] = input;
                if output != entry[id.index()] {
                    entry[id.index()] = output;
                    for edge in cfg.predecessors(id) {
                        let prev = edge.from;
                        if !queued[prev.index()] && cfg.is_reachable(prev) {
                            queued[prev.index()] = true;
                            worklist.push_back(prev);
                        }
                    }
                }
            }
        }
    }
    log::trace!("dataflow fixed point after {} iterations over {} blocks", iterations, count);
    Ok(DataflowResults {
        entry,
        exit,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{self, EdgeKind};
    use crate::syntax::{parse, ParseOptions, SyntaxKind};

    /// Counts how many distinct paths reach each block, capped at 3
    struct PathCount;

    impl Analysis for PathCount {
        type State = u32;

        fn direction(&self) -> Direction {
            Direction::Forward
        }

        fn boundary_state(&self) -> u32 {
            1
        }

        fn bottom(&self) -> u32 {
            0
        }

        fn join(&self, left: &u32, right: &u32) -> u32 {
            (left + right).min(3)
        }

        fn transfer_block(&self, _: &ControlFlowGraph, _: &BasicBlock, _: &mut u32) {}

        fn transfer_edge(&self, _: &ControlFlowGraph, edge: &Edge, state: &u32) -> u32 {
            if edge.kind == EdgeKind::Exception {
                0
            } else {
                *state
            }
        }
    }

    #[test]
    fn test_forward_join_counts_paths() {
        let tree = parse(
            "class C { void M(bool a, bool b) { if (a) { X(); } if (b) { Y(); } Z(); } }",
            &ParseOptions::default(),
        );
        let method = tree.preorder().find(|n| n.kind() == SyntaxKind::MethodDecl).unwrap();
        let graph = cfg::build(method);
        let results = solve(&graph, &PathCount, &Deadline::none()).unwrap();
        assert_eq!(*results.entry_state(graph.exit()), 3);
        assert_eq!(*results.exit_state(graph.entry()), 1);
        assert!(results.iterations >= graph.reverse_postorder().len());
    }

    #[test]
    fn test_loops_reach_fixed_point() {
        let tree = parse(
            "class C { void M(int n) { while (n > 0) { if (n == 3) { break; } n--; } Z(); } }",
            &ParseOptions::default(),
        );
        let method = tree.preorder().find(|n| n.kind() == SyntaxKind::MethodDecl).unwrap();
        let graph = cfg::build(method);
        let results = solve(&graph, &PathCount, &Deadline::none()).unwrap();
        assert_eq!(*results.entry_state(graph.exit()), 3);
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let tree = parse("class C { void M() { X(); } }", &ParseOptions::default());
        let method = tree.preorder().find(|n| n.kind() == SyntaxKind::MethodDecl).unwrap();
        let graph = cfg::build(method);
        let deadline = Deadline {
            at: Some(Instant::now()),
            budget_ms: 5,
        };
        let err = solve(&graph, &PathCount, &deadline).unwrap_err();
        assert_eq!(err.to_string(), "analysis exceeded its time budget of 5 ms");
        assert!(!Deadline::after_ms(0).is_expired());
    }
}
