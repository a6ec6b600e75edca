//! Lowering of member bodies into basic blocks

use super::{BasicBlock, BlockId, BlockKind, ControlFlowGraph, Edge, EdgeKind, JumpInfo};
use crate::syntax::{Keyword, Node, NodeId, SyntaxKind, TokenKind};
use std::collections::{HashMap, HashSet};

use SyntaxKind as K;

/// Build the graph of one executable member (method, constructor, accessor,
/// expression-bodied property or local function).
pub fn build(member: Node<'_>) -> ControlFlowGraph {
    let mut builder = Builder::new(member.id());
    builder.member(member);
    let graph = builder.finish();
    log::trace!(
        "built cfg for {:?} with {} blocks and {} edges",
        member.kind(),
        graph.blocks().len(),
        graph.edges().len()
    );
    graph
}

struct Breakable {
    break_target: BlockId,
    continue_target: Option<BlockId>,
    finally_depth: usize,
}

struct FinallyFrame {
    entry: BlockId,
    /// (from, target, finally depth of the target)
    routed: Vec<(BlockId, BlockId, usize)>,
    /// Blocks completing the protected region normally
    normal: Vec<BlockId>,
}

struct HandlerFrame {
    targets: Vec<BlockId>,
    blocks: Vec<BlockId>,
}

#[derive(Default)]
struct SwitchFrame {
    cases: Vec<(String, BlockId)>,
    default: Option<BlockId>,
    pending: Vec<PendingGoto>,
}

struct PendingGoto {
    from: BlockId,
    node: NodeId,
    label: Option<String>,
    fallthrough: BlockId,
}

struct Builder {
    owner: NodeId,
    blocks: Vec<BasicBlock>,
    edges: Vec<Edge>,
    edge_set: HashSet<Edge>,
    current: BlockId,
    entry: BlockId,
    exit: BlockId,
    exception_exit: BlockId,
    breakables: Vec<Breakable>,
    finallies: Vec<FinallyFrame>,
    /// Finally entry -> block its normal completion continues to
    finally_exits: HashMap<BlockId, BlockId>,
    handlers: Vec<HandlerFrame>,
    switches: Vec<SwitchFrame>,
    labels: HashMap<String, BlockId>,
    gotos: Vec<PendingGoto>,
    jumps: Vec<JumpInfo>,
}

impl Builder {
    fn new(owner: NodeId) -> Self {
        let mut builder = Self {
            owner,
            blocks: Vec::new(),
            edges: Vec::new(),
            edge_set: HashSet::new(),
            current: BlockId(0),
            entry: BlockId(0),
            exit: BlockId(0),
            exception_exit: BlockId(0),
            breakables: Vec::new(),
            finallies: Vec::new(),
            finally_exits: HashMap::new(),
            handlers: Vec::new(),
            switches: Vec::new(),
            labels: HashMap::new(),
            gotos: Vec::new(),
            jumps: Vec::new(),
        };
        builder.entry = builder.block_of_kind(BlockKind::Entry);
        builder.exit = builder.block_of_kind(BlockKind::Exit);
        builder.exception_exit = builder.block_of_kind(BlockKind::ExceptionExit);
        builder
    }

    fn block_of_kind(&mut self, kind: BlockKind) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            id,
            kind,
            operations: Vec::new(),
            branch: None,
            reachable: false,
        });
        id
    }

    fn new_block(&mut self) -> BlockId {
        let id = self.block_of_kind(BlockKind::Normal);
        if let Some(frame) = self.handlers.last_mut() {
            frame.blocks.push(id);
        }
        id
    }

    fn edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        let edge = Edge { from, to, kind };
        if self.edge_set.insert(edge) {
            self.edges.push(edge);
        }
    }

    fn goto(&mut self, to: BlockId) {
        self.edge(self.current, to, EdgeKind::Fallthrough);
    }

    fn op(&mut self, node: Node<'_>) {
        self.blocks[self.current.index()].operations.push(node.id());
    }

    fn exception_targets(&self) -> Vec<BlockId> {
        self.handlers
            .last()
            .map_or_else(|| vec![self.exception_exit], |f| f.targets.clone())
    }

    /// Jump from the current block, through every `finally` between here and the target
    fn route(&mut self, target: BlockId, target_depth: usize) {
        if self.finallies.len() > target_depth {
            let from = self.current;
            if let Some(frame) = self.finallies.last_mut() {
                frame.routed.push((from, target, target_depth));
                let entry = frame.entry;
                self.goto(entry);
                return;
            }
        }
        self.goto(target);
    }

    fn record_jump(&mut self, node: Node<'_>, target: BlockId) -> BlockId {
        let fallthrough = self.new_block();
        self.jumps.push(JumpInfo {
            node: node.id(),
            target,
            fallthrough,
        });
        fallthrough
    }

    // ----- members -----

    fn member(&mut self, member: Node<'_>) {
        let start = self.new_block();
        self.edge(self.entry, start, EdgeKind::Fallthrough);
        self.current = start;
        for child in member.children() {
            match child.kind() {
                K::ConstructorInitializer => self.op(child),
                K::Block => self.statement(child),
                K::ArrowBody => {
                    if let Some(expr) = child.child(0) {
                        self.op(expr);
                    }
                }
                _ => {}
            }
        }
        self.goto(self.exit);
        let gotos = std::mem::take(&mut self.gotos);
        for pending in gotos {
            let target = pending.label.as_ref().and_then(|l| self.labels.get(l).copied());
            if let Some(target) = target {
                self.edge(pending.from, target, EdgeKind::Fallthrough);
                self.jumps.push(JumpInfo {
                    node: pending.node,
                    target,
                    fallthrough: pending.fallthrough,
                });
            }
        }
    }

    // ----- statements -----

    fn statement(&mut self, node: Node<'_>) {
        match node.kind() {
            K::Block => {
                for child in node.children() {
                    self.statement(child);
                }
            }
            K::CheckedStmt => {
                if let Some(block) = node.child(0) {
                    self.statement(block);
                }
            }
            K::LocalDeclStmt => {
                if let Some(declaration) = node.child_of_kind(K::VariableDeclaration) {
                    self.declarators(declaration);
                }
            }
            K::ExpressionStmt => {
                if let Some(expr) = node.child(0) {
                    self.op(expr);
                }
            }
            K::IfStmt => self.if_stmt(node),
            K::WhileStmt => self.while_stmt(node),
            K::DoStmt => self.do_stmt(node),
            K::ForStmt => self.for_stmt(node),
            K::ForEachStmt => self.foreach_stmt(node),
            K::SwitchStmt => self.switch_stmt(node),
            K::TryStmt => self.try_stmt(node),
            K::UsingStmt => self.using_stmt(node),
            K::LockStmt => {
                if let Some(expr) = node.child(0) {
                    self.op(expr);
                }
                if let Some(body) = node.child(1) {
                    self.statement(body);
                }
            }
            K::LabeledStmt => {
                let block = self.new_block();
                self.goto(block);
                self.current = block;
                if let Some(label) = node.name() {
                    self.labels.insert(label.to_string(), block);
                }
                if let Some(inner) = node.child(0) {
                    self.statement(inner);
                }
            }
            K::ReturnStmt | K::YieldBreakStmt => {
                self.op(node);
                self.route(self.exit, 0);
                self.current = self.record_jump(node, self.exit);
            }
            K::ThrowStmt => {
                self.op(node);
                for target in self.exception_targets() {
                    self.edge(self.current, target, EdgeKind::Exception);
                }
                self.current = self.new_block();
            }
            K::BreakStmt => {
                self.op(node);
                match self.breakables.last() {
                    Some(b) => {
                        let (target, depth) = (b.break_target, b.finally_depth);
                        self.route(target, depth);
                        self.current = self.record_jump(node, target);
                    }
                    None => self.current = self.new_block(),
                }
            }
            K::ContinueStmt => {
                self.op(node);
                let target = self
                    .breakables
                    .iter()
                    .rev()
                    .find_map(|b| b.continue_target.map(|t| (t, b.finally_depth)));
                match target {
                    Some((target, depth)) => {
                        self.route(target, depth);
                        self.current = self.record_jump(node, target);
                    }
                    None => self.current = self.new_block(),
                }
            }
            K::GotoStmt => self.goto_stmt(node),
            K::LocalFunctionStmt | K::EmptyStmt | K::Error => {}
            _ => self.op(node),
        }
    }

    fn declarators(&mut self, declaration: Node<'_>) {
        for declarator in declaration.children_of_kind(K::VariableDeclarator) {
            self.op(declarator);
        }
    }

    /// Short-circuit lowering of a condition into `True`/`False` edges
    fn condition(&mut self, expr: Node<'_>, when_true: BlockId, when_false: BlockId) {
        let expr = expr.unparenthesized();
        match expr.kind() {
            K::LiteralExpr if expr.token_kind() == Some(TokenKind::Keyword(Keyword::True)) => {
                self.goto(when_true);
            }
            K::LiteralExpr if expr.token_kind() == Some(TokenKind::Keyword(Keyword::False)) => {
                self.goto(when_false);
            }
            K::PrefixUnaryExpr if expr.token_kind() == Some(TokenKind::Bang) => match expr.child(0) {
                Some(operand) => self.condition(operand, when_false, when_true),
                None => self.branch(expr, when_true, when_false),
            },
            K::BinaryExpr if expr.token_kind() == Some(TokenKind::AmpAmp) => {
                match (expr.child(0), expr.child(1)) {
                    (Some(left), Some(right)) => {
                        let mid = self.new_block();
                        self.condition(left, mid, when_false);
                        self.current = mid;
                        self.condition(right, when_true, when_false);
                    }
                    _ => self.branch(expr, when_true, when_false),
                }
            }
            K::BinaryExpr if expr.token_kind() == Some(TokenKind::PipePipe) => {
                match (expr.child(0), expr.child(1)) {
                    (Some(left), Some(right)) => {
                        let mid = self.new_block();
                        self.condition(left, when_true, mid);
                        self.current = mid;
                        self.condition(right, when_true, when_false);
                    }
                    _ => self.branch(expr, when_true, when_false),
                }
            }
            _ => self.branch(expr, when_true, when_false),
        }
    }

    fn branch(&mut self, cond: Node<'_>, when_true: BlockId, when_false: BlockId) {
        self.blocks[self.current.index()].branch = Some(cond.id());
        self.edge(self.current, when_true, EdgeKind::True);
        self.edge(self.current, when_false, EdgeKind::False);
    }

    fn if_stmt(&mut self, node: Node<'_>) {
        let (Some(cond), Some(then)) = (node.child(0), node.child(1)) else {
            return;
        };
        let else_stmt = node.child_of_kind(K::ElseClause).and_then(|e| e.child(0));
        let then_block = self.new_block();
        let else_block = else_stmt.map(|_| self.new_block());
        let after = self.new_block();
        self.condition(cond, then_block, else_block.unwrap_or(after));
        self.current = then_block;
        self.statement(then);
        self.goto(after);
        if let (Some(stmt), Some(block)) = (else_stmt, else_block) {
            self.current = block;
            self.statement(stmt);
            self.goto(after);
        }
        self.current = after;
    }

    fn enter_loop(&mut self, break_target: BlockId, continue_target: Option<BlockId>) {
        self.breakables.push(Breakable {
            break_target,
            continue_target,
            finally_depth: self.finallies.len(),
        });
    }

    fn while_stmt(&mut self, node: Node<'_>) {
        let (Some(cond), Some(body)) = (node.child(0), node.child(1)) else {
            return;
        };
        let header = self.new_block();
        self.goto(header);
        self.current = header;
        let body_block = self.new_block();
        let after = self.new_block();
        self.condition(cond, body_block, after);
        self.enter_loop(after, Some(header));
        self.current = body_block;
        self.statement(body);
        self.goto(header);
        self.breakables.pop();
        self.current = after;
    }

    fn do_stmt(&mut self, node: Node<'_>) {
        let (Some(body), Some(cond)) = (node.child(0), node.child(1)) else {
            return;
        };
        let body_block = self.new_block();
        self.goto(body_block);
        let cond_block = self.new_block();
        let after = self.new_block();
        self.enter_loop(after, Some(cond_block));
        self.current = body_block;
        self.statement(body);
        self.goto(cond_block);
        self.breakables.pop();
        self.current = cond_block;
        self.condition(cond, body_block, after);
        self.current = after;
    }

    fn for_stmt(&mut self, node: Node<'_>) {
        if let Some(init) = node.child_of_kind(K::ForInitializer) {
            for child in init.children() {
                if child.kind() == K::VariableDeclaration {
                    self.declarators(child);
                } else {
                    self.op(child);
                }
            }
        }
        let cond_block = self.new_block();
        self.goto(cond_block);
        let body_block = self.new_block();
        let incr_block = self.new_block();
        let after = self.new_block();
        self.current = cond_block;
        match node.child_of_kind(K::ForCondition).and_then(|c| c.child(0)) {
            Some(cond) => self.condition(cond, body_block, after),
            None => self.goto(body_block),
        }
        self.enter_loop(after, Some(incr_block));
        self.current = body_block;
        if let Some(body) = node.child(3) {
            self.statement(body);
        }
        self.goto(incr_block);
        self.breakables.pop();
        self.current = incr_block;
        if let Some(incr) = node.child_of_kind(K::ForIncrementor) {
            for expr in incr.children() {
                self.op(expr);
            }
        }
        self.goto(cond_block);
        self.current = after;
    }

    fn foreach_stmt(&mut self, node: Node<'_>) {
        let Some(collection) = node.child(1) else {
            return;
        };
        self.op(collection);
        let cond_block = self.new_block();
        self.goto(cond_block);
        let body_block = self.new_block();
        let after = self.new_block();
        self.current = cond_block;
        self.branch(collection, body_block, after);
        self.enter_loop(after, Some(cond_block));
        self.current = body_block;
        self.op(node);
        if let Some(body) = node.child(2) {
            self.statement(body);
        }
        self.goto(cond_block);
        self.breakables.pop();
        self.current = after;
    }

    fn switch_stmt(&mut self, node: Node<'_>) {
        if let Some(governing) = node.child(0) {
            self.op(governing);
        }
        let after = self.new_block();
        let sections: Vec<Node<'_>> = node.children_of_kind(K::SwitchSection).collect();
        let entries: Vec<BlockId> = sections.iter().map(|_| self.new_block()).collect();

        let mut frame = SwitchFrame::default();
        for (section, &entry) in sections.iter().zip(&entries) {
            for label in section.children() {
                match label.kind() {
                    K::DefaultLabel => frame.default = Some(entry),
                    K::CaseLabel => {
                        if let Some(pattern) = label.child(0) {
                            frame
                                .cases
                                .push((pattern.text().split_whitespace().collect(), entry));
                        }
                        let next = self.new_block();
                        self.branch(label, entry, next);
                        self.current = next;
                    }
                    _ => {}
                }
            }
        }
        // `current` is the block after the last failed test (or the dispatch block)
        let fallback = frame.default.unwrap_or(after);
        self.goto(fallback);

        self.switches.push(frame);
        self.enter_loop(after, None);
        for (section, &entry) in sections.iter().zip(&entries) {
            self.current = entry;
            for stmt in section.statements() {
                self.statement(stmt);
            }
            self.goto(after);
        }
        self.breakables.pop();
        if let Some(frame) = self.switches.pop() {
            for pending in frame.pending {
                let target = match &pending.label {
                    Some(label) => frame
                        .cases
                        .iter()
                        .find(|(text, _)| text == label)
                        .map(|(_, block)| *block),
                    None => frame.default,
                };
                if let Some(target) = target {
                    self.edge(pending.from, target, EdgeKind::Fallthrough);
                    self.jumps.push(JumpInfo {
                        node: pending.node,
                        target,
                        fallthrough: pending.fallthrough,
                    });
                }
            }
        }
        self.current = after;
    }

    fn goto_stmt(&mut self, node: Node<'_>) {
        self.op(node);
        let from = self.current;
        let fallthrough = self.new_block();
        match node.token_kind() {
            Some(TokenKind::Keyword(Keyword::Case)) => {
                let label = node
                    .child(0)
                    .map(|e| e.text().split_whitespace().collect::<String>());
                if let Some(frame) = self.switches.last_mut() {
                    frame.pending.push(PendingGoto {
                        from,
                        node: node.id(),
                        label,
                        fallthrough,
                    });
                }
            }
            Some(TokenKind::Keyword(Keyword::Default)) => {
                if let Some(frame) = self.switches.last_mut() {
                    frame.pending.push(PendingGoto {
                        from,
                        node: node.id(),
                        label: None,
                        fallthrough,
                    });
                }
            }
            _ => self.gotos.push(PendingGoto {
                from,
                node: node.id(),
                label: node.name().map(str::to_string),
                fallthrough,
            }),
        }
        self.current = fallthrough;
    }

    fn is_catch_all(clause: Node<'_>) -> bool {
        if clause.child_of_kind(K::WhenClause).is_some() {
            return false;
        }
        match clause.child_of_kind(K::CatchDeclaration).and_then(|d| d.child(0)) {
            None => true,
            Some(ty) => matches!(ty.text(), "Exception" | "System.Exception"),
        }
    }

    fn reachable_now(&self) -> Vec<bool> {
        let mut reachable = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];
        reachable[self.entry.index()] = true;
        while let Some(block) = stack.pop() {
            for edge in self.edges.iter().filter(|e| e.from == block) {
                if !reachable[edge.to.index()] {
                    reachable[edge.to.index()] = true;
                    stack.push(edge.to);
                }
            }
        }
        reachable
    }

    fn complete_normally(&mut self, to: BlockId) {
        let from = self.current;
        if let Some(frame) = self.finallies.last_mut() {
            if frame.entry == to {
                frame.normal.push(from);
            }
        }
        self.goto(to);
    }

    /// Build `finally` code; its end continues only where a reachable path entered it
    fn finish_finally(&mut self, frame: FinallyFrame, body: impl FnOnce(&mut Self), after: BlockId) {
        let reachable = self.reachable_now();
        let exception_reached = self.edges.iter().any(|e| {
            e.to == frame.entry && e.kind == EdgeKind::Exception && reachable[e.from.index()]
        });
        self.current = frame.entry;
        body(self);
        let end = self.current;
        if frame.normal.iter().any(|b| reachable[b.index()]) {
            self.goto(after);
        }
        for (from, target, depth) in frame.routed {
            if reachable[from.index()] {
                self.current = end;
                self.route(target, depth);
            }
        }
        if exception_reached {
            for target in self.exception_targets() {
                self.edge(end, target, EdgeKind::Exception);
            }
        }
        self.current = after;
    }

    fn pop_handlers(&mut self) {
        if let Some(frame) = self.handlers.pop() {
            for &block in &frame.blocks {
                for &target in &frame.targets {
                    self.edge(block, target, EdgeKind::Exception);
                }
            }
        }
    }

    fn try_stmt(&mut self, node: Node<'_>) {
        let Some(body) = node.child(0) else {
            return;
        };
        let catches: Vec<Node<'_>> = node.children_of_kind(K::CatchClause).collect();
        let finally = node.child_of_kind(K::FinallyClause).and_then(|f| f.child(0));

        let after = self.new_block();
        let finally_entry = finally.map(|_| self.new_block());
        if let Some(entry) = finally_entry {
            self.finally_exits.insert(entry, after);
            self.finallies.push(FinallyFrame {
                entry,
                routed: Vec::new(),
                normal: Vec::new(),
            });
        }

        let outer_targets = self.exception_targets();
        let catch_targets = finally_entry.map_or_else(|| outer_targets.clone(), |e| vec![e]);
        self.handlers.push(HandlerFrame {
            targets: catch_targets.clone(),
            blocks: Vec::new(),
        });
        let catch_entries: Vec<BlockId> = catches.iter().map(|_| self.new_block()).collect();

        let mut body_targets = catch_entries.clone();
        if let Some(entry) = finally_entry {
            body_targets.push(entry);
        } else if !catches.iter().any(|c| Self::is_catch_all(*c)) {
            body_targets.extend(outer_targets.iter().copied());
        }
        self.handlers.push(HandlerFrame {
            targets: body_targets,
            blocks: Vec::new(),
        });
        let try_entry = self.new_block();
        self.goto(try_entry);
        self.current = try_entry;
        self.statement(body);
        self.complete_normally(finally_entry.unwrap_or(after));
        self.pop_handlers();

        let normal_exit = finally_entry.unwrap_or(after);
        for (i, clause) in catches.iter().enumerate() {
            self.current = catch_entries[i];
            if let Some(declaration) = clause.child_of_kind(K::CatchDeclaration) {
                self.op(declaration);
            }
            if let Some(filter) = clause.child_of_kind(K::WhenClause).and_then(|w| w.child(0)) {
                let next = catch_entries
                    .get(i + 1)
                    .copied()
                    .or_else(|| catch_targets.first().copied())
                    .unwrap_or(self.exception_exit);
                let handler = self.new_block();
                self.condition(filter, handler, next);
                self.current = handler;
            }
            if let Some(block) = clause.child_of_kind(K::Block) {
                self.statement(block);
            }
            self.complete_normally(normal_exit);
        }
        self.pop_handlers();

        match (finally, finally_entry) {
            (Some(block), Some(_)) => {
                if let Some(frame) = self.finallies.pop() {
                    self.finish_finally(frame, |b| b.statement(block), after);
                }
            }
            _ => self.current = after,
        }
    }

    /// `using (r) body` is lowered as `try { body } finally { dispose r }`
    fn using_stmt(&mut self, node: Node<'_>) {
        let (Some(resource), Some(body)) = (node.child(0), node.child(1)) else {
            return;
        };
        if resource.kind() == K::VariableDeclaration {
            self.declarators(resource);
        } else {
            self.op(resource);
        }
        let after = self.new_block();
        let finally_entry = self.new_block();
        self.finally_exits.insert(finally_entry, after);
        self.finallies.push(FinallyFrame {
            entry: finally_entry,
            routed: Vec::new(),
            normal: Vec::new(),
        });
        self.handlers.push(HandlerFrame {
            targets: vec![finally_entry],
            blocks: Vec::new(),
        });
        let try_entry = self.new_block();
        self.goto(try_entry);
        self.current = try_entry;
        self.statement(body);
        self.complete_normally(finally_entry);
        self.pop_handlers();
        if let Some(frame) = self.finallies.pop() {
            self.finish_finally(frame, |b| b.op(node), after);
        }
    }

    // ----- finish -----

    /// Follow empty pass-through blocks and `finally` code, which runs on
    /// every path leaving its region
    fn resolve(&self, start: BlockId) -> BlockId {
        let mut seen = HashSet::new();
        let mut block = start;
        while seen.insert(block) {
            if let Some(&after) = self.finally_exits.get(&block) {
                block = after;
                continue;
            }
            let data = &self.blocks[block.index()];
            if data.kind != BlockKind::Normal || !data.is_empty() {
                break;
            }
            let mut normal = self
                .edges
                .iter()
                .filter(|e| e.from == block && e.kind != EdgeKind::Exception);
            match (normal.next(), normal.next()) {
                (Some(edge), None) if edge.kind == EdgeKind::Fallthrough => block = edge.to,
                _ => break,
            }
        }
        block
    }

    fn finish(mut self) -> ControlFlowGraph {
        let jumps: Vec<JumpInfo> = self
            .jumps
            .iter()
            .map(|j| JumpInfo {
                node: j.node,
                target: self.resolve(j.target),
                fallthrough: self.resolve(j.fallthrough),
            })
            .collect();

        let reachable = self.reachable_now();
        for (block, &r) in self.blocks.iter_mut().zip(&reachable) {
            block.reachable = r;
        }
        self.edges.retain(|e| reachable[e.from.index()]);

        ControlFlowGraph::new(
            self.owner,
            self.blocks,
            self.edges,
            self.entry,
            self.exit,
            self.exception_exit,
            jumps,
        )
    }
}
