//! Forward nullness analysis with branch refinement

use super::access::{captured_symbols, variable_of};
use super::{solve, Analysis, Deadline, Direction, Timeout};
use crate::cfg::{BasicBlock, ControlFlowGraph, Edge, EdgeKind};
use crate::semantic::{SemanticModel, SymbolId, TypeRef};
use crate::syntax::{Keyword, Node, NodeId, SyntaxKind, SyntaxTree, TokenKind};
use std::collections::{BTreeMap, BTreeSet};

use SyntaxKind as K;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nullness {
    Null,
    NotNull,
    MaybeNull,
    Unknown,
}

impl Nullness {
    pub fn join(self, other: Nullness) -> Nullness {
        use Nullness::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Null | MaybeNull, _) | (_, Null | MaybeNull) => MaybeNull,
            (Unknown, _) | (_, Unknown) => Unknown,
            _ => NotNull,
        }
    }

    fn may_be_null(self) -> bool {
        matches!(self, Nullness::Null | Nullness::MaybeNull)
    }
}

/// Per-variable nullness; variables not in the map are `Unknown`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullState {
    reached: bool,
    vars: BTreeMap<SymbolId, Nullness>,
}

impl NullState {
    fn unreached() -> Self {
        Self {
            reached: false,
            vars: BTreeMap::new(),
        }
    }

    pub fn is_reached(&self) -> bool {
        self.reached
    }

    pub fn get(&self, symbol: SymbolId) -> Nullness {
        self.vars.get(&symbol).copied().unwrap_or(Nullness::Unknown)
    }

    fn set(&mut self, symbol: SymbolId, value: Nullness) {
        if value == Nullness::Unknown {
            self.vars.remove(&symbol);
        } else {
            self.vars.insert(symbol, value);
        }
    }

    fn join(&self, other: &NullState) -> NullState {
        if !self.reached {
            return other.clone();
        }
        if !other.reached {
            return self.clone();
        }
        let mut vars = BTreeMap::new();
        for symbol in self.vars.keys().chain(other.vars.keys()) {
            let value = self.get(*symbol).join(other.get(*symbol));
            if value != Nullness::Unknown {
                vars.insert(*symbol, value);
            }
        }
        NullState { reached: true, vars }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DereferenceKind {
    /// Member or element access, `foreach` over the variable
    Reference,
    /// `.Value` or a cast of an empty nullable value type
    NullableValue,
}

/// Dereference of a variable that is null on at least one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullDereference {
    pub symbol: SymbolId,
    /// The dereferenced identifier
    pub node: NodeId,
    pub kind: DereferenceKind,
}

pub struct NullnessAnalysis<'a> {
    tree: &'a SyntaxTree,
    model: &'a SemanticModel,
    captured: BTreeSet<SymbolId>,
}

impl<'a> NullnessAnalysis<'a> {
    pub fn new(tree: &'a SyntaxTree, model: &'a SemanticModel, member: Node<'a>) -> Self {
        Self {
            tree,
            model,
            captured: captured_symbols(model, member),
        }
    }

    fn tracked(&self, symbol: SymbolId) -> bool {
        let sym = self.model.symbol(symbol);
        sym.kind.is_variable()
            && !self.captured.contains(&symbol)
            && !(self.model.is_value_type(&sym.ty) && !self.model.is_nullable_value_type(&sym.ty))
    }

    fn tracked_var(&self, expr: Node<'_>) -> Option<SymbolId> {
        variable_of(self.model, expr).filter(|&s| self.tracked(s))
    }

    fn declared_var(&self, node: Node<'_>) -> Option<SymbolId> {
        self.model.declared_symbol(node.id()).filter(|&s| self.tracked(s))
    }

    fn is_nullable_value(&self, symbol: SymbolId) -> bool {
        self.model.is_nullable_value_type(&self.model.symbol(symbol).ty)
    }

    /// Narrow to `value`; contradicting a known state makes the path infeasible
    fn narrow(&self, symbol: SymbolId, value: Nullness, state: &mut NullState) {
        if !self.tracked(symbol) || !state.reached {
            return;
        }
        let current = state.get(symbol);
        let contradiction = matches!(
            (current, value),
            (Nullness::NotNull, Nullness::Null) | (Nullness::Null, Nullness::NotNull)
        );
        if contradiction {
            *state = NullState::unreached();
        } else {
            state.set(symbol, value);
        }
    }

    /// Refine `state` assuming `cond` evaluated to `outcome`
    fn refine(&self, cond: Node<'_>, outcome: bool, state: &mut NullState) {
        if !state.reached {
            return;
        }
        match cond.kind() {
            K::ParenExpr => {
                if let Some(inner) = cond.child(0) {
                    self.refine(inner, outcome, state);
                }
            }
            K::PrefixUnaryExpr if cond.token_kind() == Some(TokenKind::Bang) => {
                if let Some(inner) = cond.child(0) {
                    self.refine(inner, !outcome, state);
                }
            }
            K::PostfixUnaryExpr if cond.token_kind() == Some(TokenKind::Bang) => {
                if let Some(inner) = cond.child(0) {
                    self.refine(inner, outcome, state);
                }
            }
            K::BinaryExpr => {
                let (Some(left), Some(right)) = (cond.child(0), cond.child(1)) else {
                    return;
                };
                match cond.token_kind() {
                    Some(TokenKind::AmpAmp) => self.refine_logical(left, right, outcome, true, state),
                    Some(TokenKind::PipePipe) => self.refine_logical(left, right, outcome, false, state),
                    Some(op @ (TokenKind::EqEq | TokenKind::BangEq)) => {
                        let equal = (op == TokenKind::EqEq) == outcome;
                        self.refine_equality(left, right, equal, state);
                        self.refine_equality(right, left, equal, state);
                    }
                    _ => {}
                }
            }
            K::IsPatternExpr => {
                let (Some(operand), Some(pattern)) = (cond.child(0), cond.child(1)) else {
                    return;
                };
                self.refine_pattern(self.tracked_var(operand), pattern, outcome, state);
            }
            K::MemberAccessExpr if cond.name() == Some("HasValue") => {
                if let Some(symbol) = cond.child(0).and_then(|r| self.tracked_var(r)) {
                    let value = if outcome { Nullness::NotNull } else { Nullness::Null };
                    self.narrow(symbol, value, state);
                }
            }
            K::InvocationExpr if !outcome => {
                let Some(callee) = cond.child(0) else {
                    return;
                };
                let is_check = callee.kind() == K::MemberAccessExpr
                    && matches!(callee.name(), Some("IsNullOrEmpty" | "IsNullOrWhiteSpace"))
                    && callee
                        .child(0)
                        .is_some_and(|r| matches!(r.text(), "string" | "String"));
                if !is_check {
                    return;
                }
                let first = cond
                    .child(1)
                    .and_then(|args| args.child(0))
                    .and_then(|arg| arg.child(0));
                if let Some(symbol) = first.and_then(|a| self.tracked_var(a)) {
                    self.narrow(symbol, Nullness::NotNull, state);
                }
            }
            K::CaseLabel => {
                let subject = cond
                    .parent()
                    .and_then(|section| section.parent())
                    .and_then(|switch| switch.child(0))
                    .and_then(|governing| self.tracked_var(governing));
                let filter = cond.child_of_kind(K::WhenClause).and_then(|w| w.child(0));
                let Some(pattern) = cond.child(0) else {
                    return;
                };
                if outcome {
                    self.refine_pattern(subject, pattern, true, state);
                    if let Some(filter) = filter {
                        self.refine(filter, true, state);
                    }
                } else if filter.is_none() {
                    self.refine_pattern(subject, pattern, false, state);
                }
            }
            _ => {}
        }
    }

    fn refine_logical(
        &self,
        left: Node<'_>,
        right: Node<'_>,
        outcome: bool,
        conjunction: bool,
        state: &mut NullState,
    ) {
        if outcome == conjunction {
            // both operands took the same outcome
            self.refine(left, outcome, state);
            self.refine(right, outcome, state);
        } else {
            let mut short = state.clone();
            self.refine(left, outcome, &mut short);
            let mut long = state.clone();
            self.refine(left, !outcome, &mut long);
            self.refine(right, outcome, &mut long);
            *state = short.join(&long);
        }
    }

    fn refine_equality(&self, var: Node<'_>, other: Node<'_>, equal: bool, state: &mut NullState) {
        let Some(symbol) = self.tracked_var(var) else {
            return;
        };
        let other = other.unparenthesized();
        if is_null_literal(other) {
            let value = if equal { Nullness::Null } else { Nullness::NotNull };
            self.narrow(symbol, value, state);
        } else if equal {
            let other_value = match self.tracked_var(other) {
                Some(o) => state.get(o),
                None if other.kind() == K::LiteralExpr => Nullness::NotNull,
                None => Nullness::Unknown,
            };
            if other_value == Nullness::NotNull {
                self.narrow(symbol, Nullness::NotNull, state);
            }
        }
    }

    fn refine_pattern(
        &self,
        subject: Option<SymbolId>,
        pattern: Node<'_>,
        outcome: bool,
        state: &mut NullState,
    ) {
        match pattern.kind() {
            K::ParenthesizedPattern => {
                if let Some(inner) = pattern.child(0) {
                    self.refine_pattern(subject, inner, outcome, state);
                }
            }
            K::NotPattern => {
                if let Some(inner) = pattern.child(0) {
                    self.refine_pattern(subject, inner, !outcome, state);
                }
            }
            K::AndPattern if outcome => {
                for part in pattern.children() {
                    self.refine_pattern(subject, part, true, state);
                }
            }
            K::OrPattern if !outcome => {
                for part in pattern.children() {
                    self.refine_pattern(subject, part, false, state);
                }
            }
            K::ConstantPattern => {
                let Some(symbol) = subject else {
                    return;
                };
                let null = pattern.child(0).is_some_and(|v| is_null_literal(v.unparenthesized()));
                match (null, outcome) {
                    (true, true) => self.narrow(symbol, Nullness::Null, state),
                    (true, false) | (false, true) => self.narrow(symbol, Nullness::NotNull, state),
                    (false, false) => {}
                }
            }
            K::TypePattern | K::DeclarationPattern | K::RelationalPattern if outcome => {
                if let Some(symbol) = subject {
                    self.narrow(symbol, Nullness::NotNull, state);
                }
                if let Some(designated) = self.declared_var(pattern) {
                    self.narrow(designated, Nullness::NotNull, state);
                }
            }
            K::VarPattern if outcome => {
                if let (Some(symbol), Some(designated)) = (subject, self.declared_var(pattern)) {
                    let value = state.get(symbol);
                    state.set(designated, value);
                }
            }
            _ => {}
        }
    }
}

fn is_null_literal(node: Node<'_>) -> bool {
    node.kind() == K::LiteralExpr && node.token_kind() == Some(TokenKind::Keyword(Keyword::Null))
}

fn merge(a: (NullState, Nullness), b: (NullState, Nullness)) -> (NullState, Nullness) {
    match (a.0.reached, b.0.reached) {
        (false, _) => b,
        (_, false) => a,
        _ => (a.0.join(&b.0), a.1.join(b.1)),
    }
}

impl Analysis for NullnessAnalysis<'_> {
    type State = NullState;

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn boundary_state(&self) -> NullState {
        NullState {
            reached: true,
            vars: BTreeMap::new(),
        }
    }

    fn bottom(&self) -> NullState {
        NullState::unreached()
    }

    fn join(&self, left: &NullState, right: &NullState) -> NullState {
        left.join(right)
    }

    fn transfer_block(&self, _cfg: &ControlFlowGraph, block: &BasicBlock, state: &mut NullState) {
        Interpreter {
            analysis: self,
            findings: None,
        }
        .block(block, state);
    }

    fn transfer_edge(&self, cfg: &ControlFlowGraph, edge: &Edge, state: &NullState) -> NullState {
        let mut refined = state.clone();
        let outcome = match edge.kind {
            EdgeKind::True => true,
            EdgeKind::False => false,
            _ => return refined,
        };
        if let Some(branch) = cfg.block(edge.from).branch {
            self.refine(self.tree.node(branch), outcome, &mut refined);
        }
        refined
    }
}

/// Abstract evaluation of operations, optionally recording dereferences
struct Interpreter<'a, 'f> {
    analysis: &'a NullnessAnalysis<'a>,
    findings: Option<&'f mut Vec<NullDereference>>,
}

impl Interpreter<'_, '_> {
    fn block(&mut self, block: &BasicBlock, state: &mut NullState) {
        if !state.reached {
            return;
        }
        let tree = self.analysis.tree;
        for &op in &block.operations {
            self.operation(tree.node(op), state);
        }
        if let Some(branch) = block.branch {
            self.branch(tree.node(branch), state);
        }
    }

    fn operation(&mut self, op: Node<'_>, state: &mut NullState) {
        match op.kind() {
            K::VariableDeclarator => {
                let value = match op.child(0) {
                    Some(init) => self.eval(init, state),
                    None => Nullness::Unknown,
                };
                if let Some(symbol) = self.analysis.declared_var(op) {
                    state.set(symbol, value);
                }
            }
            K::ForEachStmt => {
                if let Some(symbol) = self.analysis.declared_var(op) {
                    state.set(symbol, Nullness::Unknown);
                }
            }
            K::CatchDeclaration => {
                if let Some(symbol) = self.analysis.declared_var(op) {
                    state.set(symbol, Nullness::NotNull);
                }
            }
            K::UsingStmt => {}
            _ if is_foreach_collection(op) => {
                self.eval(op, state);
                self.dereference(op, DereferenceKind::Reference, state);
            }
            kind if kind.is_expression() => {
                self.eval(op, state);
            }
            _ => {
                for child in op.children() {
                    self.eval(child, state);
                }
            }
        }
    }

    fn branch(&mut self, node: Node<'_>, state: &mut NullState) {
        if is_foreach_collection(node) {
            return;
        }
        if node.kind() == K::CaseLabel {
            if let Some(filter) = node.child_of_kind(K::WhenClause).and_then(|w| w.child(0)) {
                self.eval(filter, state);
            }
            return;
        }
        self.eval(node, state);
    }

    fn dereference(&mut self, receiver: Node<'_>, kind: DereferenceKind, state: &mut NullState) {
        let Some(symbol) = self.analysis.tracked_var(receiver) else {
            return;
        };
        if state.reached && state.get(symbol).may_be_null() {
            if let Some(findings) = self.findings.as_deref_mut() {
                findings.push(NullDereference {
                    symbol,
                    node: receiver.unparenthesized().id(),
                    kind,
                });
            }
        }
        state.set(symbol, Nullness::NotNull);
    }

    fn eval(&mut self, node: Node<'_>, state: &mut NullState) -> Nullness {
        let analysis = self.analysis;
        match node.kind() {
            kind if kind.is_type() => Nullness::NotNull,
            K::LambdaExpr => Nullness::NotNull,
            K::ParenExpr => node.child(0).map_or(Nullness::Unknown, |inner| self.eval(inner, state)),
            K::LiteralExpr if is_null_literal(node) => Nullness::Null,
            K::LiteralExpr | K::InterpolatedStringExpr | K::ThisExpr | K::BaseExpr | K::TypeExpr => {
                Nullness::NotNull
            }
            K::ObjectCreationExpr
            | K::ImplicitObjectCreationExpr
            | K::ArrayCreationExpr
            | K::ImplicitArrayCreationExpr
            | K::TypeOfExpr
            | K::TupleExpr => {
                self.children(node, state);
                Nullness::NotNull
            }
            K::DefaultExpr => match node.child(0).map(TypeRef::from_syntax) {
                Some(ty) if analysis.model.is_value_type(&ty) && !analysis.model.is_nullable_value_type(&ty) => {
                    Nullness::NotNull
                }
                Some(_) => Nullness::Null,
                None => Nullness::Unknown,
            },
            K::IdentifierName => analysis
                .tracked_var(node)
                .map_or(Nullness::Unknown, |s| state.get(s)),
            K::MemberAccessExpr => {
                let Some(receiver) = node.child(0) else {
                    return Nullness::Unknown;
                };
                self.eval(receiver, state);
                if let Some(symbol) = analysis.tracked_var(receiver) {
                    if analysis.is_nullable_value(symbol) {
                        if node.name() == Some("Value") {
                            self.dereference(receiver, DereferenceKind::NullableValue, state);
                        }
                    } else {
                        self.dereference(receiver, DereferenceKind::Reference, state);
                    }
                }
                self.typed(node)
            }
            K::ElementAccessExpr => {
                if let Some(receiver) = node.child(0) {
                    self.eval(receiver, state);
                    self.dereference(receiver, DereferenceKind::Reference, state);
                }
                if let Some(args) = node.child(1) {
                    self.eval(args, state);
                }
                self.typed(node)
            }
            K::ConditionalAccessExpr | K::ConditionalElementAccessExpr => {
                self.children(node, state);
                Nullness::Unknown
            }
            K::CastExpr => {
                let (Some(ty), Some(operand)) = (node.child(0), node.child(1)) else {
                    return Nullness::Unknown;
                };
                let value = self.eval(operand, state);
                let target = TypeRef::from_syntax(ty);
                let to_value_type = analysis.model.is_value_type(&target)
                    && !analysis.model.is_nullable_value_type(&target);
                if to_value_type {
                    if analysis
                        .tracked_var(operand)
                        .is_some_and(|s| analysis.is_nullable_value(s))
                    {
                        self.dereference(operand, DereferenceKind::NullableValue, state);
                    }
                    Nullness::NotNull
                } else {
                    value
                }
            }
            K::AsExpr => {
                let value = node
                    .child(0)
                    .map_or(Nullness::Unknown, |operand| self.eval(operand, state));
                if value == Nullness::Null {
                    Nullness::Null
                } else {
                    Nullness::Unknown
                }
            }
            K::Argument => {
                let Some(value) = node.child(0) else {
                    return Nullness::Unknown;
                };
                let by_ref = matches!(
                    node.token_kind(),
                    Some(TokenKind::Keyword(Keyword::Out | Keyword::Ref))
                );
                if !by_ref {
                    return self.eval(value, state);
                }
                let written = if value.kind() == K::DeclarationExpr {
                    analysis.declared_var(value)
                } else {
                    analysis.tracked_var(value)
                };
                if value.kind() != K::DeclarationExpr && written.is_none() {
                    self.eval(value, state);
                }
                if let Some(symbol) = written {
                    state.set(symbol, Nullness::Unknown);
                }
                Nullness::Unknown
            }
            K::DeclarationExpr => {
                if let Some(symbol) = analysis.declared_var(node) {
                    state.set(symbol, Nullness::Unknown);
                }
                Nullness::Unknown
            }
            K::AssignmentExpr => self.assignment(node, state),
            K::BinaryExpr => self.binary(node, state),
            K::ConditionalExpr => {
                let (Some(cond), Some(when_true), Some(when_false)) =
                    (node.child(0), node.child(1), node.child(2))
                else {
                    self.children(node, state);
                    return Nullness::Unknown;
                };
                self.eval(cond, state);
                let mut true_state = state.clone();
                analysis.refine(cond, true, &mut true_state);
                let true_value = self.eval(when_true, &mut true_state);
                let mut false_state = state.clone();
                analysis.refine(cond, false, &mut false_state);
                let false_value = self.eval(when_false, &mut false_state);
                let (merged, value) = merge((true_state, true_value), (false_state, false_value));
                *state = merged;
                value
            }
            K::SwitchExpr => self.switch_expr(node, state),
            K::IsPatternExpr => {
                if let Some(operand) = node.child(0) {
                    self.eval(operand, state);
                }
                Nullness::NotNull
            }
            K::PrefixUnaryExpr | K::PostfixUnaryExpr => {
                let Some(operand) = node.child(0) else {
                    return Nullness::Unknown;
                };
                let value = self.eval(operand, state);
                match node.token_kind() {
                    Some(TokenKind::PlusPlus | TokenKind::MinusMinus) => {
                        if let Some(symbol) = analysis.tracked_var(operand) {
                            state.set(symbol, Nullness::Unknown);
                        }
                        self.typed(node)
                    }
                    // null-forgiving `x!` keeps the operand's state
                    Some(TokenKind::Bang) if node.kind() == K::PostfixUnaryExpr => {
                        if value == Nullness::Unknown {
                            Nullness::NotNull
                        } else {
                            value
                        }
                    }
                    _ => Nullness::NotNull,
                }
            }
            K::ThrowExpr => {
                self.children(node, state);
                *state = NullState::unreached();
                Nullness::NotNull
            }
            K::InvocationExpr | K::AwaitExpr => {
                self.children(node, state);
                self.typed(node)
            }
            _ => {
                self.children(node, state);
                self.typed(node)
            }
        }
    }

    fn children(&mut self, node: Node<'_>, state: &mut NullState) {
        for child in node.children() {
            self.eval(child, state);
        }
    }

    /// Nullness implied by the static type alone
    fn typed(&self, node: Node<'_>) -> Nullness {
        let model = self.analysis.model;
        let ty = model.type_of(node);
        let string = matches!(ty.simple_name(), Some("string" | "String"));
        if (model.is_value_type(&ty) && !model.is_nullable_value_type(&ty))
            || (string && node.kind() == K::BinaryExpr)
        {
            Nullness::NotNull
        } else {
            Nullness::Unknown
        }
    }

    fn assignment(&mut self, node: Node<'_>, state: &mut NullState) -> Nullness {
        let analysis = self.analysis;
        let (Some(target), Some(value)) = (node.child(0), node.child(1)) else {
            return Nullness::Unknown;
        };
        let target_var = analysis.tracked_var(target);
        match (node.token_kind(), target_var) {
            (Some(TokenKind::Eq), Some(symbol)) => {
                let v = self.eval(value, state);
                state.set(symbol, v);
                v
            }
            (Some(TokenKind::QuestionQuestionEq), Some(symbol)) => {
                let current = state.get(symbol);
                let mut kept = state.clone();
                analysis.narrow(symbol, Nullness::NotNull, &mut kept);
                let mut assigned = state.clone();
                analysis.narrow(symbol, Nullness::Null, &mut assigned);
                let v = self.eval(value, &mut assigned);
                if assigned.reached {
                    assigned.set(symbol, v);
                }
                let (merged, result) = merge((kept, Nullness::NotNull), (assigned, v));
                *state = merged;
                if current == Nullness::NotNull {
                    Nullness::NotNull
                } else {
                    result
                }
            }
            (_, Some(symbol)) => {
                self.eval(value, state);
                state.set(symbol, Nullness::Unknown);
                Nullness::Unknown
            }
            (_, None) => {
                match target.kind() {
                    K::MemberAccessExpr | K::ElementAccessExpr => {
                        // the stored-to receiver is dereferenced; its member is not read
                        if let Some(receiver) = target.child(0) {
                            self.eval(receiver, state);
                            self.dereference(receiver, DereferenceKind::Reference, state);
                        }
                        for index in target.children().skip(1) {
                            self.eval(index, state);
                        }
                    }
                    _ => {
                        self.eval(target, state);
                    }
                }
                self.eval(value, state)
            }
        }
    }

    fn binary(&mut self, node: Node<'_>, state: &mut NullState) -> Nullness {
        let analysis = self.analysis;
        let (Some(left), Some(right)) = (node.child(0), node.child(1)) else {
            self.children(node, state);
            return Nullness::Unknown;
        };
        match node.token_kind() {
            Some(TokenKind::QuestionQuestion) => {
                let l = self.eval(left, state);
                match l {
                    Nullness::NotNull => Nullness::NotNull,
                    Nullness::Null => self.eval(right, state),
                    _ => {
                        let variable = analysis.tracked_var(left);
                        let mut kept = state.clone();
                        let mut fallback = state.clone();
                        if let Some(symbol) = variable {
                            analysis.narrow(symbol, Nullness::NotNull, &mut kept);
                            analysis.narrow(symbol, Nullness::Null, &mut fallback);
                        }
                        let r = self.eval(right, &mut fallback);
                        let (merged, value) = merge((kept, Nullness::NotNull), (fallback, r));
                        *state = merged;
                        value
                    }
                }
            }
            Some(op @ (TokenKind::AmpAmp | TokenKind::PipePipe)) => {
                self.eval(left, state);
                let conjunction = op == TokenKind::AmpAmp;
                let mut short = state.clone();
                analysis.refine(left, !conjunction, &mut short);
                let mut long = state.clone();
                analysis.refine(left, conjunction, &mut long);
                self.eval(right, &mut long);
                *state = short.join(&long);
                Nullness::NotNull
            }
            _ => {
                self.eval(left, state);
                self.eval(right, state);
                self.typed(node)
            }
        }
    }

    fn switch_expr(&mut self, node: Node<'_>, state: &mut NullState) -> Nullness {
        let analysis = self.analysis;
        let Some(governing) = node.child(0) else {
            return Nullness::Unknown;
        };
        self.eval(governing, state);
        let subject = analysis.tracked_var(governing);
        let mut result: Option<(NullState, Nullness)> = None;
        for arm in node.children_of_kind(K::SwitchExprArm) {
            let mut arm_state = state.clone();
            if let Some(pattern) = arm.child(0) {
                analysis.refine_pattern(subject, pattern, true, &mut arm_state);
            }
            if let Some(filter) = arm.child_of_kind(K::WhenClause).and_then(|w| w.child(0)) {
                self.eval(filter, &mut arm_state);
                analysis.refine(filter, true, &mut arm_state);
            }
            let value = match arm.children().last().filter(|c| c.kind().is_expression()) {
                Some(expr) => self.eval(expr, &mut arm_state),
                None => Nullness::Unknown,
            };
            result = Some(match result {
                None => (arm_state, value),
                Some(prev) => merge(prev, (arm_state, value)),
            });
        }
        match result {
            Some((merged, value)) => {
                *state = merged;
                value
            }
            None => Nullness::Unknown,
        }
    }
}

fn is_foreach_collection(node: Node<'_>) -> bool {
    node.parent()
        .is_some_and(|p| p.kind() == K::ForEachStmt && p.child(1).map(|c| c.id()) == Some(node.id()))
}

/// Dereferences of possibly-null variables in one member, ordered by position
pub fn null_dereferences(
    tree: &SyntaxTree,
    model: &SemanticModel,
    member: Node<'_>,
    cfg: &ControlFlowGraph,
    deadline: &Deadline,
) -> Result<Vec<NullDereference>, Timeout> {
    let analysis = NullnessAnalysis::new(tree, model, member);
    let results = solve(cfg, &analysis, deadline)?;
    let mut findings = Vec::new();
    for block in cfg.blocks().iter().filter(|b| b.reachable) {
        let mut state = results.entry_state(block.id).clone();
        Interpreter {
            analysis: &analysis,
            findings: Some(&mut findings),
        }
        .block(block, &mut state);
    }
    let mut seen = BTreeSet::new();
    findings.retain(|f| seen.insert(f.node));
    findings.sort_by_key(|f| tree.node(f.node).span().start);
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg;
    use crate::syntax::{parse, ParseOptions};

    fn findings(body: &str) -> Vec<(String, DereferenceKind)> {
        let text = format!("class C {{ void M(bool c, string p) {{ {} }} }}", body);
        let tree = parse(&text, &ParseOptions::default());
        let model = SemanticModel::bind(&tree);
        let method = tree.preorder().find(|n| n.kind() == K::MethodDecl).unwrap();
        let graph = cfg::build(method);
        null_dereferences(&tree, &model, method, &graph, &Deadline::none())
            .unwrap()
            .into_iter()
            .map(|f| (model.symbol(f.symbol).name.clone(), f.kind))
            .collect()
    }

    #[test]
    fn test_lattice_join() {
        use Nullness::*;
        assert_eq!(Null.join(NotNull), MaybeNull);
        assert_eq!(Null.join(Unknown), MaybeNull);
        assert_eq!(NotNull.join(Unknown), Unknown);
        assert_eq!(NotNull.join(NotNull), NotNull);
        assert_eq!(MaybeNull.join(NotNull), MaybeNull);
    }

    #[test]
    fn test_null_on_one_path() {
        assert_eq!(
            findings(r#"string s = null; if (c) { s = "a"; } int n = s.Length;"#),
            vec![("s".to_string(), DereferenceKind::Reference)]
        );
    }

    #[test]
    fn test_guard_and_early_return() {
        assert!(findings("if (p == null) { return; } int n = p.Length;").is_empty());
        assert!(findings("if (p is null) { throw new Exception(); } int n = p.Length;").is_empty());
        assert_eq!(
            findings("if (p == null) { Log(); } int n = p.Length;"),
            vec![("p".to_string(), DereferenceKind::Reference)]
        );
    }

    #[test]
    fn test_conditional_access_and_coalesce_are_not_dereferences() {
        assert!(findings(
            r#"string s = null; var t = s ?? "x"; var u = s?.Length; if (s is not null) { s.Trim(); }"#
        )
        .is_empty());
        assert!(findings("string s = null; if (s != null && s.Length > 0) { Log(); }").is_empty());
    }

    #[test]
    fn test_reported_once_then_not_null() {
        assert_eq!(
            findings("string s = null; s.Trim(); s.Trim();"),
            vec![("s".to_string(), DereferenceKind::Reference)]
        );
    }

    #[test]
    fn test_nullable_value_access() {
        assert_eq!(
            findings("int? v = null; int x = 0; if (v.HasValue) { x = v.Value; } x = v.Value;"),
            vec![("v".to_string(), DereferenceKind::NullableValue)]
        );
        assert_eq!(
            findings("int? v = null; int x = (int)v;"),
            vec![("v".to_string(), DereferenceKind::NullableValue)]
        );
        assert!(findings("int? v = null; int x = v.GetValueOrDefault();").is_empty());
    }

    #[test]
    fn test_foreach_over_null_collection() {
        assert_eq!(
            findings("string[] items = null; foreach (var i in items) { Log(); }"),
            vec![("items".to_string(), DereferenceKind::Reference)]
        );
    }

    #[test]
    fn test_infeasible_paths_and_captures_are_silent() {
        assert!(findings("string s = null; if (s != null) { s.Trim(); }").is_empty());
        assert!(findings(r#"string s = null; Run(() => s = "a"); s.Trim();"#).is_empty());
    }
}
