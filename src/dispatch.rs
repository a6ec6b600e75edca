//! Single-pass rule dispatch with per-rule failure isolation

use crate::cfg::{self, ControlFlowGraph};
use crate::dataflow::{Deadline, Timeout};
use crate::diagnostic::Severity;
use crate::engine::RuleTiming;
use crate::reporter::{Issue, StampedIssue};
use crate::rule::{Rule, RuleError, RuleMeta};
use crate::semantic::SemanticModel;
use crate::syntax::{Node, NodeId, Span, SyntaxKind, SyntaxTree};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

/// A rule selected for one file, with its effective configuration
#[derive(Clone)]
pub struct ActiveRule<'r> {
    pub rule: &'r dyn Rule,
    pub severity: Severity,
    /// Configured parameter values; unset ones fall back to the rule's defaults
    pub parameters: HashMap<String, serde_json::Value>,
}

impl<'r> ActiveRule<'r> {
    pub fn new(rule: &'r dyn Rule) -> Self {
        Self {
            rule,
            severity: rule.meta().severity,
            parameters: HashMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_parameters(mut self, parameters: HashMap<String, serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A rule invocation that panicked or returned an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFailure {
    pub rule_id: String,
    /// Span of the node being checked; empty for `finalize`
    pub span: Span,
    pub line: usize,
    pub message: String,
}

/// Per-file accumulators, one typed slot per rule
#[derive(Default)]
pub struct PassState {
    slots: HashMap<(usize, TypeId), Box<dyn Any>>,
}

impl PassState {
    fn take<T: Default + 'static>(&mut self, rule: usize) -> T {
        self.slots
            .remove(&(rule, TypeId::of::<T>()))
            .and_then(|slot| slot.downcast::<T>().ok())
            .map(|slot| *slot)
            .unwrap_or_default()
    }

    fn put<T: 'static>(&mut self, rule: usize, value: T) {
        self.slots.insert((rule, TypeId::of::<T>()), Box::new(value));
    }
}

/// A value taken out of [`PassState`], returned to it on drop even when the
/// rule panics while holding it
struct StateSlot<'s, T: 'static> {
    state: &'s RefCell<PassState>,
    rule: usize,
    value: Option<T>,
}

impl<T: 'static> Drop for StateSlot<'_, T> {
    fn drop(&mut self) {
        if let (Some(value), Ok(mut state)) = (self.value.take(), self.state.try_borrow_mut()) {
            state.put(self.rule, value);
        }
    }
}

/// Read-only view of the file under analysis, handed to every rule invocation
pub struct RuleContext<'a> {
    file: &'a Path,
    tree: &'a SyntaxTree,
    model: &'a SemanticModel,
    deadline: Deadline,
    rules: &'a [ActiveRule<'a>],
    current: Cell<usize>,
    cfgs: RefCell<HashMap<NodeId, Rc<ControlFlowGraph>>>,
    state: RefCell<PassState>,
    issues: RefCell<Vec<StampedIssue>>,
}

impl<'a> RuleContext<'a> {
    fn new(
        file: &'a Path,
        tree: &'a SyntaxTree,
        model: &'a SemanticModel,
        deadline: Deadline,
        rules: &'a [ActiveRule<'a>],
    ) -> Self {
        Self {
            file,
            tree,
            model,
            deadline,
            rules,
            current: Cell::new(0),
            cfgs: RefCell::new(HashMap::new()),
            state: RefCell::new(PassState::default()),
            issues: RefCell::new(Vec::new()),
        }
    }

    pub fn file(&self) -> &'a Path {
        self.file
    }

    pub fn tree(&self) -> &'a SyntaxTree {
        self.tree
    }

    pub fn model(&self) -> &'a SemanticModel {
        self.model
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Metadata of the rule currently running
    pub fn meta(&self) -> &'a RuleMeta {
        self.rules[self.current.get()].rule.meta()
    }

    /// Control-flow graph of an executable member, built once per pass
    pub fn cfg_for(&self, member: Node<'_>) -> Rc<ControlFlowGraph> {
        if let Some(graph) = self.cfgs.borrow().get(&member.id()) {
            return Rc::clone(graph);
        }
        let graph = Rc::new(cfg::build(self.tree.node(member.id())));
        self.cfgs.borrow_mut().insert(member.id(), Rc::clone(&graph));
        graph
    }

    /// Run `f` on the current rule's accumulator of type `T`
    pub fn with_state<T: Default + 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let rule = self.current.get();
        let value: T = self.state.borrow_mut().take(rule);
        let mut slot = StateSlot {
            state: &self.state,
            rule,
            value: Some(value),
        };
        f(slot.value.get_or_insert_with(T::default))
    }

    /// Effective value of a parameter of the current rule
    pub fn parameter(&self, name: &str) -> Option<serde_json::Value> {
        let active = &self.rules[self.current.get()];
        active
            .parameters
            .get(name)
            .cloned()
            .or_else(|| active.rule.meta().parameter(name).map(|p| p.default.clone()))
    }

    pub fn parameter_u64(&self, name: &str) -> Result<u64, RuleError> {
        match self.parameter(name) {
            Some(value) => value.as_u64().ok_or_else(|| RuleError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected a non-negative integer, got {}", value),
            }),
            None => Err(RuleError::InvalidParameter {
                name: name.to_string(),
                reason: "no value and no default".to_string(),
            }),
        }
    }

    /// Report an issue for the current rule
    pub fn report(&self, issue: Issue) {
        let active = &self.rules[self.current.get()];
        let meta = active.rule.meta();
        self.issues.borrow_mut().push(StampedIssue {
            rule_id: meta.id.clone(),
            severity: active.severity,
            policy: meta.report_policy,
            help: Some(meta.description.clone()),
            issue,
        });
    }

    fn issue_count(&self) -> usize {
        self.issues.borrow().len()
    }
}

/// Everything one pass produced
#[derive(Debug, Default)]
pub struct DispatchOutput {
    pub issues: Vec<StampedIssue>,
    pub failures: Vec<RuleFailure>,
    pub timings: HashMap<String, RuleTiming>,
}

/// Runs a fixed set of rules over one file in a single pre-order traversal
pub struct Dispatcher<'r> {
    rules: Vec<ActiveRule<'r>>,
    table: HashMap<SyntaxKind, Vec<usize>>,
}

enum Outcome {
    Done,
    Failed(String),
    TimedOut(Timeout),
}

impl<'r> Dispatcher<'r> {
    pub fn new(rules: Vec<ActiveRule<'r>>) -> Self {
        let mut table: HashMap<SyntaxKind, Vec<usize>> = HashMap::new();
        for (index, active) in rules.iter().enumerate() {
            for &kind in active.rule.triggers() {
                let entry = table.entry(kind).or_default();
                if !entry.contains(&index) {
                    entry.push(index);
                }
            }
        }
        Self { rules, table }
    }

    pub fn rules(&self) -> &[ActiveRule<'r>] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Traverse the tree once, then finalize every rule.
    ///
    /// Returns `Err` only when the deadline expires; partial output is dropped.
    pub fn run(
        &self,
        file: &Path,
        tree: &SyntaxTree,
        model: &SemanticModel,
        deadline: Deadline,
    ) -> Result<DispatchOutput, Timeout> {
        let ctx = RuleContext::new(file, tree, model, deadline, &self.rules);
        let mut failures = Vec::new();
        let mut timings: HashMap<String, RuleTiming> = HashMap::new();

        for node in tree.preorder() {
            deadline.check()?;
            let Some(indices) = self.table.get(&node.kind()) else {
                continue;
            };
            for &index in indices {
                ctx.current.set(index);
                let outcome = self.invoke(&ctx, index, &mut timings, |rule| rule.check(&ctx, node));
                self.record(outcome, index, node.span(), tree, &mut failures)?;
            }
        }

        for index in 0..self.rules.len() {
            deadline.check()?;
            ctx.current.set(index);
            let outcome = self.invoke(&ctx, index, &mut timings, |rule| rule.finalize(&ctx));
            self.record(outcome, index, Span::empty(0), tree, &mut failures)?;
        }

        Ok(DispatchOutput {
            issues: ctx.issues.into_inner(),
            failures,
            timings,
        })
    }

    fn invoke(
        &self,
        ctx: &RuleContext<'_>,
        index: usize,
        timings: &mut HashMap<String, RuleTiming>,
        call: impl FnOnce(&dyn Rule) -> Result<(), RuleError>,
    ) -> Outcome {
        let rule = self.rules[index].rule;
        let before = ctx.issue_count();
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| call(rule)));
        let elapsed = start.elapsed();

        let timing = timings
            .entry(rule.id().to_string())
            .or_insert_with(|| RuleTiming::new(rule.id()));
        timing.total_time += elapsed;
        timing.evaluation_count += 1;
        timing.match_count += ctx.issue_count().saturating_sub(before);

        match result {
            Ok(Ok(())) => Outcome::Done,
            Ok(Err(RuleError::Timeout(timeout))) => Outcome::TimedOut(timeout),
            Ok(Err(err)) => Outcome::Failed(err.to_string()),
            Err(payload) => Outcome::Failed(panic_message(payload.as_ref())),
        }
    }

    fn record(
        &self,
        outcome: Outcome,
        index: usize,
        span: Span,
        tree: &SyntaxTree,
        failures: &mut Vec<RuleFailure>,
    ) -> Result<(), Timeout> {
        match outcome {
            Outcome::Done => Ok(()),
            Outcome::TimedOut(timeout) => Err(timeout),
            Outcome::Failed(message) => {
                let rule_id = self.rules[index].rule.id().to_string();
                let line = tree.line_col(span.start).line;
                log::warn!("rule {} failed at line {}: {}", rule_id, line, message);
                failures.push(RuleFailure {
                    rule_id,
                    span,
                    line,
                    message,
                });
                Ok(())
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, ParseOptions};

    struct CountingRule {
        meta: RuleMeta,
    }

    impl CountingRule {
        fn new() -> Self {
            Self {
                meta: RuleMeta::new("count-methods", "CountMethods", "Counts methods")
                    .with_parameter("limit", "Most methods allowed", serde_json::json!(1)),
            }
        }
    }

    impl Rule for CountingRule {
        fn meta(&self) -> &RuleMeta {
            &self.meta
        }

        fn triggers(&self) -> &[SyntaxKind] {
            &[SyntaxKind::MethodDecl]
        }

        fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
            ctx.with_state(|seen: &mut Vec<Span>| seen.push(node.span()));
            Ok(())
        }

        fn finalize(&self, ctx: &RuleContext<'_>) -> Result<(), RuleError> {
            let limit = ctx.parameter_u64("limit")? as usize;
            let seen = ctx.with_state(|seen: &mut Vec<Span>| seen.clone());
            if seen.len() > limit {
                ctx.report(Issue::new(seen[limit], format!("{} methods", seen.len())));
            }
            Ok(())
        }
    }

    struct PanickingRule {
        meta: RuleMeta,
    }

    impl Rule for PanickingRule {
        fn meta(&self) -> &RuleMeta {
            &self.meta
        }

        fn triggers(&self) -> &[SyntaxKind] {
            &[SyntaxKind::MethodDecl]
        }

        fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
            if node.name() == Some("Bad") {
                panic!("cannot handle {}", node.text().len());
            }
            if node.name() == Some("Worse") {
                return Err(RuleError::internal("unsupported"));
            }
            ctx.report(Issue::new(node.span(), "seen"));
            Ok(())
        }
    }

    /// Collects method names, panicking on `Bad` while holding its state
    struct CollectingRule {
        meta: RuleMeta,
    }

    impl Rule for CollectingRule {
        fn meta(&self) -> &RuleMeta {
            &self.meta
        }

        fn triggers(&self) -> &[SyntaxKind] {
            &[SyntaxKind::MethodDecl]
        }

        fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
            let name = node.name().unwrap_or("").to_string();
            ctx.with_state(|names: &mut Vec<String>| {
                if name == "Bad" {
                    panic!("cannot collect {}", name);
                }
                names.push(name);
            });
            Ok(())
        }

        fn finalize(&self, ctx: &RuleContext<'_>) -> Result<(), RuleError> {
            let names = ctx.with_state(|names: &mut Vec<String>| names.join(","));
            ctx.report(Issue::new(ctx.tree().root().span(), names));
            Ok(())
        }
    }

    fn run(rules: Vec<ActiveRule<'_>>, text: &str) -> DispatchOutput {
        let tree = parse(text, &ParseOptions::default());
        let model = SemanticModel::bind(&tree);
        Dispatcher::new(rules)
            .run(Path::new("a.cs"), &tree, &model, Deadline::none())
            .unwrap()
    }

    #[test]
    fn test_two_phase_rule_with_pass_state() {
        let rule = CountingRule::new();
        let text = "class C { void A() { } void B() { } void D() { } }";
        let output = run(vec![ActiveRule::new(&rule)], text);
        assert_eq!(output.issues.len(), 1);
        assert_eq!(output.issues[0].issue.message, "3 methods");
        assert_eq!(output.issues[0].rule_id, "count-methods");
        let timing = &output.timings["count-methods"];
        assert_eq!(timing.evaluation_count, 4);
        assert_eq!(timing.match_count, 1);
    }

    #[test]
    fn test_configured_parameter_overrides_default() {
        let rule = CountingRule::new();
        let active = ActiveRule::new(&rule)
            .with_parameters([("limit".to_string(), serde_json::json!(5))].into())
            .with_severity(Severity::Error);
        let output = run(vec![active], "class C { void A() { } void B() { } }");
        assert!(output.issues.is_empty());

        let bad = ActiveRule::new(&rule).with_parameters([("limit".to_string(), serde_json::json!("x"))].into());
        let output = run(vec![bad], "class C { void A() { } }");
        assert_eq!(output.failures.len(), 1);
        assert!(output.failures[0].message.contains("limit"));
    }

    #[test]
    fn test_failures_are_isolated_per_node() {
        let panicking = PanickingRule {
            meta: RuleMeta::new("fragile", "Fragile", "Breaks on some methods"),
        };
        let counting = CountingRule::new();
        let text = "class C {\n void Bad() { }\n void Worse() { }\n void Good() { }\n}";
        let output = run(vec![ActiveRule::new(&panicking), ActiveRule::new(&counting)], text);

        let failed_lines: Vec<usize> = output.failures.iter().map(|f| f.line).collect();
        assert_eq!(failed_lines, vec![2, 3]);
        assert!(output.failures[0].message.starts_with("panicked"));
        assert_eq!(output.failures[1].message, "unsupported");
        let ids: Vec<&str> = output.issues.iter().map(|i| i.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["fragile", "count-methods"]);
    }

    #[test]
    fn test_panic_inside_state_keeps_accumulator() {
        let rule = CollectingRule {
            meta: RuleMeta::new("collect", "Collect", "Collects method names"),
        };
        let text = "class C {\n void A() { }\n void Bad() { }\n void D() { }\n}";
        let output = run(vec![ActiveRule::new(&rule)], text);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].line, 3);
        assert_eq!(output.issues.len(), 1);
        assert_eq!(output.issues[0].issue.message, "A,D");
    }

    #[test]
    fn test_expired_deadline_aborts() {
        let rule = CountingRule::new();
        let tree = parse("class C { void A() { } }", &ParseOptions::default());
        let model = SemanticModel::bind(&tree);
        let dispatcher = Dispatcher::new(vec![ActiveRule::new(&rule)]);
        let expired = Deadline::after_ms(1);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(dispatcher.run(Path::new("a.cs"), &tree, &model, expired).is_err());
    }
}
