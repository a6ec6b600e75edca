//! End-to-end checks: every built-in rule against its fixture, plus engine
//! properties that only show up across whole files.

use lintel::dataflow::Deadline;
use lintel::engine::{PARSE_ERROR_RULE_ID, TIMEOUT_RULE_ID};
use lintel::fixer::{FixMode, Fixer};
use lintel::output::formatter_for;
use lintel::reporter::Issue;
use lintel::syntax::{Node, SyntaxKind};
use lintel::verify::{fixed_sibling, VerifyError};
use lintel::{Config, Engine, Registry, Rule, RuleContext, RuleError, RuleMeta, Verifier};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures").join(name)
}

fn fixture_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(fixture(""))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "cs"))
        .filter(|p| !p.to_string_lossy().ends_with(".Fixed.cs"))
        .collect();
    paths.sort();
    paths
}

/// Verify a fixture with the rule named by its file stem
fn verify_with(name: &str, configure: impl FnOnce(Verifier<'_>) -> Verifier<'_>) {
    let registry = Registry::builtin();
    let path = fixture(name);
    let stem = name.split('.').next().unwrap();
    let rule = registry.find(stem).unwrap_or_else(|| panic!("no rule named {}", stem));

    let mut verifier = Verifier::new(rule).fixture(&path);
    if let Some(fixed) = fixed_sibling(&path) {
        verifier = verifier.code_fix(fixed);
    }
    match configure(verifier).verify() {
        Ok(()) => {}
        Err(VerifyError::Failed(failure)) => panic!("\n{}", failure),
        Err(err) => panic!("{}: {}", name, err),
    }
}

fn verify(name: &str) {
    verify_with(name, |v| v);
}

#[test]
fn test_boolean_literal_fixture() {
    verify("BooleanLiteralUnnecessary.cs");
}

#[test]
fn test_for_loop_increment_fixture() {
    verify("ForLoopIncrementSign.cs");
}

#[test]
fn test_disposable_not_disposed_fixture() {
    verify("DisposableNotDisposed.cs");
}

#[test]
fn test_disposed_more_than_once_fixture() {
    verify("ObjectsShouldNotBeDisposedMoreThanOnce.cs");
}

#[test]
fn test_null_pointer_dereference_fixture() {
    verify("NullPointerDereference.cs");
}

#[test]
fn test_empty_nullable_value_fixture() {
    verify("EmptyNullableValueAccess.cs");
}

#[test]
fn test_redundant_jump_fixture() {
    verify("RedundantJumpStatement.cs");
}

#[test]
fn test_unused_private_member_fixture() {
    verify("UnusedPrivateMember.cs");
}

#[test]
fn test_function_complexity_fixture() {
    verify_with("FunctionComplexity.cs", |v| v.parameter("maximum", json!(2)));
}

#[test]
fn test_dead_stores_fixture() {
    verify("DeadStores.cs");
}

#[test]
fn test_fixture_fails_against_other_rule() {
    let registry = Registry::builtin();
    let rule = registry.get("dead-store").unwrap();
    let result = Verifier::new(rule).fixture(fixture("BooleanLiteralUnnecessary.cs")).verify();
    match result {
        Err(VerifyError::Failed(failure)) => {
            assert_eq!(failure.rule_id, "dead-store");
            assert!(!failure.problems.is_empty());
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

fn strict_engine(parallel: bool) -> Engine {
    let mut config = Config::preset("strict").unwrap();
    config.engine.parallel = parallel;
    Engine::new(config)
}

#[test]
fn test_parallel_matches_sequential() {
    let files = fixture_paths();
    let parallel = strict_engine(true).analyze_files(&files);
    let sequential = strict_engine(false).analyze_files(&files);

    assert_eq!(parallel.files_processed, files.len());
    assert_eq!(parallel.diagnostics, sequential.diagnostics);
    assert_eq!(parallel.error_count, sequential.error_count);
    assert_eq!(parallel.warning_count, sequential.warning_count);
    assert!(parallel.rule_failures.is_empty(), "{:?}", parallel.rule_failures);
}

#[test]
fn test_analysis_is_deterministic() {
    let engine = strict_engine(false);
    let path = fixture("DisposableNotDisposed.cs");
    let first = engine.analyze_file(&path);
    let second = engine.analyze_file(&path);
    assert_eq!(first.diagnostics, second.diagnostics);
    assert!(!first.diagnostics.is_empty());
}

#[test]
fn test_fix_is_idempotent() {
    let engine = strict_engine(false);
    let path = fixture("BooleanLiteralUnnecessary.cs");
    let text = std::fs::read_to_string(&path).unwrap();

    let once = Fixer::fix_all(&engine, &path, &text, FixMode::SafeOnly);
    assert!(once.applied > 0);
    let twice = Fixer::fix_all(&engine, &path, &once.text, FixMode::SafeOnly);
    assert_eq!(twice.applied, 0);
    assert_eq!(twice.text, once.text);
}

#[test]
fn test_suppression_comments() {
    let engine = strict_engine(false);
    let text = "class C\n{\n    void M(bool a)\n    {\n        var x = a == true; // lintel-disable-line boolean-literal-unnecessary\n        var y = a == true;\n        System.Console.WriteLine(x && y);\n    }\n}\n";
    let analysis = engine.analyze_source(Path::new("Suppressed.cs"), text);
    let lines: Vec<usize> = analysis
        .diagnostics
        .iter()
        .filter(|d| d.rule_id == "boolean-literal-unnecessary")
        .map(|d| d.location.line)
        .collect();
    assert_eq!(lines, vec![6]);
}

#[test]
fn test_deeply_nested_source_is_analyzed() {
    let engine = strict_engine(false);
    let parens = format!(
        "class C\n{{\n    int M() => {}1{};\n}}\n",
        "(".repeat(1000),
        ")".repeat(1000)
    );
    let ifs = format!(
        "class C\n{{\n    void M(bool b)\n    {{\n{}return;{}\n    }}\n}}\n",
        "if (b) {\n".repeat(1000),
        "}\n".repeat(1000)
    );
    for text in [parens, ifs] {
        let analysis = engine.analyze_source(Path::new("Deep.cs"), &text);
        assert!(!analysis.timed_out);
        assert!(analysis
            .diagnostics
            .iter()
            .any(|d| d.rule_id == PARSE_ERROR_RULE_ID && d.message.contains("nesting too deep")));
    }
}

/// Sleeps on every method so a short budget always runs out
struct SlowRule {
    meta: RuleMeta,
}

impl Rule for SlowRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn triggers(&self) -> &[SyntaxKind] {
        &[SyntaxKind::MethodDecl]
    }

    fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
        std::thread::sleep(Duration::from_millis(40));
        ctx.deadline().check()?;
        ctx.report(Issue::new(node.span(), "slow"));
        Ok(())
    }
}

#[test]
fn test_timeout_reports_single_diagnostic() {
    let mut registry = Registry::new();
    registry
        .register(Box::new(SlowRule {
            meta: RuleMeta::new("slow-rule", "SlowRule", "Sleeps"),
        }))
        .unwrap();
    let mut config = Config::new();
    config.engine.timeout_ms = 5;
    let engine = Engine::with_registry(config, registry);

    let text = "class C { void A() { } void B() { } void D() { } }";
    let analysis = engine.analyze_source(Path::new("Slow.cs"), text);
    assert!(analysis.timed_out);
    assert_eq!(analysis.diagnostics.len(), 1);
    assert_eq!(analysis.diagnostics[0].rule_id, TIMEOUT_RULE_ID);
    assert!(Deadline::none().check().is_ok());
}

#[test]
fn test_sarif_output_lists_related_locations() {
    let engine = strict_engine(false);
    let result = engine.analyze_files(&[fixture("ForLoopIncrementSign.cs")]);
    let sarif = formatter_for(lintel::config::OutputFormat::Sarif, false, false, engine.registry()).format(&result);
    let value: serde_json::Value = serde_json::from_str(&sarif).unwrap();
    let results: Vec<&serde_json::Value> = value["runs"][0]["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["ruleId"] == "for-loop-increment-sign")
        .collect();
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r["relatedLocations"].as_array().is_some_and(|l| l.len() == 1)));
}
