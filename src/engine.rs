//! Core analysis engine

use crate::config::Config;
use crate::dataflow::{Deadline, Timeout};
use crate::diagnostic::{Diagnostic, Location, Severity};
use crate::dispatch::{ActiveRule, Dispatcher, RuleFailure};
use crate::registry::Registry;
use crate::reporter::Reporter;
use crate::semantic::SemanticModel;
use crate::suppression::Suppressions;
use crate::syntax::{parse, ParseOptions, SyntaxTree};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Rule id of the diagnostic replacing a timed-out file's results
pub const TIMEOUT_RULE_ID: &str = "analysis-timeout";
/// Rule id of syntax error diagnostics
pub const PARSE_ERROR_RULE_ID: &str = "parse-error";
/// Rule id of unreadable file diagnostics
pub const READ_ERROR_RULE_ID: &str = "file-read-error";

/// Failure to analyse one file
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Timeout(#[from] Timeout),
}

/// Per-rule timing statistics
#[derive(Debug, Clone, Default)]
pub struct RuleTiming {
    /// Rule ID
    pub rule_id: String,
    /// Total time spent on this rule
    pub total_time: Duration,
    /// Number of times the rule was evaluated
    pub evaluation_count: usize,
    /// Number of issues reported
    pub match_count: usize,
}

impl RuleTiming {
    /// Create a new timing entry
    pub fn new(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            ..Default::default()
        }
    }

    /// Average time per evaluation
    pub fn avg_time(&self) -> Duration {
        if self.evaluation_count > 0 {
            self.total_time / self.evaluation_count as u32
        } else {
            Duration::ZERO
        }
    }

    fn absorb(&mut self, other: &RuleTiming) {
        self.total_time += other.total_time;
        self.evaluation_count += other.evaluation_count;
        self.match_count += other.match_count;
    }
}

/// Everything produced for one file
#[derive(Debug, Default)]
pub struct FileAnalysis {
    pub path: PathBuf,
    /// Sorted by (line, column, rule id)
    pub diagnostics: Vec<Diagnostic>,
    pub failures: Vec<RuleFailure>,
    pub timings: HashMap<String, RuleTiming>,
    pub timed_out: bool,
}

/// Result of analysing a set of files
#[derive(Debug, Default)]
pub struct LintResult {
    /// All diagnostics, grouped by file in input order
    pub diagnostics: Vec<Diagnostic>,

    /// Files processed
    pub files_processed: usize,

    /// Files with errors
    pub files_with_errors: usize,

    /// Files with warnings
    pub files_with_warnings: usize,

    /// Files whose analysis hit the time budget
    pub files_timed_out: usize,

    /// Total errors
    pub error_count: usize,

    /// Total warnings
    pub warning_count: usize,

    /// Total info messages
    pub info_count: usize,

    /// Rule invocations that failed, with the file they failed on
    pub rule_failures: Vec<(PathBuf, RuleFailure)>,

    /// Processing duration
    pub duration: Duration,

    /// Per-rule timing statistics (rule_id -> timing)
    pub rule_timings: HashMap<String, RuleTiming>,
}

impl LintResult {
    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    /// Check if there are any warnings
    pub fn has_warnings(&self) -> bool {
        self.warning_count > 0
    }

    /// Check if result is clean (no errors or warnings)
    pub fn is_clean(&self) -> bool {
        self.error_count == 0 && self.warning_count == 0
    }

    /// Get exit code (0 = success, 1 = warnings, 2 = errors)
    pub fn exit_code(&self) -> i32 {
        if self.error_count > 0 {
            2
        } else if self.warning_count > 0 {
            1
        } else {
            0
        }
    }

    /// Fold one file's analysis into the totals
    pub fn add_file(&mut self, analysis: FileAnalysis) {
        let mut file = LintResult {
            files_processed: 1,
            files_timed_out: usize::from(analysis.timed_out),
            rule_timings: analysis.timings,
            ..LintResult::default()
        };
        for diag in &analysis.diagnostics {
            match diag.severity {
                Severity::Error => file.error_count += 1,
                Severity::Warning => file.warning_count += 1,
                Severity::Info => file.info_count += 1,
            }
        }
        if file.error_count > 0 {
            file.files_with_errors = 1;
        }
        if file.warning_count > 0 {
            file.files_with_warnings = 1;
        }
        file.diagnostics = analysis.diagnostics;
        file.rule_failures = analysis
            .failures
            .into_iter()
            .map(|failure| (analysis.path.clone(), failure))
            .collect();
        self.merge(file);
    }

    /// Merge another result into this one
    pub fn merge(&mut self, other: LintResult) {
        self.diagnostics.extend(other.diagnostics);
        self.files_processed += other.files_processed;
        self.files_with_errors += other.files_with_errors;
        self.files_with_warnings += other.files_with_warnings;
        self.files_timed_out += other.files_timed_out;
        self.error_count += other.error_count;
        self.warning_count += other.warning_count;
        self.info_count += other.info_count;
        self.rule_failures.extend(other.rule_failures);

        // Merge rule timings
        for (rule_id, timing) in other.rule_timings {
            self.rule_timings
                .entry(rule_id)
                .or_insert_with(|| RuleTiming::new(&timing.rule_id))
                .absorb(&timing);
        }
    }

    /// Get rule timings sorted by total time (descending)
    pub fn sorted_timings(&self) -> Vec<&RuleTiming> {
        let mut timings: Vec<_> = self.rule_timings.values().collect();
        timings.sort_by(|a, b| b.total_time.cmp(&a.total_time).then(a.rule_id.cmp(&b.rule_id)));
        timings
    }

    /// Format timing statistics as a string
    pub fn format_timings(&self) -> String {
        let mut output = String::new();
        let timings = self.sorted_timings();

        if timings.is_empty() {
            return "No timing data available".to_string();
        }

        output.push_str("Rule Timing Statistics:\n");
        output.push_str(&format!(
            "{:<40} {:>12} {:>12} {:>10} {:>12}\n",
            "Rule ID", "Total", "Avg", "Evals", "Matches"
        ));
        output.push_str(&"-".repeat(90));
        output.push('\n');

        for timing in timings {
            let total_ms = timing.total_time.as_secs_f64() * 1000.0;
            let avg_us = timing.avg_time().as_secs_f64() * 1_000_000.0;

            output.push_str(&format!(
                "{:<40} {:>10.2}ms {:>10.2}µs {:>10} {:>12}\n",
                timing.rule_id, total_ms, avg_us, timing.evaluation_count, timing.match_count
            ));
        }

        output
    }
}

/// The main analysis engine
pub struct Engine {
    /// Configuration
    config: Config,

    /// Rules available to this engine
    registry: Registry,

    /// Options every file is parsed with
    parse_options: ParseOptions,
}

impl Engine {
    /// Create an engine running the built-in rules
    pub fn new(config: Config) -> Self {
        Self::with_registry(config, Registry::builtin())
    }

    /// Create an engine running the rules of `registry`
    pub fn with_registry(config: Config, registry: Registry) -> Self {
        let parse_options = config.parse_options();
        Self {
            config,
            registry,
            parse_options,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Rules that run on `path`, with configured severity and parameters
    fn active_rules(&self, path: &Path, suppressions: &Suppressions) -> Vec<ActiveRule<'_>> {
        self.registry
            .iter()
            .filter(|rule| self.config.is_rule_active(rule.meta()))
            .filter(|rule| !self.config.should_ignore_rule_for_file(rule.id(), path))
            .filter(|rule| !suppressions.is_disabled_for_file(rule.id()))
            .map(|rule| {
                let mut active =
                    ActiveRule::new(rule).with_parameters(self.config.rule_parameters(rule.id()));
                if let Some(severity) = self.config.get_severity_override(rule.id()) {
                    active = active.with_severity(severity);
                }
                active
            })
            .collect()
    }

    fn parse_diagnostics(&self, path: &Path, tree: &SyntaxTree) -> Vec<Diagnostic> {
        if !self.config.engine.report_parse_errors {
            return Vec::new();
        }
        tree.errors()
            .iter()
            .map(|error| {
                Diagnostic::new(
                    PARSE_ERROR_RULE_ID,
                    Severity::Error,
                    &error.message,
                    Location::of_span(path, tree, error.span),
                )
            })
            .collect()
    }

    /// Lex, parse, bind, dispatch and report one file's text
    pub fn try_analyze_source(&self, path: &Path, text: &str) -> Result<FileAnalysis, AnalysisError> {
        let deadline = Deadline::after_ms(self.config.engine.timeout_ms);
        let tree = parse(text, &self.parse_options);
        log::debug!(
            "parsed {} ({} nodes, {} errors)",
            path.display(),
            tree.len(),
            tree.errors().len()
        );
        deadline.check()?;

        let model = SemanticModel::bind(&tree);
        deadline.check()?;

        let suppressions = Suppressions::from_tree(&tree);
        let rules = self.active_rules(path, &suppressions);
        log::debug!("running {} rule(s) on {}", rules.len(), path.display());
        let output = Dispatcher::new(rules).run(path, &tree, &model, deadline)?;

        let reporter = Reporter::new(path, &tree, &suppressions)
            .with_context_lines(self.config.output.context_lines);
        let mut diagnostics = self.parse_diagnostics(path, &tree);
        diagnostics.extend(reporter.finish(output.issues));
        diagnostics.sort_by(|a, b| {
            (a.location.line, a.location.column, &a.rule_id).cmp(&(
                b.location.line,
                b.location.column,
                &b.rule_id,
            ))
        });

        Ok(FileAnalysis {
            path: path.to_path_buf(),
            diagnostics,
            failures: output.failures,
            timings: output.timings,
            timed_out: false,
        })
    }

    /// Analyse one file's text; a timeout replaces the results with one diagnostic
    pub fn analyze_source(&self, path: &Path, text: &str) -> FileAnalysis {
        match self.try_analyze_source(path, text) {
            Ok(analysis) => analysis,
            Err(err) => {
                log::warn!("{}: {}", path.display(), err);
                let id = if matches!(err, AnalysisError::Timeout(_)) {
                    TIMEOUT_RULE_ID
                } else {
                    READ_ERROR_RULE_ID
                };
                FileAnalysis {
                    path: path.to_path_buf(),
                    diagnostics: vec![Diagnostic::new(
                        id,
                        Severity::Error,
                        &format!("Analysis aborted: {}", err),
                        Location::new(path.to_path_buf(), 1, 1),
                    )],
                    timed_out: matches!(err, AnalysisError::Timeout(_)),
                    ..FileAnalysis::default()
                }
            }
        }
    }

    /// Read and analyse one file
    pub fn analyze_file(&self, path: &Path) -> FileAnalysis {
        match std::fs::read_to_string(path) {
            Ok(content) => self.analyze_source(path, &content),
            Err(e) => FileAnalysis {
                path: path.to_path_buf(),
                diagnostics: vec![Diagnostic::new(
                    READ_ERROR_RULE_ID,
                    Severity::Error,
                    &format!("Failed to read file: {}", e),
                    Location::new(path.to_path_buf(), 0, 0),
                )],
                ..FileAnalysis::default()
            },
        }
    }

    /// Analyse multiple files, merging results in input order
    pub fn analyze_files(&self, files: &[PathBuf]) -> LintResult {
        let start = Instant::now();

        let analyses: Vec<FileAnalysis> = if self.config.engine.parallel && files.len() > 1 {
            let threads = if self.config.engine.jobs > 0 {
                self.config.engine.jobs
            } else {
                num_cpus::get()
            };
            match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                Ok(pool) => pool.install(|| files.par_iter().map(|f| self.analyze_file(f)).collect()),
                Err(err) => {
                    log::warn!("thread pool unavailable ({}), analysing sequentially", err);
                    files.iter().map(|f| self.analyze_file(f)).collect()
                }
            }
        } else {
            files.iter().map(|f| self.analyze_file(f)).collect()
        };

        let mut combined = LintResult::default();
        for analysis in analyses {
            combined.add_file(analysis);
        }

        combined.duration = start.elapsed();
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RuleContext;
    use crate::reporter::Issue;
    use crate::rule::{Rule, RuleError, RuleMeta};
    use crate::syntax::{Node, SyntaxKind};

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
            std::thread::sleep(Duration::from_millis(30));
            ctx.report(Issue::new(node.span(), "slow"));
            Ok(())
        }
    }

    fn slow_engine(timeout_ms: u64) -> Engine {
        let mut config = Config::new();
        config.engine.timeout_ms = timeout_ms;
        let mut registry = Registry::new();
        registry
            .register(Box::new(SlowRule {
                meta: RuleMeta::new("slow", "Slow", "Sleeps"),
            }))
            .unwrap();
        Engine::with_registry(config, registry)
    }

    #[test]
    fn test_lint_result_exit_code() {
        let mut result = LintResult::default();
        assert_eq!(result.exit_code(), 0);

        result.warning_count = 1;
        assert_eq!(result.exit_code(), 1);

        result.error_count = 1;
        assert_eq!(result.exit_code(), 2);
    }

    #[test]
    fn test_lint_result_is_clean() {
        let mut result = LintResult::default();
        assert!(result.is_clean());

        result.warning_count = 1;
        assert!(!result.is_clean());
    }

    #[test]
    fn test_lint_result_merge() {
        let mut result1 = LintResult::default();
        result1.files_processed = 1;
        result1.error_count = 2;
        result1.rule_timings.insert("a".to_string(), RuleTiming {
            rule_id: "a".to_string(),
            total_time: Duration::from_millis(2),
            evaluation_count: 2,
            match_count: 1,
        });

        let mut result2 = LintResult::default();
        result2.files_processed = 1;
        result2.warning_count = 3;
        result2.rule_timings.insert("a".to_string(), RuleTiming {
            rule_id: "a".to_string(),
            total_time: Duration::from_millis(4),
            evaluation_count: 2,
            match_count: 0,
        });

        result1.merge(result2);
        assert_eq!(result1.files_processed, 2);
        assert_eq!(result1.error_count, 2);
        assert_eq!(result1.warning_count, 3);
        let timing = &result1.rule_timings["a"];
        assert_eq!(timing.evaluation_count, 4);
        assert_eq!(timing.avg_time(), Duration::from_micros(1500));
        assert!(result1.format_timings().starts_with("Rule Timing Statistics:"));
    }

    #[test]
    fn test_analyze_source_reports_builtin_issue() {
        let engine = Engine::new(Config::new());
        let text = "class C {\n    void M(bool a) {\n        var x = a == true;\n    }\n}\n";
        let analysis = engine.analyze_source(Path::new("a.cs"), text);
        assert!(!analysis.timed_out);
        let ids: Vec<_> = analysis.diagnostics.iter().map(|d| d.rule_id.as_str()).collect();
        assert!(ids.contains(&"boolean-literal-unnecessary"), "{:?}", ids);
        assert!(analysis.timings.contains_key("boolean-literal-unnecessary"));
    }

    #[test]
    fn test_parse_errors_reported_and_rules_still_run() {
        let text = "class C {\n    void M(bool a) {\n        var x = a == true\n    }\n}\n";
        let engine = Engine::new(Config::new());
        let analysis = engine.analyze_source(Path::new("a.cs"), text);
        assert!(analysis.diagnostics.iter().any(|d| d.rule_id == PARSE_ERROR_RULE_ID));
        assert!(analysis
            .diagnostics
            .iter()
            .any(|d| d.rule_id == "boolean-literal-unnecessary"));

        let mut config = Config::new();
        config.engine.report_parse_errors = false;
        let quiet = Engine::new(config).analyze_source(Path::new("a.cs"), text);
        assert!(quiet.diagnostics.iter().all(|d| d.rule_id != PARSE_ERROR_RULE_ID));
    }

    #[test]
    fn test_disabled_rule_and_severity_override() {
        let text = "class C { void M(bool a) { var x = a == true; } }";
        let mut config = Config::new();
        config
            .rules
            .severity
            .insert("boolean-literal-unnecessary".to_string(), Severity::Error);
        let analysis = Engine::new(config.clone()).analyze_source(Path::new("a.cs"), text);
        assert!(analysis
            .diagnostics
            .iter()
            .any(|d| d.rule_id == "boolean-literal-unnecessary" && d.severity == Severity::Error));

        config.rules.disabled.push("boolean-literal-unnecessary".to_string());
        let analysis = Engine::new(config).analyze_source(Path::new("a.cs"), text);
        assert!(analysis
            .diagnostics
            .iter()
            .all(|d| d.rule_id != "boolean-literal-unnecessary"));
    }

    #[test]
    fn test_timeout_discards_partial_results() {
        let text = "class C { void A() { } void B() { } void D() { } }";
        let analysis = slow_engine(5).analyze_source(Path::new("slow.cs"), text);
        assert!(analysis.timed_out);
        assert_eq!(analysis.diagnostics.len(), 1);
        assert_eq!(analysis.diagnostics[0].rule_id, TIMEOUT_RULE_ID);
        assert_eq!(analysis.diagnostics[0].severity, Severity::Error);

        let unlimited = slow_engine(0).analyze_source(Path::new("slow.cs"), text);
        assert!(!unlimited.timed_out);
        assert_eq!(unlimited.diagnostics.len(), 3);
    }

    #[test]
    fn test_analyze_files_reads_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("A.cs");
        let b = dir.path().join("B.cs");
        std::fs::write(&a, "class A { void M(bool x) { var y = x == true; } }").unwrap();
        std::fs::write(&b, "class B { void M(bool x) { var y = !false; } }").unwrap();
        let missing = dir.path().join("Missing.cs");

        let files = vec![a.clone(), missing.clone(), b.clone()];
        let result = Engine::new(Config::new()).analyze_files(&files);
        assert_eq!(result.files_processed, 3);
        assert_eq!(result.diagnostics[0].location.file, a);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.rule_id == READ_ERROR_RULE_ID && d.location.file == missing));
        assert_eq!(result.diagnostics.last().map(|d| d.location.file.clone()), Some(b));
        assert_eq!(result.exit_code(), 2);
    }
}
