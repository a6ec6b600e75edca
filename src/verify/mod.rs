//! Fixture verification: run one rule over an annotated source file and
//! compare what it reports with the markers written in the file.
//!
//! A fixture is ordinary source code whose comments state the expected
//! diagnostics (see [`marker`]). Verification fails on any missing or
//! unexpected diagnostic, on rule failures, and on syntax errors outside
//! lines marked `// Error` or `// Ignore`. With [`Verifier::code_fix`], the
//! rule's fixes are applied to the fixture and compared with the fixed file.

pub mod codefix;
pub mod marker;
pub mod matcher;

use crate::dataflow::{Deadline, Timeout};
use crate::diagnostic::Diagnostic;
use crate::dispatch::{ActiveRule, Dispatcher, RuleFailure};
use crate::fixer::{FixMode, Fixer};
use crate::reporter::Reporter;
use crate::rule::Rule;
use crate::semantic::SemanticModel;
use crate::suppression::Suppressions;
use crate::syntax::{parse, LanguageVersion, ParseError, ParseOptions, SyntaxTree};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use marker::{parse_markers, ExpectationSet, MarkerError};

/// Per-fixture analysis budget
const FIXTURE_TIMEOUT_MS: u64 = 30_000;

/// One difference between a fixture's expectations and the analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    Missing { line: usize, expected: String },
    Unexpected { line: usize, actual: String },
    ParseError { line: usize, message: String },
    RuleFailure { line: usize, message: String },
    TimedOut { budget_ms: u64 },
    FixMismatch { diff: String },
    StillReported { line: usize, message: String },
}

impl Problem {
    fn sort_key(&self) -> (usize, u8) {
        match self {
            Problem::TimedOut { .. } => (0, 0),
            Problem::ParseError { line, .. } => (*line, 1),
            Problem::RuleFailure { line, .. } => (*line, 2),
            Problem::Missing { line, .. } => (*line, 3),
            Problem::Unexpected { line, .. } => (*line, 4),
            Problem::StillReported { line, .. } => (*line, 5),
            Problem::FixMismatch { .. } => (usize::MAX, 6),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::Missing { line, expected } => write!(f, "- line {}: {}", line, expected),
            Problem::Unexpected { line, actual } => write!(f, "+ line {}: {}", line, actual),
            Problem::ParseError { line, message } => write!(f, "! line {}: syntax error: {}", line, message),
            Problem::RuleFailure { line, message } => write!(f, "! line {}: rule failed: {}", line, message),
            Problem::TimedOut { budget_ms } => write!(f, "! analysis exceeded {} ms", budget_ms),
            Problem::FixMismatch { diff } => write!(f, "! code fix result differs:\n{}", diff.trim_end()),
            Problem::StillReported { line, message } => {
                write!(f, "+ line {}: still reported after fix: {}", line, message)
            }
        }
    }
}

/// A fixture whose analysis disagrees with its markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationFailure {
    pub fixture: String,
    pub rule_id: String,
    pub problems: Vec<Problem>,
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} [{}]: {} problem(s) (- expected, + actual)",
            self.fixture,
            self.rule_id,
            self.problems.len()
        )?;
        for problem in &self.problems {
            writeln!(f, "  {}", problem)?;
        }
        Ok(())
    }
}

impl std::error::Error for VerificationFailure {}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{fixture}: invalid marker at {source}")]
    Marker {
        fixture: String,
        #[source]
        source: MarkerError,
    },

    #[error("no fixture given")]
    NoFixture,

    #[error("{0}")]
    Failed(#[from] VerificationFailure),
}

fn read(path: &Path) -> Result<String, VerifyError> {
    std::fs::read_to_string(path).map_err(|source| VerifyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

struct RuleRun {
    tree: SyntaxTree,
    diagnostics: Vec<Diagnostic>,
    failures: Vec<RuleFailure>,
}

/// Builder for verifying one rule against one fixture
pub struct Verifier<'r> {
    rule: &'r dyn Rule,
    fixture: Option<PathBuf>,
    code_fix: Option<PathBuf>,
    options: ParseOptions,
    parameters: HashMap<String, serde_json::Value>,
    allow_parse_errors: bool,
    fix_mode: FixMode,
}

impl<'r> Verifier<'r> {
    pub fn new(rule: &'r dyn Rule) -> Self {
        Self {
            rule,
            fixture: None,
            code_fix: None,
            options: ParseOptions::default(),
            parameters: HashMap::new(),
            allow_parse_errors: false,
            fix_mode: FixMode::All,
        }
    }

    pub fn fixture(mut self, path: impl Into<PathBuf>) -> Self {
        self.fixture = Some(path.into());
        self
    }

    /// Expected result of applying the rule's fixes to the fixture
    pub fn code_fix(mut self, path: impl Into<PathBuf>) -> Self {
        self.code_fix = Some(path.into());
        self
    }

    pub fn language_version(mut self, version: LanguageVersion) -> Self {
        self.options.language_version = version;
        self
    }

    pub fn define(mut self, symbol: impl Into<String>) -> Self {
        self.options.defines.push(symbol.into());
        self
    }

    pub fn parameter(mut self, name: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn allow_parse_errors(mut self) -> Self {
        self.allow_parse_errors = true;
        self
    }

    /// Restrict the code fix check to safe fixes
    pub fn safe_fixes_only(mut self) -> Self {
        self.fix_mode = FixMode::SafeOnly;
        self
    }

    /// Verify the fixture file, then its code fix when one is set
    pub fn verify(&self) -> Result<(), VerifyError> {
        let path = self.fixture.as_ref().ok_or(VerifyError::NoFixture)?;
        let text = read(path)?;
        let name = path.display().to_string();
        let mut problems = self.check_markers(&name, path, &text)?;

        if let Some(fixed_path) = &self.code_fix {
            let expected = read(fixed_path)?;
            problems.extend(self.check_code_fix(fixed_path, path, &text, &expected)?);
        }
        self.finish(name, problems)
    }

    /// Verify inline source text
    pub fn verify_source(&self, name: &str, text: &str) -> Result<(), VerifyError> {
        let problems = self.check_markers(name, Path::new(name), text)?;
        self.finish(name.to_string(), problems)
    }

    /// Verify inline source text and its expected fixed form
    pub fn verify_fix_source(&self, name: &str, text: &str, fixed: &str) -> Result<(), VerifyError> {
        let fixed_name = name.replace(".cs", ".Fixed.cs");
        let problems = self.check_code_fix(Path::new(&fixed_name), Path::new(name), text, fixed)?;
        self.finish(name.to_string(), problems)
    }

    fn finish(&self, fixture: String, mut problems: Vec<Problem>) -> Result<(), VerifyError> {
        if problems.is_empty() {
            log::info!("{}: verified {}", fixture, self.rule.id());
            return Ok(());
        }
        problems.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then_with(|| a.to_string().cmp(&b.to_string())));
        Err(VerificationFailure {
            fixture,
            rule_id: self.rule.id().to_string(),
            problems,
        }
        .into())
    }

    fn run(&self, path: &Path, text: &str) -> Result<RuleRun, Timeout> {
        let tree = parse(text, &self.options);
        let model = SemanticModel::bind(&tree);
        let active = ActiveRule::new(self.rule).with_parameters(self.parameters.clone());
        let output = Dispatcher::new(vec![active]).run(
            path,
            &tree,
            &model,
            Deadline::after_ms(FIXTURE_TIMEOUT_MS),
        )?;
        let suppressions = Suppressions::from_tree(&tree);
        let diagnostics = Reporter::new(path, &tree, &suppressions).finish(output.issues);
        Ok(RuleRun {
            tree,
            diagnostics,
            failures: output.failures,
        })
    }

    fn parse_problems(&self, errors: &[ParseError], tree: &SyntaxTree, expectations: &ExpectationSet) -> Vec<Problem> {
        if self.allow_parse_errors {
            return Vec::new();
        }
        errors
            .iter()
            .map(|e| (tree.line_col(e.span.start).line, e))
            .filter(|(line, _)| !expectations.tolerated_error_lines.contains(line))
            .map(|(line, e)| Problem::ParseError {
                line,
                message: e.message.clone(),
            })
            .collect()
    }

    fn failure_problems(failures: &[RuleFailure]) -> impl Iterator<Item = Problem> + '_ {
        failures.iter().map(|f| Problem::RuleFailure {
            line: f.line,
            message: f.message.clone(),
        })
    }

    fn check_markers(&self, name: &str, path: &Path, text: &str) -> Result<Vec<Problem>, VerifyError> {
        let run = match self.run(path, text) {
            Ok(run) => run,
            Err(timeout) => {
                return Ok(vec![Problem::TimedOut {
                    budget_ms: timeout.budget_ms,
                }])
            }
        };
        let expectations = parse_markers(&run.tree).map_err(|source| VerifyError::Marker {
            fixture: name.to_string(),
            source,
        })?;
        log::debug!(
            "{}: {} expected issue(s), {} reported",
            name,
            expectations.issues.len(),
            run.diagnostics.len()
        );

        let mut problems = self.parse_problems(run.tree.errors(), &run.tree, &expectations);
        problems.extend(Self::failure_problems(&run.failures));
        problems.extend(matcher::compare(&expectations, &run.diagnostics));
        Ok(problems)
    }

    fn check_code_fix(
        &self,
        fixed_path: &Path,
        path: &Path,
        text: &str,
        expected: &str,
    ) -> Result<Vec<Problem>, VerifyError> {
        let outcome = Fixer::fix_until_stable(text, self.fix_mode, |current| {
            self.run(path, current).map(|run| run.diagnostics).unwrap_or_default()
        });
        let mut problems = Vec::new();
        if let Some(diff) = codefix::fix_difference(fixed_path, &outcome.text, expected) {
            problems.push(Problem::FixMismatch { diff });
        }

        // the fixed file must be clean where it says it was fixed
        let run = match self.run(fixed_path, expected) {
            Ok(run) => run,
            Err(timeout) => {
                problems.push(Problem::TimedOut {
                    budget_ms: timeout.budget_ms,
                });
                return Ok(problems);
            }
        };
        let expectations = parse_markers(&run.tree).map_err(|source| VerifyError::Marker {
            fixture: fixed_path.display().to_string(),
            source,
        })?;
        problems.extend(Self::failure_problems(&run.failures));
        problems.extend(
            run.diagnostics
                .iter()
                .filter(|d| expectations.fixed_lines.contains(&d.location.line))
                .map(|d| Problem::StillReported {
                    line: d.location.line,
                    message: d.message.clone(),
                }),
        );
        Ok(problems)
    }
}

impl fmt::Debug for Verifier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("rule", &self.rule.id())
            .field("fixture", &self.fixture)
            .field("code_fix", &self.code_fix)
            .field("options", &self.options)
            .finish()
    }
}

/// `<stem>.Fixed.cs` next to `fixture`, when it exists
pub fn fixed_sibling(fixture: &Path) -> Option<PathBuf> {
    let name = fixture.file_name()?.to_str()?;
    let stem = name.strip_suffix(".cs")?;
    if stem.ends_with(".Fixed") {
        return None;
    }
    let sibling = fixture.with_file_name(format!("{}.Fixed.cs", stem));
    sibling.exists().then_some(sibling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::boolean_literal::BooleanLiteralUnnecessary;
    use crate::rules::for_loop_increment::ForLoopIncrementSign;

    fn failure(result: Result<(), VerifyError>) -> VerificationFailure {
        match result {
            Err(VerifyError::Failed(failure)) => failure,
            other => panic!("expected a verification failure, got {:?}", other),
        }
    }

    #[test]
    fn test_passing_fixture() {
        let rule = BooleanLiteralUnnecessary::new();
        let text = "class C {\n    void M(bool a) {\n        var x = a == true; // Noncompliant {{Remove the unnecessary Boolean literal(s).}}\n//                ^^^^^^^\n        var y = a;\n    }\n}\n";
        Verifier::new(&rule).verify_source("Inline.cs", text).unwrap();
    }

    #[test]
    fn test_missing_and_unexpected_are_reported() {
        let rule = BooleanLiteralUnnecessary::new();
        let text = "class C {\n    void M(bool a) {\n        var x = a;  // Noncompliant\n        var y = a == false;\n    }\n}\n";
        let failure = failure(Verifier::new(&rule).verify_source("Inline.cs", text));
        assert_eq!(failure.problems.len(), 2);
        assert!(matches!(failure.problems[0], Problem::Missing { line: 3, .. }));
        assert!(matches!(failure.problems[1], Problem::Unexpected { line: 4, .. }));
        let report = failure.to_string();
        assert!(report.contains("- line 3: Noncompliant"));
        assert!(report.contains("+ line 4: Noncompliant ^19#8 {{Remove the unnecessary Boolean literal(s).}}"));
    }

    #[test]
    fn test_secondary_required() {
        let rule = ForLoopIncrementSign::new();
        let text = "class C {\n    void M(int x, int y) {\n        for (int i = x; i > y; i++) { } // Noncompliant\n//                             ^^^\n//                      ^^^^^ Secondary\n    }\n}\n";
        Verifier::new(&rule).verify_source("Loop.cs", text).unwrap();

        let without_secondary = "class C {\n    void M(int x, int y) {\n        for (int i = x; i > y; i++) { } // Noncompliant\n    }\n}\n";
        let failure = failure(Verifier::new(&rule).verify_source("Loop.cs", without_secondary));
        assert_eq!(failure.problems.len(), 1);
        assert!(failure.problems[0].to_string().contains("Secondary"));
    }

    #[test]
    fn test_parse_errors_need_markers() {
        let rule = BooleanLiteralUnnecessary::new();
        let broken = "class C {\n    void M() {\n        var x = ;\n    }\n}\n";
        let failure = failure(Verifier::new(&rule).verify_source("Broken.cs", broken));
        assert!(matches!(failure.problems[0], Problem::ParseError { line: 3, .. }));

        let tolerated = "class C {\n    void M() {\n        var x = ; // Error [CS1525]\n    }\n}\n";
        Verifier::new(&rule).verify_source("Broken.cs", tolerated).unwrap();
        Verifier::new(&rule).allow_parse_errors().verify_source("Broken.cs", broken).unwrap();
    }

    #[test]
    fn test_code_fix_comparison() {
        let rule = BooleanLiteralUnnecessary::new();
        let text = "class C {\n    void M(bool a) {\n        var x = a == true; // Noncompliant\n    }\n}\n";
        let fixed = "class C {\n    void M(bool a) {\n        var x = a; // Fixed\n    }\n}\n";
        Verifier::new(&rule).verify_fix_source("Fix.cs", text, fixed).unwrap();

        let wrong = "class C {\n    void M(bool a) {\n        var x = !a; // Fixed\n    }\n}\n";
        let failure = failure(Verifier::new(&rule).verify_fix_source("Fix.cs", text, wrong));
        assert!(matches!(failure.problems[0], Problem::FixMismatch { .. }));
    }

    #[test]
    fn test_invalid_marker_is_an_error() {
        let rule = BooleanLiteralUnnecessary::new();
        let text = "class C {\n    int a; // Secondary [7]\n}\n";
        assert!(matches!(
            Verifier::new(&rule).verify_source("Bad.cs", text),
            Err(VerifyError::Marker { .. })
        ));
    }

    #[test]
    fn test_fixed_sibling_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("Rule.cs");
        std::fs::write(&fixture, "").unwrap();
        assert_eq!(fixed_sibling(&fixture), None);
        std::fs::write(dir.path().join("Rule.Fixed.cs"), "").unwrap();
        assert_eq!(fixed_sibling(&fixture), Some(dir.path().join("Rule.Fixed.cs")));
        assert_eq!(fixed_sibling(&dir.path().join("Rule.Fixed.cs")), None);
    }
}
