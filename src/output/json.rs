//! JSON output formatter

use super::OutputFormatter;
use crate::diagnostic::{Diagnostic, FixSafety, Location, Severity};
use crate::engine::LintResult;
use serde::Serialize;

/// JSON formatter for machine-readable output
#[derive(Default)]
pub struct JsonFormatter {
    /// Pretty print with indentation
    pub pretty: bool,
}

impl JsonFormatter {
    /// Create a new JSON formatter
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable pretty printing
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    fn render<T: Serialize>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|err| {
            log::warn!("cannot serialize output: {}", err);
            String::new()
        })
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    diagnostics: Vec<JsonDiagnostic<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rule_failures: Vec<JsonRuleFailure<'a>>,
    summary: JsonSummary,
}

#[derive(Serialize)]
struct JsonPosition {
    file: String,
    line: usize,
    column: usize,
    length: usize,
    start: u32,
    end: u32,
}

impl JsonPosition {
    fn of(location: &Location) -> Self {
        Self {
            file: location.file.display().to_string(),
            line: location.line,
            column: location.column,
            length: location.length,
            start: location.span.start,
            end: location.span.end(),
        }
    }
}

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    rule_id: &'a str,
    severity: Severity,
    message: &'a str,
    #[serde(flatten)]
    position: JsonPosition,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    secondary: Vec<JsonSecondary<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_line: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    help: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fix: Option<JsonFix<'a>>,
}

#[derive(Serialize)]
struct JsonSecondary<'a> {
    #[serde(flatten)]
    position: JsonPosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

#[derive(Serialize)]
struct JsonEdit<'a> {
    start: u32,
    end: u32,
    replacement: &'a str,
}

#[derive(Serialize)]
struct JsonFix<'a> {
    description: &'a str,
    safety: FixSafety,
    edits: Vec<JsonEdit<'a>>,
}

#[derive(Serialize)]
struct JsonRuleFailure<'a> {
    file: String,
    rule_id: &'a str,
    line: usize,
    message: &'a str,
}

#[derive(Serialize)]
struct JsonSummary {
    files_processed: usize,
    files_with_errors: usize,
    files_with_warnings: usize,
    files_timed_out: usize,
    error_count: usize,
    warning_count: usize,
    info_count: usize,
    duration_ms: u128,
}

fn json_diagnostic(d: &Diagnostic) -> JsonDiagnostic<'_> {
    JsonDiagnostic {
        rule_id: &d.rule_id,
        severity: d.severity,
        message: &d.message,
        position: JsonPosition::of(&d.location),
        secondary: d
            .secondary
            .iter()
            .map(|s| JsonSecondary {
                position: JsonPosition::of(&s.location),
                message: s.message.as_deref(),
            })
            .collect(),
        source_line: d.source_line.as_deref(),
        help: d.help.as_deref(),
        fix: d.fix.as_ref().map(|f| JsonFix {
            description: &f.description,
            safety: f.safety,
            edits: f
                .edits
                .iter()
                .map(|e| JsonEdit {
                    start: e.span.start,
                    end: e.span.end(),
                    replacement: &e.replacement,
                })
                .collect(),
        }),
    }
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, result: &LintResult) -> String {
        let output = JsonOutput {
            diagnostics: result.diagnostics.iter().map(json_diagnostic).collect(),
            rule_failures: result
                .rule_failures
                .iter()
                .map(|(file, failure)| JsonRuleFailure {
                    file: file.display().to_string(),
                    rule_id: &failure.rule_id,
                    line: failure.line,
                    message: &failure.message,
                })
                .collect(),
            summary: JsonSummary {
                files_processed: result.files_processed,
                files_with_errors: result.files_with_errors,
                files_with_warnings: result.files_with_warnings,
                files_timed_out: result.files_timed_out,
                error_count: result.error_count,
                warning_count: result.warning_count,
                info_count: result.info_count,
                duration_ms: result.duration.as_millis(),
            },
        };
        self.render(&output)
    }

    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        self.render(&json_diagnostic(diagnostic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Fix, TextEdit};
    use crate::syntax::Span;
    use serde_json::Value;
    use std::path::PathBuf;

    #[test]
    fn test_json_format_diagnostic() {
        let formatter = JsonFormatter::new();
        let diag = Diagnostic::new(
            "for-loop-increment-sign",
            Severity::Error,
            "Test message",
            Location::new(PathBuf::from("Loop.cs"), 10, 5),
        )
        .with_secondary(Location::new(PathBuf::from("Loop.cs"), 10, 20), None)
        .with_fix(Fix::unsafe_fix("Flip", vec![TextEdit::replace(Span::new(3, 2), "--")]));

        let value: Value = serde_json::from_str(&formatter.format_diagnostic(&diag)).unwrap();
        assert_eq!(value["rule_id"], "for-loop-increment-sign");
        assert_eq!(value["severity"], "error");
        assert_eq!(value["line"], 10);
        assert_eq!(value["secondary"][0]["column"], 20);
        assert_eq!(value["fix"]["safety"], "unsafe");
        assert_eq!(value["fix"]["edits"][0]["end"], 5);
    }

    #[test]
    fn test_json_format_result() {
        let formatter = JsonFormatter::new();
        let result = LintResult {
            diagnostics: vec![],
            files_processed: 5,
            error_count: 2,
            warning_count: 3,
            ..Default::default()
        };

        let output = formatter.format(&result);
        assert!(output.contains("\"files_processed\":5"));
        assert!(output.contains("\"error_count\":2"));
        assert!(output.contains("\"warning_count\":3"));
        assert!(!output.contains("rule_failures"));
    }

    #[test]
    fn test_json_pretty() {
        let formatter = JsonFormatter::new().pretty();
        let diag = Diagnostic::new(
            "test",
            Severity::Warning,
            "msg",
            Location::new(PathBuf::from("f.cs"), 1, 1),
        );

        let output = formatter.format_diagnostic(&diag);
        assert!(output.contains('\n')); // Pretty printed has newlines
    }
}
