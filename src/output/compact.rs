//! Compact output formatter
//!
//! One line per diagnostic, minimal output for scripting:
//! `file:line:col: severity [rule] message`

use super::OutputFormatter;
use crate::diagnostic::Diagnostic;
use crate::engine::LintResult;

/// Compact one-line-per-diagnostic formatter
pub struct CompactFormatter {
    /// Show severity prefix
    pub show_severity: bool,
    /// Show rule ID
    pub show_rule: bool,
}

impl CompactFormatter {
    /// Create a new compact formatter
    pub fn new() -> Self {
        Self {
            show_severity: true,
            show_rule: true,
        }
    }

    /// Hide severity prefix
    pub fn without_severity(mut self) -> Self {
        self.show_severity = false;
        self
    }

    /// Hide rule ID
    pub fn without_rule(mut self) -> Self {
        self.show_rule = false;
        self
    }
}

impl Default for CompactFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFormatter for CompactFormatter {
    fn format(&self, result: &LintResult) -> String {
        let mut output = String::new();

        for diag in &result.diagnostics {
            output.push_str(&self.format_diagnostic(diag));
            output.push('\n');
        }

        output
    }

    fn format_diagnostic(&self, diagnostic: &Diagnostic) -> String {
        let mut line = format!(
            "{}:{}:{}:",
            diagnostic.location.file.display(),
            diagnostic.location.line,
            diagnostic.location.column
        );
        if self.show_severity {
            line.push(' ');
            line.push_str(&diagnostic.severity.to_string());
        }
        if self.show_rule {
            line.push_str(&format!(" [{}]", diagnostic.rule_id));
        }
        line.push(' ');
        line.push_str(&diagnostic.message);
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Location, Severity};
    use std::path::PathBuf;

    fn diagnostic(rule: &str, severity: Severity, message: &str, line: usize) -> Diagnostic {
        Diagnostic::new(rule, severity, message, Location::new(PathBuf::from("Program.cs"), line, 5))
    }

    #[test]
    fn test_compact_format() {
        let formatter = CompactFormatter::new();
        let diag = diagnostic("dead-store", Severity::Error, "Error message", 10);
        assert_eq!(
            formatter.format_diagnostic(&diag),
            "Program.cs:10:5: error [dead-store] Error message"
        );
    }

    #[test]
    fn test_compact_minimal() {
        let formatter = CompactFormatter::new().without_severity().without_rule();
        let diag = diagnostic("dead-store", Severity::Error, "Error", 1);
        assert_eq!(formatter.format_diagnostic(&diag), "Program.cs:1:5: Error");
    }

    #[test]
    fn test_compact_result() {
        let formatter = CompactFormatter::new();
        let result = LintResult {
            diagnostics: vec![
                diagnostic("r1", Severity::Error, "E1", 1),
                diagnostic("r2", Severity::Warning, "E2", 2),
            ],
            files_processed: 1,
            error_count: 1,
            warning_count: 1,
            ..Default::default()
        };

        let output = formatter.format(&result);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines, vec!["Program.cs:1:5: error [r1] E1", "Program.cs:2:5: warning [r2] E2"]);
    }
}
