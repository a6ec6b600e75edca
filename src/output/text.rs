//! Human-readable text output formatter

use super::OutputFormatter;
use crate::diagnostic::{Diagnostic, Severity};
use crate::engine::LintResult;
use colored::*;
use std::path::Path;

/// Text formatter with optional color support
pub struct TextFormatter {
    /// Enable colored output
    pub colored: bool,

    /// Show source context
    pub show_source: bool,

    /// Show help text
    pub show_help: bool,

    /// Show fix suggestions
    pub show_fixes: bool,

    /// Show statistics
    pub show_stats: bool,

    /// Show related locations
    pub show_secondary: bool,
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self {
            colored: true,
            show_source: true,
            show_help: true,
            show_fixes: true,
            show_stats: true,
            show_secondary: true,
        }
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}

impl TextFormatter {
    /// Create a new text formatter
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable colors
    pub fn without_color(mut self) -> Self {
        self.colored = false;
        self
    }

    /// Hide the summary line
    pub fn without_stats(mut self) -> Self {
        self.show_stats = false;
        self
    }

    fn paint(&self, text: &str, style: impl Fn(&str) -> ColoredString) -> String {
        if self.colored {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn gutter(&self, symbol: &str) -> String {
        self.paint(symbol, |s| s.blue())
    }

    fn severity_str(&self, severity: Severity) -> String {
        let s = severity.to_string();
        match severity {
            Severity::Error => self.paint(&s, |s| s.red().bold()),
            Severity::Warning => self.paint(&s, |s| s.yellow().bold()),
            Severity::Info => self.paint(&s, |s| s.blue()),
        }
    }

    fn context_line(&self, output: &mut String, line_num: usize, line: &str) {
        let num = format!("{:>4}", line_num);
        output.push_str(&format!(
            "{} {} {}\n",
            self.paint(&num, |s| s.dimmed()),
            self.gutter("|"),
            self.paint(line, |s| s.dimmed())
        ));
    }

    fn file_header(&self, file: &Path) -> String {
        let name = file.display().to_string();
        self.paint(&name, |s| s.underline())
    }

    fn summary(&self, result: &LintResult) -> String {
        let mut output = format!("\n{} processed", plural(result.files_processed, "file"));

        let mut counts = Vec::new();
        if result.error_count > 0 {
            counts.push(self.paint(&plural(result.error_count, "error"), |s| s.red()));
        }
        if result.warning_count > 0 {
            counts.push(self.paint(&plural(result.warning_count, "warning"), |s| s.yellow()));
        }
        if result.info_count > 0 {
            counts.push(self.paint(&plural(result.info_count, "info"), |s| s.blue()));
        }
        if !counts.is_empty() {
            output.push_str(&format!(": {}", counts.join(", ")));
        }
        output.push('\n');

        if result.files_timed_out > 0 {
            output.push_str(&format!(
                "{} exceeded the analysis time budget\n",
                plural(result.files_timed_out, "file")
            ));
        }
        if !result.rule_failures.is_empty() {
            output.push_str(&format!(
                "{} failed and {} skipped\n",
                plural(result.rule_failures.len(), "rule invocation"),
                if result.rule_failures.len() == 1 { "was" } else { "were" }
            ));
        }
        output.push_str(&format!("Finished in {:.2}s\n", result.duration.as_secs_f64()));
        output
    }
}

impl OutputFormatter for TextFormatter {
    fn format(&self, result: &LintResult) -> String {
        let mut output = String::new();

        // Group diagnostics by file, keeping input order
        let mut files: Vec<(&Path, Vec<&Diagnostic>)> = Vec::new();
        for diag in &result.diagnostics {
            let file = diag.location.file.as_path();
            match files.iter_mut().find(|(f, _)| *f == file) {
                Some((_, diags)) => diags.push(diag),
                None => files.push((file, vec![diag])),
            }
        }

        for (file, diagnostics) in &files {
            output.push_str(&format!("{}\n", self.file_header(file)));
            for diag in diagnostics {
                output.push_str(&self.format_diagnostic(diag));
                output.push('\n');
            }
        }

        for (file, failure) in &result.rule_failures {
            output.push_str(&format!(
                "{}: {} rule {} failed: {}\n",
                file.display(),
                self.paint("note", |s| s.magenta()),
                failure.rule_id,
                failure.message
            ));
        }

        if self.show_stats {
            output.push_str(&self.summary(result));
        }

        output
    }

    fn format_diagnostic(&self, diag: &Diagnostic) -> String {
        let mut output = String::new();
        let location = &diag.location;

        output.push_str(&format!(
            "{}:{}:{}: {}[{}]: {}\n",
            location.file.display(),
            location.line,
            location.column,
            self.severity_str(diag.severity),
            self.paint(&diag.rule_id, |s| s.cyan()),
            diag.message
        ));

        if self.show_source {
            if let Some(source) = &diag.source_line {
                output.push_str(&format!("   {}\n", self.gutter("|")));
                for (line_num, line) in &diag.context_before {
                    self.context_line(&mut output, *line_num, line);
                }

                let num = format!("{:>4}", location.line);
                output.push_str(&format!("{} {} {}\n", self.gutter(&num), self.gutter("|"), source));
                if location.column > 0 {
                    let underline = "^".repeat(location.length.max(1));
                    output.push_str(&format!(
                        "   {} {}{}\n",
                        self.gutter("|"),
                        " ".repeat(location.column - 1),
                        self.paint(&underline, |s| s.red())
                    ));
                }

                for (line_num, line) in &diag.context_after {
                    self.context_line(&mut output, *line_num, line);
                }
            }
        }

        if self.show_secondary {
            for secondary in &diag.secondary {
                let at = format!("{}:{}", secondary.location.line, secondary.location.column);
                match &secondary.message {
                    Some(message) => output.push_str(&format!(
                        "   {} related {}: {}\n",
                        self.gutter("-"),
                        at,
                        message
                    )),
                    None => output.push_str(&format!("   {} related {}\n", self.gutter("-"), at)),
                }
            }
        }

        if self.show_help {
            if let Some(help) = &diag.help {
                output.push_str(&format!("   {} help: {}\n", self.gutter("="), help));
            }
        }

        if self.show_fixes {
            if let Some(fix) = &diag.fix {
                output.push_str(&format!(
                    "   {} fix ({}): {}\n",
                    self.paint("=", |s| s.green()),
                    fix.safety,
                    fix.description
                ));
            }
        }

        for note in &diag.notes {
            output.push_str(&format!("   {} note: {}\n", self.gutter("="), note));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Fix, Location, TextEdit};
    use crate::dispatch::RuleFailure;
    use crate::syntax::Span;
    use std::path::PathBuf;

    #[test]
    fn test_format_diagnostic() {
        let formatter = TextFormatter::new().without_color();
        let diag = Diagnostic::new(
            "dead-store",
            Severity::Error,
            "Remove this useless assignment to local variable 'x'.",
            Location::new(PathBuf::from("Program.cs"), 10, 9).with_length(5),
        )
        .with_source_line("        x = 1;")
        .with_help("Values should not be uselessly assigned")
        .with_secondary(Location::new(PathBuf::from("Program.cs"), 12, 5), Some("overwritten here".to_string()))
        .with_fix(Fix::safe("Remove the assignment", vec![TextEdit::delete(Span::new(0, 1))]));

        let output = formatter.format_diagnostic(&diag);
        assert!(output.contains("Program.cs:10:9: error[dead-store]"));
        assert!(output.contains("  10 |         x = 1;"));
        assert!(output.contains("|         ^^^^^"));
        assert!(output.contains("related 12:5: overwritten here"));
        assert!(output.contains("help: Values should not be uselessly assigned"));
        assert!(output.contains("fix (safe): Remove the assignment"));
    }

    #[test]
    fn test_format_result() {
        let formatter = TextFormatter::new().without_color();
        let result = LintResult {
            diagnostics: vec![
                Diagnostic::new("a", Severity::Warning, "Test", Location::new(PathBuf::from("B.cs"), 1, 1)),
                Diagnostic::new("b", Severity::Warning, "Test", Location::new(PathBuf::from("A.cs"), 1, 1)),
            ],
            files_processed: 2,
            warning_count: 2,
            rule_failures: vec![(
                PathBuf::from("A.cs"),
                RuleFailure {
                    rule_id: "broken".to_string(),
                    span: Span::empty(0),
                    line: 1,
                    message: "panicked".to_string(),
                },
            )],
            ..Default::default()
        };

        let output = formatter.format(&result);
        assert!(output.find("B.cs").unwrap() < output.find("A.cs").unwrap());
        assert!(output.contains("2 files processed: 2 warnings"));
        assert!(output.contains("rule broken failed: panicked"));
        assert!(output.contains("1 rule invocation failed and was skipped"));
    }
}
