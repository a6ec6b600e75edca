//! Diagnostic types for analysis results

use crate::syntax::{Span, SyntaxTree};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Severity level for diagnostics
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,
    /// Warning - potential issue
    #[default]
    Warning,
    /// Error - definite problem
    Error,
}

/// Fix safety classification (like Ruff's safe/unsafe fixes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixSafety {
    /// Safe fix - preserves code meaning, can be applied automatically
    #[default]
    Safe,
    /// Unsafe fix - may change runtime behavior or remove comments
    Unsafe,
    /// Display only - shown to user but not auto-applied
    Display,
}

impl std::fmt::Display for FixSafety {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixSafety::Safe => write!(f, "safe"),
            FixSafety::Unsafe => write!(f, "unsafe"),
            FixSafety::Display => write!(f, "display"),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" | "hint" | "note" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" | "err" => Ok(Severity::Error),
            _ => Err(()),
        }
    }
}

/// Source code location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path
    pub file: PathBuf,
    /// Byte range in the file
    #[serde(default)]
    pub span: Span,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based, in characters)
    pub column: usize,
    /// Length of the highlighted region on its first line, in characters
    pub length: usize,
}

impl Location {
    pub fn new(file: PathBuf, line: usize, column: usize) -> Self {
        Self {
            file,
            span: Span::default(),
            line,
            column,
            length: 0,
        }
    }

    /// Location of `span` in `tree`, with line, column and length resolved
    pub fn of_span(file: &Path, tree: &SyntaxTree, span: Span) -> Self {
        let start = tree.line_col(span.start);
        let length = tree
            .slice(span)
            .split('\n')
            .next()
            .unwrap_or("")
            .trim_end_matches('\r')
            .chars()
            .count();
        Self {
            file: file.to_path_buf(),
            span,
            line: start.line,
            column: start.column,
            length,
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }
}

/// Related location shown alongside a diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryLocation {
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A replacement of one byte range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub span: Span,
    pub replacement: String,
}

impl TextEdit {
    pub fn replace(span: Span, replacement: impl Into<String>) -> Self {
        Self {
            span,
            replacement: replacement.into(),
        }
    }

    pub fn delete(span: Span) -> Self {
        Self::replace(span, "")
    }
}

/// A suggested fix for the diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    /// Description of the fix
    pub description: String,
    /// Non-overlapping edits, applied together
    pub edits: Vec<TextEdit>,
    /// Safety classification of this fix
    #[serde(default)]
    pub safety: FixSafety,
}

impl Fix {
    /// Create a new safe fix
    pub fn safe(description: &str, edits: Vec<TextEdit>) -> Self {
        Self {
            description: description.to_string(),
            edits,
            safety: FixSafety::Safe,
        }
    }

    /// Create a new unsafe fix
    pub fn unsafe_fix(description: &str, edits: Vec<TextEdit>) -> Self {
        Self {
            description: description.to_string(),
            edits,
            safety: FixSafety::Unsafe,
        }
    }

    /// Check if this fix is safe to apply automatically
    pub fn is_safe(&self) -> bool {
        self.safety == FixSafety::Safe
    }

    /// Check if this fix is unsafe
    pub fn is_unsafe(&self) -> bool {
        self.safety == FixSafety::Unsafe
    }

    /// Smallest span covering every edit
    pub fn extent(&self) -> Option<Span> {
        self.edits.iter().map(|e| e.span).reduce(|a, b| a.cover(b))
    }
}

/// A lint diagnostic (warning, error, etc.)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Rule ID that triggered this diagnostic
    pub rule_id: String,
    /// Severity level
    pub severity: Severity,
    /// Human-readable message
    pub message: String,
    /// Source location
    pub location: Location,
    /// Related locations, in reporting order
    #[serde(default)]
    pub secondary: Vec<SecondaryLocation>,
    /// The source line (for display)
    pub source_line: Option<String>,
    /// Context lines before the error line
    #[serde(default)]
    pub context_before: Vec<(usize, String)>,
    /// Context lines after the error line
    #[serde(default)]
    pub context_after: Vec<(usize, String)>,
    /// Help text (usually rule description)
    pub help: Option<String>,
    /// Suggested fix
    pub fix: Option<Fix>,
    /// Additional notes
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic
    pub fn new(rule_id: &str, severity: Severity, message: &str, location: Location) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity,
            message: message.to_string(),
            location,
            secondary: Vec::new(),
            source_line: None,
            context_before: Vec::new(),
            context_after: Vec::new(),
            help: None,
            fix: None,
            notes: Vec::new(),
        }
    }

    /// Add source line for display
    pub fn with_source_line(mut self, line: &str) -> Self {
        self.source_line = Some(line.to_string());
        self
    }

    /// Add context lines from source content
    pub fn with_context(mut self, source_lines: &[&str], context_count: usize) -> Self {
        if context_count == 0 || self.location.line == 0 {
            return self;
        }

        let line_num = self.location.line;

        let start = line_num.saturating_sub(context_count + 1);
        let end = line_num.saturating_sub(1);
        for (i, line) in source_lines
            .iter()
            .enumerate()
            .skip(start)
            .take(end.saturating_sub(start))
        {
            self.context_before.push((i + 1, line.to_string()));
        }

        let end = (line_num + context_count).min(source_lines.len());
        for (i, line) in source_lines
            .iter()
            .enumerate()
            .skip(line_num)
            .take(end.saturating_sub(line_num))
        {
            self.context_after.push((i + 1, line.to_string()));
        }

        self
    }

    /// Add help text
    pub fn with_help(mut self, help: &str) -> Self {
        self.help = Some(help.to_string());
        self
    }

    pub fn with_secondary(mut self, location: Location, message: Option<String>) -> Self {
        self.secondary.push(SecondaryLocation { location, message });
        self
    }

    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.fix = Some(fix);
        self
    }

    /// Check if this diagnostic has a fix
    pub fn has_fix(&self) -> bool {
        self.fix.is_some()
    }

    /// Check if this diagnostic has a safe fix
    pub fn has_safe_fix(&self) -> bool {
        self.fix.as_ref().is_some_and(|f| f.is_safe())
    }

    /// Check if this diagnostic has an unsafe fix
    pub fn has_unsafe_fix(&self) -> bool {
        self.fix.as_ref().is_some_and(|f| f.is_unsafe())
    }

    /// Add a note
    pub fn with_note(mut self, note: &str) -> Self {
        self.notes.push(note.to_string());
        self
    }

    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Check if this is a warning
    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }

    /// Ordering key: position first, then rule
    pub fn sort_key(&self) -> (PathBuf, usize, usize, String) {
        (
            self.location.file.clone(),
            self.location.line,
            self.location.column,
            self.rule_id.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, ParseOptions};

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!("error".parse::<Severity>(), Ok(Severity::Error));
        assert_eq!("warning".parse::<Severity>(), Ok(Severity::Warning));
        assert_eq!("info".parse::<Severity>(), Ok(Severity::Info));
        assert_eq!("warn".parse::<Severity>(), Ok(Severity::Warning));
        assert_eq!("hint".parse::<Severity>(), Ok(Severity::Info));
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(format!("{}", Severity::Error), "error");
        assert_eq!(format!("{}", Severity::Warning), "warning");
        assert_eq!(format!("{}", Severity::Info), "info");
    }

    #[test]
    fn test_location_of_span() {
        let tree = parse("class C\n{\n  int x;\n}\n", &ParseOptions::default());
        let start = tree.text().find("int").unwrap() as u32;
        let loc = Location::of_span(Path::new("a.cs"), &tree, Span::new(start, 6));
        assert_eq!((loc.line, loc.column, loc.length), (3, 3, 6));

        let multi = Location::of_span(Path::new("a.cs"), &tree, Span::new(0, 10));
        assert_eq!((multi.line, multi.column, multi.length), (1, 1, 7));
    }

    #[test]
    fn test_diagnostic_with_extras() {
        let loc = Location::new(PathBuf::from("test.cs"), 10, 5);
        let fix = Fix::safe("Remove literal", vec![TextEdit::delete(Span::new(3, 4))]);
        let diag = Diagnostic::new("test-rule", Severity::Warning, "Test", loc.clone())
            .with_source_line("  if (x == true)")
            .with_help("Simplify the condition")
            .with_secondary(loc, Some("here".to_string()))
            .with_fix(fix)
            .with_note("See documentation");

        assert!(diag.source_line.is_some());
        assert!(diag.has_safe_fix());
        assert!(!diag.has_unsafe_fix());
        assert_eq!(diag.secondary.len(), 1);
        assert_eq!(diag.notes.len(), 1);
        assert_eq!(diag.fix.unwrap().extent(), Some(Span::new(3, 4)));
    }

    #[test]
    fn test_fix_extent_covers_edits() {
        let fix = Fix::unsafe_fix(
            "two edits",
            vec![
                TextEdit::delete(Span::new(10, 2)),
                TextEdit::replace(Span::new(2, 3), "x"),
            ],
        );
        assert!(fix.is_unsafe());
        assert_eq!(fix.extent(), Some(Span::from_bounds(2, 12)));
    }
}
