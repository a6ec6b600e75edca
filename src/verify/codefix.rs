//! Comparing fixer output with `.Fixed.cs` files

use crate::fixer::generate_unified_diff;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static MARKER_COMMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:/\*\s*(?:Noncompliant|Secondary|Fixed|Error|Ignore)\b.*?\*/|//\s*(?:Noncompliant|Secondary|Fixed|Error|Ignore)\b.*$)")
        .expect("valid regex")
});

static CARET_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*//\s*\^").expect("valid regex"));

/// Text with line endings unified, marker comments and caret lines removed,
/// trailing whitespace trimmed and trailing blank lines dropped
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n");
    let mut lines: Vec<String> = Vec::new();
    for line in unified.split('\n') {
        if CARET_LINE_RE.is_match(line) {
            continue;
        }
        let stripped = MARKER_COMMENT_RE.replace_all(line, "");
        if stripped.trim().is_empty() && !line.trim().is_empty() {
            // the line held nothing but a marker
            continue;
        }
        lines.push(stripped.trim_end().to_string());
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    let mut normalized = lines.join("\n");
    normalized.push('\n');
    normalized
}

/// Unified diff of the normalized texts, or `None` when they agree
pub fn fix_difference(fixed_file: &Path, actual: &str, expected: &str) -> Option<String> {
    let (actual, expected) = (normalize(actual), normalize(expected));
    if actual == expected {
        return None;
    }
    Some(generate_unified_diff(fixed_file, &expected, &actual))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_strips_markers() {
        let text = "class C {\r\n    var z = true || ((true)); // Noncompliant   \r\n    //                ^^^^^^^^^^^\r\n    // Secondary@-2\r\n    int x; // keep me\r\n}\r\n\r\n\r\n";
        assert_eq!(
            normalize(text),
            "class C {\n    var z = true || ((true));\n    int x; // keep me\n}\n"
        );
    }

    #[test]
    fn test_normalize_keeps_blank_lines_inside() {
        assert_eq!(normalize("a\n\nb   \n"), "a\n\nb\n");
        assert_eq!(normalize("a /* Noncompliant */ b"), "a  b\n");
    }

    #[test]
    fn test_fix_difference() {
        let expected = "var z = true; // Fixed\n";
        assert_eq!(fix_difference(Path::new("A.Fixed.cs"), "var z = true;\n", expected), None);

        let diff = fix_difference(Path::new("A.Fixed.cs"), "var z = true || true;\n", expected).unwrap();
        assert!(diff.contains("-var z = true;"));
        assert!(diff.contains("+var z = true || true;"));
    }
}
