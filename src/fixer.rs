//! Applying rule fixes to source text
//!
//! Fixes are classified as safe or unsafe:
//! - Safe fixes preserve code meaning and can be applied automatically
//! - Unsafe fixes may change runtime behavior and require explicit opt-in
//! - Display fixes are only shown, never applied

use crate::diagnostic::{Diagnostic, Fix, FixSafety};
use crate::engine::Engine;
use crate::syntax::Span;
use similar::{ChangeTag, TextDiff};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Re-analysis rounds before `fix_all` gives up on reaching a fixpoint
pub const MAX_FIX_ROUNDS: usize = 10;

/// Fix mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixMode {
    /// Apply only safe fixes (default)
    #[default]
    SafeOnly,
    /// Apply all fixes including unsafe
    All,
}

impl FixMode {
    fn allows(self, safety: FixSafety) -> bool {
        match safety {
            FixSafety::Safe => true,
            FixSafety::Unsafe => self == FixMode::All,
            FixSafety::Display => false,
        }
    }
}

/// Text after one application pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixOutcome {
    pub text: String,
    /// Fixes whose edits were applied
    pub applied: usize,
    /// Fixes filtered by mode, overlapping an accepted fix, or out of range
    pub skipped: usize,
}

/// Result of fixing a set of files
#[derive(Debug, Default)]
pub struct FixResult {
    /// Number of files modified
    pub files_modified: usize,
    /// Number of fixes applied
    pub fixes_applied: usize,
    /// Number of fixes skipped
    pub fixes_skipped: usize,
    /// Errors encountered
    pub errors: Vec<String>,
    /// Unified diff per changed file
    pub diffs: HashMap<PathBuf, String>,
}

impl FixResult {
    pub fn record(&mut self, path: &Path, original: &str, outcome: &FixOutcome) {
        self.fixes_applied += outcome.applied;
        self.fixes_skipped += outcome.skipped;
        if outcome.text != original {
            self.files_modified += 1;
            self.diffs
                .insert(path.to_path_buf(), generate_unified_diff(path, original, &outcome.text));
        }
    }

    /// Every diff, ordered by path
    pub fn format_diffs(&self) -> String {
        let mut paths: Vec<&PathBuf> = self.diffs.keys().collect();
        paths.sort();
        let mut output = String::new();
        for path in paths {
            output.push_str(&self.diffs[path]);
        }
        output
    }
}

fn overlaps(a: Span, b: Span) -> bool {
    a == b || (a.start < b.end() && b.start < a.end())
}

fn in_bounds(text: &str, fix: &Fix) -> bool {
    fix.edits.iter().all(|e| {
        let (start, end) = (e.span.start as usize, e.span.end() as usize);
        end <= text.len() && text.is_char_boundary(start) && text.is_char_boundary(end)
    })
}

/// Applies the fixes carried by diagnostics
pub struct Fixer;

impl Fixer {
    /// Apply every eligible fix once. Fixes are accepted in source order; a fix
    /// overlapping one already accepted is skipped and left for a later round.
    pub fn apply(text: &str, diagnostics: &[Diagnostic], mode: FixMode) -> FixOutcome {
        let mut fixes: Vec<(Span, &Fix)> = diagnostics
            .iter()
            .filter_map(|d| d.fix.as_ref())
            .filter_map(|f| f.extent().map(|extent| (extent, f)))
            .collect();
        fixes.sort_by_key(|(extent, _)| (extent.start, extent.len));

        let mut skipped = 0;
        let mut accepted: Vec<(Span, &Fix)> = Vec::new();
        for (extent, fix) in fixes {
            let clashes = accepted.iter().any(|(other, _)| overlaps(*other, extent));
            if !mode.allows(fix.safety) || clashes || !in_bounds(text, fix) {
                skipped += 1;
                continue;
            }
            accepted.push((extent, fix));
        }

        let mut edits: Vec<_> = accepted.iter().flat_map(|(_, fix)| fix.edits.iter()).collect();
        edits.sort_by_key(|e| std::cmp::Reverse(e.span.start));
        let mut result = text.to_string();
        for edit in edits {
            result.replace_range(edit.span.range(), &edit.replacement);
        }

        FixOutcome {
            text: result,
            applied: accepted.len(),
            skipped,
        }
    }

    /// Apply, re-analyse and repeat until nothing more applies
    pub fn fix_until_stable(
        text: &str,
        mode: FixMode,
        mut analyze: impl FnMut(&str) -> Vec<Diagnostic>,
    ) -> FixOutcome {
        let mut current = FixOutcome {
            text: text.to_string(),
            applied: 0,
            skipped: 0,
        };
        for round in 0..MAX_FIX_ROUNDS {
            let diagnostics = analyze(&current.text);
            let pass = Self::apply(&current.text, &diagnostics, mode);
            current.skipped = pass.skipped;
            if pass.applied == 0 || pass.text == current.text {
                return current;
            }
            log::debug!("fix round {} applied {} fix(es)", round + 1, pass.applied);
            current.applied += pass.applied;
            current.text = pass.text;
        }
        log::warn!("fixes did not converge after {} rounds", MAX_FIX_ROUNDS);
        current
    }

    /// Fix one file's text with the engine's rules
    pub fn fix_all(engine: &Engine, path: &Path, text: &str, mode: FixMode) -> FixOutcome {
        Self::fix_until_stable(text, mode, |current| engine.analyze_source(path, current).diagnostics)
    }
}

/// Generate a unified diff between two strings
pub fn generate_unified_diff(file: &Path, original: &str, modified: &str) -> String {
    let diff = TextDiff::from_lines(original, modified);
    let mut output = String::new();
    output.push_str(&format!("--- a/{}\n", file.display()));
    output.push_str(&format!("+++ b/{}\n", file.display()));

    for group in diff.grouped_ops(3) {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            continue;
        };
        let old = first.old_range().start..last.old_range().end;
        let new = first.new_range().start..last.new_range().end;
        output.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            old.start + 1,
            old.len(),
            new.start + 1,
            new.len()
        ));
        for op in &group {
            for change in diff.iter_changes(op) {
                let tag = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };
                output.push_str(tag);
                output.push_str(change.value());
                if change.missing_newline() {
                    output.push('\n');
                }
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{Location, Severity, TextEdit};

    fn with_fix(fix: Fix) -> Diagnostic {
        Diagnostic::new("test", Severity::Warning, "msg", Location::new(PathBuf::from("t.cs"), 1, 1)).with_fix(fix)
    }

    fn replace(start: u32, len: u32, text: &str) -> Vec<TextEdit> {
        vec![TextEdit::replace(Span::new(start, len), text)]
    }

    #[test]
    fn test_applies_right_to_left() {
        let text = "aaa bbb ccc";
        let diags = vec![
            with_fix(Fix::safe("first", replace(0, 3, "x"))),
            with_fix(Fix::safe("last", replace(8, 3, "zzzz"))),
        ];
        let outcome = Fixer::apply(text, &diags, FixMode::SafeOnly);
        assert_eq!(outcome.text, "x bbb zzzz");
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn test_overlapping_fix_is_skipped() {
        let text = "aaa bbb";
        let diags = vec![
            with_fix(Fix::safe("outer", replace(0, 7, "x"))),
            with_fix(Fix::safe("inner", replace(4, 3, "y"))),
        ];
        let outcome = Fixer::apply(text, &diags, FixMode::SafeOnly);
        assert_eq!(outcome.text, "x");
        assert_eq!((outcome.applied, outcome.skipped), (1, 1));
    }

    #[test]
    fn test_mode_filters_unsafe_and_display() {
        let text = "abc";
        let diags = vec![
            with_fix(Fix::unsafe_fix("u", replace(0, 1, "A"))),
            with_fix(Fix {
                description: "d".to_string(),
                edits: replace(2, 1, "C"),
                safety: FixSafety::Display,
            }),
        ];
        assert_eq!(Fixer::apply(text, &diags, FixMode::SafeOnly).text, "abc");
        let all = Fixer::apply(text, &diags, FixMode::All);
        assert_eq!(all.text, "Abc");
        assert_eq!(all.skipped, 1);
    }

    #[test]
    fn test_out_of_range_edit_is_skipped() {
        let outcome = Fixer::apply("ab", &[with_fix(Fix::safe("far", replace(5, 1, "x")))], FixMode::All);
        assert_eq!(outcome.text, "ab");
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn test_fix_until_stable_repeats() {
        // each round removes one leading '!'
        let outcome = Fixer::fix_until_stable("!!!x", FixMode::SafeOnly, |text| {
            if text.starts_with('!') {
                vec![with_fix(Fix::safe("drop", vec![TextEdit::delete(Span::new(0, 1))]))]
            } else {
                Vec::new()
            }
        });
        assert_eq!(outcome.text, "x");
        assert_eq!(outcome.applied, 3);
    }

    #[test]
    fn test_generate_diff() {
        let original = "line1\nline2\nline3\n";
        let modified = "line1\nmodified\nline3\n";
        let diff = generate_unified_diff(Path::new("test.cs"), original, modified);

        assert!(diff.contains("--- a/test.cs"));
        assert!(diff.contains("+++ b/test.cs"));
        assert!(diff.contains("@@ -1,3 +1,3 @@"));
        assert!(diff.contains("-line2"));
        assert!(diff.contains("+modified"));
    }

    #[test]
    fn test_fix_result_records_changes() {
        let mut result = FixResult::default();
        let outcome = FixOutcome {
            text: "new\n".to_string(),
            applied: 2,
            skipped: 1,
        };
        result.record(Path::new("a.cs"), "old\n", &outcome);
        result.record(Path::new("b.cs"), "same\n", &FixOutcome {
            text: "same\n".to_string(),
            applied: 0,
            skipped: 0,
        });
        assert_eq!(result.files_modified, 1);
        assert_eq!(result.fixes_applied, 2);
        assert_eq!(result.fixes_skipped, 1);
        assert!(result.format_diffs().contains("+new"));
    }
}
