//! Expectation markers embedded in fixture comments
//!
//! ```text
//! Foo(bar);   // Noncompliant [0] {{message}}
//! //  ^^^
//! Baz();      // Secondary [0]
//! ```

use crate::syntax::{SyntaxTree, TokenKind, TriviaKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use thiserror::Error;

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(Noncompliant|Secondary)\b(?:@([+-]?\d+))?(?:\s+\^(\d+)#(\d+))?(?:\s*\[([^\]]*)\])?(?:\s*\{\{(.*?)\}\})?",
    )
    .expect("valid regex")
});

static TOLERATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:Error|Ignore)\b(?:@([+-]?\d+))?").expect("valid regex"));

static FIXED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Fixed\b").expect("valid regex"));

static IDS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([^\]]*)\]").expect("valid regex"));

/// 1-based column and length on a single line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ColumnSpan {
    pub column: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Primary,
    Secondary,
}

/// One `Noncompliant` or `Secondary` marker, resolved to the line it is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub kind: MarkerKind,
    pub line: usize,
    /// Line of the comment carrying the marker
    pub comment_line: usize,
    pub span: Option<ColumnSpan>,
    pub ids: Vec<String>,
    pub message: Option<String>,
}

/// Expected position and message; unset parts match anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedLocation {
    pub line: usize,
    pub span: Option<ColumnSpan>,
    pub message: Option<String>,
}

impl ExpectedLocation {
    pub fn matches(&self, line: usize, column: usize, length: usize, message: Option<&str>) -> bool {
        self.line == line
            && self.span.map_or(true, |s| s.column == column && s.length == length)
            && match (&self.message, message) {
                (Some(expected), Some(actual)) => expected == actual,
                (Some(_), None) => false,
                (None, _) => true,
            }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedIssue {
    pub location: ExpectedLocation,
    pub ids: Vec<String>,
    pub secondary: Vec<ExpectedLocation>,
}

/// Everything a fixture says about the output it expects
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectationSet {
    pub issues: Vec<ExpectedIssue>,
    /// Lines where syntax errors are expected (`// Error [CSxxxx]`, `// Ignore`)
    pub tolerated_error_lines: BTreeSet<usize>,
    /// Lines changed by a code fix (`// Fixed`)
    pub fixed_lines: BTreeSet<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct MarkerError {
    pub line: usize,
    pub message: String,
}

impl MarkerError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

struct CaretLine {
    line: usize,
    runs: Vec<ColumnSpan>,
    trailing: String,
}

struct MarkerScanner<'t> {
    tree: &'t SyntaxTree,
    code_lines: BTreeSet<usize>,
    markers: Vec<Marker>,
    carets: Vec<CaretLine>,
    tolerated: BTreeSet<usize>,
    fixed: BTreeSet<usize>,
}

/// Split a comment body on nested `//`, leaving `{{...}}` messages intact
fn segments(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut inside_message = false;
    let mut start = 0;
    let mut i = 0;
    while i < body.len() {
        let rest = &body[i..];
        if rest.starts_with("{{") {
            inside_message = true;
            i += 2;
        } else if rest.starts_with("}}") {
            inside_message = false;
            i += 2;
        } else if !inside_message && rest.starts_with("//") {
            parts.push(body[start..i].trim());
            i += 2;
            start = i;
        } else {
            i += rest.chars().next().map_or(1, char::len_utf8);
        }
    }
    parts.push(body[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn parse_offset(text: Option<&str>, line: usize) -> Result<Option<i64>, MarkerError> {
    text.map(|t| {
        t.trim_start_matches('+')
            .parse::<i64>()
            .map_err(|_| MarkerError::new(line, format!("invalid line offset '{}'", t)))
    })
    .transpose()
}

fn parse_ids(text: Option<&str>) -> Vec<String> {
    text.map(|t| {
        t.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

impl<'t> MarkerScanner<'t> {
    fn new(tree: &'t SyntaxTree) -> Self {
        let code_lines = tree
            .tokens()
            .iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| tree.line_col(t.span.start).line)
            .collect();
        Self {
            tree,
            code_lines,
            markers: Vec::new(),
            carets: Vec::new(),
            tolerated: BTreeSet::new(),
            fixed: BTreeSet::new(),
        }
    }

    fn target_line(&self, comment_line: usize, offset: Option<i64>) -> Result<usize, MarkerError> {
        match offset {
            Some(offset) => {
                let line = comment_line as i64 + offset;
                if line < 1 {
                    return Err(MarkerError::new(comment_line, "line offset points before the file"));
                }
                Ok(line as usize)
            }
            None if self.code_lines.contains(&comment_line) => Ok(comment_line),
            None => self
                .code_lines
                .range(..comment_line)
                .next_back()
                .copied()
                .ok_or_else(|| MarkerError::new(comment_line, "marker has no code line above it")),
        }
    }

    fn scan(&mut self) -> Result<(), MarkerError> {
        let tree = self.tree;
        for comment in tree.comments() {
            let text = tree.slice(comment.span);
            let line = tree.line_col(comment.span.start).line;
            let (prefix, body) = match comment.kind {
                TriviaKind::DocComment => (3, &text[3.min(text.len())..]),
                TriviaKind::BlockComment => {
                    let inner = text.strip_prefix("/*").unwrap_or(text);
                    (2, inner.strip_suffix("*/").unwrap_or(inner))
                }
                _ => (2, &text[2.min(text.len())..]),
            };

            if comment.kind == TriviaKind::LineComment
                && !self.code_lines.contains(&line)
                && body.trim_start().starts_with('^')
            {
                let caret = self.caret_line(line, comment.span.start + prefix, body);
                self.carets.push(caret);
                continue;
            }

            for segment in segments(body) {
                self.segment(segment, line)?;
            }
        }
        Ok(())
    }

    fn caret_line(&self, line: usize, body_offset: u32, body: &str) -> CaretLine {
        let end = body
            .find(|c: char| c != '^' && !c.is_whitespace())
            .unwrap_or(body.len());
        let mut runs = Vec::new();
        let mut run_start = None;
        for (i, c) in body[..end].char_indices().chain(std::iter::once((end, ' '))) {
            match (c == '^', run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(start)) => {
                    let column = self.tree.line_col(body_offset + start as u32).column;
                    runs.push(ColumnSpan {
                        column,
                        length: i - start,
                    });
                    run_start = None;
                }
                _ => {}
            }
        }
        CaretLine {
            line,
            runs,
            trailing: body[end..].trim().to_string(),
        }
    }

    fn segment(&mut self, segment: &str, line: usize) -> Result<(), MarkerError> {
        if let Some(cap) = MARKER_RE.captures(segment) {
            let marker = self.marker(&cap, line, None)?;
            self.markers.push(marker);
        } else if let Some(cap) = TOLERATE_RE.captures(segment) {
            let offset = parse_offset(cap.get(1).map(|m| m.as_str()), line)?;
            let target = self.target_line(line, offset)?;
            self.tolerated.insert(target);
        } else if FIXED_RE.is_match(segment) {
            let target = self.target_line(line, None)?;
            self.fixed.insert(target);
        }
        Ok(())
    }

    /// Build a marker from a regex match; `target` overrides line resolution
    fn marker(
        &self,
        cap: &regex::Captures<'_>,
        line: usize,
        target: Option<usize>,
    ) -> Result<Marker, MarkerError> {
        let kind = if &cap[1] == "Noncompliant" {
            MarkerKind::Primary
        } else {
            MarkerKind::Secondary
        };
        let offset = parse_offset(cap.get(2).map(|m| m.as_str()), line)?;
        let span = match (cap.get(3), cap.get(4)) {
            (Some(column), Some(length)) => Some(ColumnSpan {
                column: column
                    .as_str()
                    .parse()
                    .map_err(|_| MarkerError::new(line, "invalid column"))?,
                length: length
                    .as_str()
                    .parse()
                    .map_err(|_| MarkerError::new(line, "invalid length"))?,
            }),
            _ => None,
        };
        let line_about = match target {
            Some(target) => target,
            None => self.target_line(line, offset)?,
        };
        Ok(Marker {
            kind,
            line: line_about,
            comment_line: line,
            span,
            ids: parse_ids(cap.get(5).map(|m| m.as_str())),
            message: cap.get(6).map(|m| m.as_str().to_string()),
        })
    }

    fn caret_target(&self, caret_line: usize) -> Result<usize, MarkerError> {
        let caret_lines: BTreeSet<usize> = self.carets.iter().map(|c| c.line).collect();
        (1..caret_line)
            .rev()
            .find(|l| !caret_lines.contains(l))
            .ok_or_else(|| MarkerError::new(caret_line, "caret line has no line above it"))
    }

    fn apply_carets(&mut self) -> Result<(), MarkerError> {
        for index in 0..self.carets.len() {
            let (line, runs, trailing) = {
                let caret = &self.carets[index];
                (caret.line, caret.runs.clone(), caret.trailing.clone())
            };
            let target = self.caret_target(line)?;
            let Some(first) = runs.first().copied() else {
                continue;
            };

            if let Some(cap) = MARKER_RE.captures(&trailing) {
                let mut marker = self.marker(&cap, line, Some(target))?;
                marker.span = Some(first);
                self.markers.push(marker);
                continue;
            }

            let ids = parse_ids(
                IDS_RE
                    .captures(&trailing)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str()),
            );
            for run in runs {
                let existing = self.markers.iter_mut().find(|m| {
                    m.kind == MarkerKind::Primary
                        && m.line == target
                        && m.span.is_none()
                        && (ids.is_empty() || m.ids.iter().any(|id| ids.contains(id)))
                });
                match existing {
                    Some(marker) => marker.span = Some(run),
                    None => self.markers.push(Marker {
                        kind: MarkerKind::Primary,
                        line: target,
                        comment_line: line,
                        span: Some(run),
                        ids: ids.clone(),
                        message: None,
                    }),
                }
            }
        }
        Ok(())
    }

    fn into_expectations(self) -> Result<ExpectationSet, MarkerError> {
        let (primaries, secondaries): (Vec<Marker>, Vec<Marker>) = self
            .markers
            .into_iter()
            .partition(|m| m.kind == MarkerKind::Primary);

        let mut issues: Vec<ExpectedIssue> = primaries
            .into_iter()
            .map(|m| ExpectedIssue {
                location: ExpectedLocation {
                    line: m.line,
                    span: m.span,
                    message: m.message,
                },
                ids: m.ids,
                secondary: Vec::new(),
            })
            .collect();

        for secondary in secondaries {
            let location = ExpectedLocation {
                line: secondary.line,
                span: secondary.span,
                message: secondary.message.clone(),
            };
            if secondary.ids.is_empty() {
                let nearest = issues
                    .iter_mut()
                    .filter(|issue| issue.ids.is_empty())
                    .min_by_key(|issue| {
                        let distance = issue.location.line.abs_diff(secondary.line);
                        (distance, issue.location.line > secondary.line)
                    });
                match nearest {
                    Some(issue) => issue.secondary.push(location),
                    None => {
                        return Err(MarkerError::new(
                            secondary.comment_line,
                            "Secondary marker without an id has no Noncompliant marker to attach to",
                        ))
                    }
                }
                continue;
            }
            for id in &secondary.ids {
                let mut attached = false;
                for issue in issues.iter_mut().filter(|issue| issue.ids.contains(id)) {
                    if !issue.secondary.contains(&location) {
                        issue.secondary.push(location.clone());
                    }
                    attached = true;
                }
                if !attached {
                    return Err(MarkerError::new(
                        secondary.comment_line,
                        format!("Secondary id [{}] has no Noncompliant marker", id),
                    ));
                }
            }
        }

        Ok(ExpectationSet {
            issues,
            tolerated_error_lines: self.tolerated,
            fixed_lines: self.fixed,
        })
    }
}

/// Collect the expectations written in `tree`'s comments
pub fn parse_markers(tree: &SyntaxTree) -> Result<ExpectationSet, MarkerError> {
    let mut scanner = MarkerScanner::new(tree);
    scanner.scan()?;
    scanner.apply_carets()?;
    scanner.into_expectations()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, ParseOptions};

    fn markers(text: &str) -> ExpectationSet {
        parse_markers(&parse(text, &ParseOptions::default())).unwrap()
    }

    fn marker_error(text: &str) -> MarkerError {
        parse_markers(&parse(text, &ParseOptions::default())).unwrap_err()
    }

    #[test]
    fn test_noncompliant_on_code_line() {
        let set = markers("class C {\n  int x; // Noncompliant {{Remove it.}}\n}\n");
        assert_eq!(set.issues.len(), 1);
        let issue = &set.issues[0];
        assert_eq!(issue.location.line, 2);
        assert_eq!(issue.location.message.as_deref(), Some("Remove it."));
        assert_eq!(issue.location.span, None);
    }

    #[test]
    fn test_comment_only_line_targets_previous_code_line() {
        let set = markers("class C {\n  int x;\n\n  // Noncompliant\n}\n");
        assert_eq!(set.issues[0].location.line, 2);
    }

    #[test]
    fn test_offsets_are_relative_to_comment_line() {
        let text = "class C {\n  // Noncompliant@+1\n  int x;\n  int y;\n  // Noncompliant@-1 // Noncompliant@-2\n}\n";
        let lines: Vec<usize> = markers(text).issues.iter().map(|i| i.location.line).collect();
        assert_eq!(lines, vec![3, 4, 3]);
    }

    #[test]
    fn test_caret_line_supplies_span() {
        let text = "class C {\n  int field; // Noncompliant\n//    ^^^^^\n}\n";
        let set = markers(text);
        assert_eq!(set.issues.len(), 1);
        assert_eq!(
            set.issues[0].location.span,
            Some(ColumnSpan {
                column: 7,
                length: 5
            })
        );
    }

    #[test]
    fn test_bare_caret_line_creates_marker() {
        let text = "class C {\n  int field;\n//^^^\n}\n";
        let set = markers(text);
        assert_eq!(set.issues.len(), 1);
        assert_eq!(set.issues[0].location.line, 2);
        assert_eq!(
            set.issues[0].location.span,
            Some(ColumnSpan {
                column: 3,
                length: 3
            })
        );
    }

    #[test]
    fn test_explicit_column_span() {
        let set = markers("class C {\n  int x; // Noncompliant ^7#1\n}\n");
        assert_eq!(
            set.issues[0].location.span,
            Some(ColumnSpan {
                column: 7,
                length: 1
            })
        );
    }

    #[test]
    fn test_secondary_attaches_by_id() {
        let text = "class C {\n  int a; // Noncompliant [0]\n  int b; // Noncompliant [1]\n  int c; // Secondary [1]\n  int d;\n//    ^ Secondary [0] {{here}}\n}\n";
        let set = markers(text);
        assert_eq!(set.issues.len(), 2);
        assert_eq!(set.issues[0].secondary.len(), 1);
        assert_eq!(set.issues[0].secondary[0].line, 5);
        assert_eq!(set.issues[0].secondary[0].message.as_deref(), Some("here"));
        assert_eq!(set.issues[1].secondary.len(), 1);
        assert_eq!(set.issues[1].secondary[0].line, 4);
    }

    #[test]
    fn test_secondary_without_id_attaches_to_nearest_primary() {
        let text = "class C {\n  int a; // Noncompliant\n  int b; // Secondary\n  int c;\n  int d; // Noncompliant\n}\n";
        let set = markers(text);
        assert_eq!(set.issues[0].secondary.len(), 1);
        assert!(set.issues[1].secondary.is_empty());
    }

    #[test]
    fn test_orphan_secondary_is_an_error() {
        let err = marker_error("class C {\n  int a; // Secondary [3]\n}\n");
        assert_eq!(err.line, 2);
        assert!(err.message.contains("[3]"));
    }

    #[test]
    fn test_compliant_and_plain_comments_ignored() {
        let set = markers("class C {\n  int a; // Compliant\n  int b; // FN, should be Noncompliant\n}\n");
        assert!(set.issues.is_empty());
    }

    #[test]
    fn test_message_may_contain_slashes() {
        let set = markers("class C {\n  int a; // Noncompliant {{See http://example.com}}\n}\n");
        assert_eq!(
            set.issues[0].location.message.as_deref(),
            Some("See http://example.com")
        );
    }

    #[test]
    fn test_error_and_fixed_lines() {
        let text = "class C {\n  Undefined a; // Error [CS0246]\n  int b; // Fixed\n  // Ignore@+1\n  int c;\n}\n";
        let set = markers(text);
        assert_eq!(set.tolerated_error_lines, [2, 5].into_iter().collect());
        assert_eq!(set.fixed_lines, [3].into_iter().collect());
    }

    #[test]
    fn test_block_comment_markers() {
        let set = markers("class C {\n  int a /* Noncompliant */ ;\n}\n");
        assert_eq!(set.issues.len(), 1);
        assert_eq!(set.issues[0].location.line, 2);
    }
}
