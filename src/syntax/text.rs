//! Source spans and offset/line conversion

use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open byte range `[start, start + len)` into the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub len: u32,
}

impl Span {
    pub fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// Span covering `[start, end)`
    pub fn from_bounds(start: u32, end: u32) -> Self {
        Self {
            start,
            len: end.saturating_sub(start),
        }
    }

    pub fn empty(at: u32) -> Self {
        Self { start: at, len: 0 }
    }

    pub fn end(&self) -> u32 {
        self.start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Smallest span covering both
    pub fn cover(&self, other: Span) -> Span {
        Span::from_bounds(self.start.min(other.start), self.end().max(other.end()))
    }

    pub fn contains(&self, other: Span) -> bool {
        self.start <= other.start && other.end() <= self.end()
    }

    pub fn contains_offset(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end()
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start as usize..self.end() as usize
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end())
    }
}

/// 1-based line/column position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineCol {
    pub line: usize,
    pub column: usize,
}

/// Pre-computed line start offsets for fast position lookup
#[derive(Debug, Clone, Default)]
pub struct LineIndex {
    line_starts: Vec<u32>,
    text_len: u32,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| (i + 1) as u32))
            .collect();
        Self {
            line_starts,
            text_len: text.len() as u32,
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Convert a byte offset to a 1-based line and (character) column.
    ///
    /// Columns count characters, not bytes, so `text` must be the indexed text.
    pub fn line_col(&self, text: &str, offset: u32) -> LineCol {
        let offset = offset.min(self.text_len);
        let line = self.line_starts.partition_point(|&start| start <= offset);
        let line_start = self.line_starts[line.saturating_sub(1)] as usize;
        let column = text
            .get(line_start..offset as usize)
            .map(|s| s.chars().count())
            .unwrap_or(0)
            + 1;
        LineCol { line, column }
    }

    /// Byte offset of the first character of a 1-based line
    pub fn line_start(&self, line: usize) -> Option<u32> {
        if line == 0 {
            return None;
        }
        self.line_starts.get(line - 1).copied()
    }

    /// Byte offset for a 1-based line and character column
    pub fn offset(&self, text: &str, pos: LineCol) -> Option<u32> {
        let start = self.line_start(pos.line)? as usize;
        let line_text = text[start..].split('\n').next().unwrap_or("");
        let mut chars = line_text.char_indices();
        let byte = if pos.column <= 1 {
            0
        } else {
            match chars.nth(pos.column - 1) {
                Some((b, _)) => b,
                None => line_text.len(),
            }
        };
        Some((start + byte) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_bounds() {
        let span = Span::from_bounds(4, 10);
        assert_eq!(span.len, 6);
        assert_eq!(span.end(), 10);
        assert!(span.contains(Span::new(5, 2)));
        assert!(!span.contains(Span::new(8, 5)));
        assert_eq!(span.cover(Span::new(12, 3)), Span::from_bounds(4, 15));
    }

    #[test]
    fn test_line_col() {
        let text = "ab\ncde\n\nf";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.line_col(text, 0), LineCol { line: 1, column: 1 });
        assert_eq!(index.line_col(text, 4), LineCol { line: 2, column: 2 });
        assert_eq!(index.line_col(text, 7), LineCol { line: 3, column: 1 });
        assert_eq!(index.line_col(text, 8), LineCol { line: 4, column: 1 });
    }

    #[test]
    fn test_offset_round_trip() {
        let text = "int x;\n  var y = 1;\n";
        let index = LineIndex::new(text);
        let offset = index
            .offset(text, LineCol { line: 2, column: 7 })
            .unwrap();
        assert_eq!(&text[offset as usize..offset as usize + 1], "y");
        assert_eq!(index.line_col(text, offset), LineCol { line: 2, column: 7 });
    }
}
