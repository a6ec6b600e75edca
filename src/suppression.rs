//! Inline suppression comments

use crate::syntax::SyntaxTree;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static DISABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"lintel-disable-(line|next-line|file)\s+([A-Za-z0-9_,\-]+)").expect("valid regex")
});

const ALL: &str = "all";

/// Rules disabled by `// lintel-disable-*` comments in one file
#[derive(Debug, Clone, Default)]
pub struct Suppressions {
    /// rule id (or "all") -> disabled lines
    lines: HashMap<String, HashSet<usize>>,
    file: HashSet<String>,
}

impl Suppressions {
    /// Collect suppressions from the comments of `tree`
    pub fn from_tree(tree: &SyntaxTree) -> Self {
        let mut suppressions = Suppressions::default();
        for comment in tree.comments() {
            let text = tree.slice(comment.span);
            let line = tree.line_col(comment.span.start).line;
            for cap in DISABLE_RE.captures_iter(text) {
                let ids = cap[2].split(',').filter(|id| !id.is_empty());
                match &cap[1] {
                    "file" => suppressions.file.extend(ids.map(str::to_string)),
                    scope => {
                        let target = if scope == "line" { line } else { line + 1 };
                        for id in ids {
                            suppressions
                                .lines
                                .entry(id.to_string())
                                .or_default()
                                .insert(target);
                        }
                    }
                }
            }
        }
        suppressions
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.file.is_empty()
    }

    /// Check if a rule is disabled on a 1-based line
    pub fn is_disabled(&self, rule_id: &str, line: usize) -> bool {
        [ALL, rule_id]
            .iter()
            .any(|id| self.lines.get(*id).is_some_and(|lines| lines.contains(&line)))
            || self.is_disabled_for_file(rule_id)
    }

    pub fn is_disabled_for_file(&self, rule_id: &str) -> bool {
        self.file.contains(ALL) || self.file.contains(rule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse, ParseOptions};

    fn suppressions(text: &str) -> Suppressions {
        Suppressions::from_tree(&parse(text, &ParseOptions::default()))
    }

    #[test]
    fn test_disable_line() {
        let s = suppressions("class C\n{\n  int x; // lintel-disable-line dead-store\n}\n");
        assert!(s.is_disabled("dead-store", 3));
        assert!(!s.is_disabled("dead-store", 4));
        assert!(!s.is_disabled("other-rule", 3));
    }

    #[test]
    fn test_disable_next_line() {
        let s = suppressions("class C\n{\n  // lintel-disable-next-line dead-store,function-complexity\n  int x;\n}\n");
        assert!(!s.is_disabled("dead-store", 3));
        assert!(s.is_disabled("dead-store", 4));
        assert!(s.is_disabled("function-complexity", 4));
    }

    #[test]
    fn test_disable_file_and_all() {
        let s = suppressions("/* lintel-disable-file dead-store */\nclass C { }\n");
        assert!(s.is_disabled_for_file("dead-store"));
        assert!(s.is_disabled("dead-store", 40));
        assert!(!s.is_disabled_for_file("other-rule"));

        let all = suppressions("class C { } // lintel-disable-line all\n");
        assert!(all.is_disabled("any-rule", 1));
        assert!(!all.is_empty());
    }

    #[test]
    fn test_plain_comments_are_ignored() {
        assert!(suppressions("// lintel is great\nclass C { }\n").is_empty());
    }
}
