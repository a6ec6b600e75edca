//! Pairing expected markers with reported diagnostics

use super::marker::{ExpectationSet, ExpectedIssue, ExpectedLocation};
use super::Problem;
use crate::diagnostic::{Diagnostic, Location, SecondaryLocation};
use std::collections::BTreeMap;

/// Maximum bipartite matching by augmenting paths.
///
/// `result[l]` is the right vertex matched to left vertex `l`. Vertices are
/// tried in index order, so equal inputs always give the same pairing.
pub fn maximum_matching(
    left: usize,
    right: usize,
    compatible: impl Fn(usize, usize) -> bool,
) -> Vec<Option<usize>> {
    let mut owner: Vec<Option<usize>> = vec![None; right];
    extend_matching(left, right, &compatible, &mut owner);
    pairing_of(left, &owner)
}

/// Maximum matching that keeps as many `preferred` pairs as it can.
///
/// Preferred pairs are matched first, then augmenting paths over all
/// `compatible` pairs grow the matching to maximum size. `preferred` must
/// imply `compatible`.
pub fn preferred_matching(
    left: usize,
    right: usize,
    preferred: impl Fn(usize, usize) -> bool,
    compatible: impl Fn(usize, usize) -> bool,
) -> Vec<Option<usize>> {
    let mut owner: Vec<Option<usize>> = vec![None; right];
    extend_matching(left, right, &preferred, &mut owner);
    extend_matching(left, right, &compatible, &mut owner);
    pairing_of(left, &owner)
}

/// Augment from every left vertex not yet matched in `owner`
fn extend_matching(
    left: usize,
    right: usize,
    compatible: &impl Fn(usize, usize) -> bool,
    owner: &mut [Option<usize>],
) {
    let adjacency: Vec<Vec<usize>> = (0..left)
        .map(|l| (0..right).filter(|&r| compatible(l, r)).collect())
        .collect();
    for l in 0..left {
        if owner.contains(&Some(l)) {
            continue;
        }
        let mut visited = vec![false; right];
        augment(l, &adjacency, &mut visited, owner);
    }
}

fn pairing_of(left: usize, owner: &[Option<usize>]) -> Vec<Option<usize>> {
    let mut result = vec![None; left];
    for (r, l) in owner.iter().enumerate() {
        if let Some(l) = l {
            result[*l] = Some(r);
        }
    }
    result
}

fn augment(
    l: usize,
    adjacency: &[Vec<usize>],
    visited: &mut [bool],
    owner: &mut [Option<usize>],
) -> bool {
    for &r in &adjacency[l] {
        if visited[r] {
            continue;
        }
        visited[r] = true;
        if owner[r].map_or(true, |other| augment(other, adjacency, visited, owner)) {
            owner[r] = Some(l);
            return true;
        }
    }
    false
}

fn describe_expected(kind: &str, expected: &ExpectedLocation) -> String {
    let mut text = kind.to_string();
    if let Some(span) = expected.span {
        text.push_str(&format!(" ^{}#{}", span.column, span.length));
    }
    if let Some(message) = &expected.message {
        text.push_str(&format!(" {{{{{}}}}}", message));
    }
    text
}

fn describe_actual(kind: &str, location: &Location, message: Option<&str>) -> String {
    let mut text = format!("{} ^{}#{}", kind, location.column, location.length);
    if let Some(message) = message {
        text.push_str(&format!(" {{{{{}}}}}", message));
    }
    text
}

fn primary_matches(expected: &ExpectedIssue, actual: &Diagnostic) -> bool {
    let loc = &actual.location;
    expected
        .location
        .matches(loc.line, loc.column, loc.length, Some(&actual.message))
}

fn secondary_matches(expected: &ExpectedLocation, actual: &SecondaryLocation) -> bool {
    let loc = &actual.location;
    expected.matches(loc.line, loc.column, loc.length, actual.message.as_deref())
}

fn secondary_pairing(expected: &ExpectedIssue, actual: &Diagnostic) -> Vec<Option<usize>> {
    maximum_matching(expected.secondary.len(), actual.secondary.len(), |e, a| {
        secondary_matches(&expected.secondary[e], &actual.secondary[a])
    })
}

/// Whether every secondary on both sides has a partner
fn secondaries_agree(expected: &ExpectedIssue, actual: &Diagnostic) -> bool {
    expected.secondary.len() == actual.secondary.len()
        && secondary_pairing(expected, actual).iter().all(Option::is_some)
}

fn compare_secondaries(expected: &ExpectedIssue, actual: &Diagnostic, problems: &mut Vec<Problem>) {
    let pairing = secondary_pairing(expected, actual);
    let of_line = actual.location.line;

    for (e, matched) in pairing.iter().enumerate() {
        if matched.is_none() {
            let secondary = &expected.secondary[e];
            problems.push(Problem::Missing {
                line: secondary.line,
                expected: format!("{} (of line {})", describe_expected("Secondary", secondary), of_line),
            });
        }
    }
    for (a, secondary) in actual.secondary.iter().enumerate() {
        if !pairing.contains(&Some(a)) {
            problems.push(Problem::Unexpected {
                line: secondary.location.line,
                actual: format!(
                    "{} (of line {})",
                    describe_actual("Secondary", &secondary.location, secondary.message.as_deref()),
                    of_line
                ),
            });
        }
    }
}

/// Every difference between the expectations and the reported diagnostics
pub fn compare(expected: &ExpectationSet, actual: &[Diagnostic]) -> Vec<Problem> {
    let mut by_line: BTreeMap<usize, (Vec<&ExpectedIssue>, Vec<&Diagnostic>)> = BTreeMap::new();
    for issue in &expected.issues {
        by_line.entry(issue.location.line).or_default().0.push(issue);
    }
    for diagnostic in actual {
        by_line
            .entry(diagnostic.location.line)
            .or_default()
            .1
            .push(diagnostic);
    }

    let mut problems = Vec::new();
    for (line, (wanted, reported)) in by_line {
        let pairing = preferred_matching(
            wanted.len(),
            reported.len(),
            |e, a| primary_matches(wanted[e], reported[a]) && secondaries_agree(wanted[e], reported[a]),
            |e, a| primary_matches(wanted[e], reported[a]),
        );
        for (e, matched) in pairing.iter().enumerate() {
            match matched {
                Some(a) => compare_secondaries(wanted[e], reported[*a], &mut problems),
                None => problems.push(Problem::Missing {
                    line,
                    expected: describe_expected("Noncompliant", &wanted[e].location),
                }),
            }
        }
        for (a, diagnostic) in reported.iter().enumerate() {
            if !pairing.contains(&Some(a)) {
                problems.push(Problem::Unexpected {
                    line,
                    actual: describe_actual("Noncompliant", &diagnostic.location, Some(&diagnostic.message)),
                });
            }
        }
    }
    problems
}
