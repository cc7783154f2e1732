// SPDX-License-Identifier: MIT OR Apache-2.0
//! Glob-style ownership matching.
//!
//! Pattern forms: exact path, trailing-slash directory, `**` recursive
//! glob, and single-`*` globs (matched against the basename when the
//! pattern has no slash). Specificity is a weight, not a decision: every
//! matching pattern contributes, decayed by its wildcard count, so
//! definition owners stay visible under noisy rules.

use ckb_core::paths::{basename, is_under, paths_equal};
use regex::Regex;

/// Whether `pattern` matches `path` under the ownership glob semantics.
#[must_use]
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern == "**" {
        return true;
    }
    if let Some(dir) = pattern.strip_suffix('/') {
        return is_under(dir, path);
    }
    if !pattern.contains('*') && !pattern.contains('?') {
        return paths_equal(pattern, path);
    }
    // Basename fallback: a slashless wildcard pattern matches file names
    // anywhere in the tree.
    let candidate = if pattern.contains('/') {
        path
    } else {
        basename(path)
    };
    match glob_to_regex(pattern) {
        Some(re) => re.is_match(candidate),
        None => false,
    }
}

fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` may also match zero directories.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("(?:.*/)?");
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            c if "\\.+()[]{}^$|".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

/// Specificity weight for a pattern, in `(0, 1]`.
///
/// Literal path segments add weight; every wildcard removes some, so
/// exact paths always outweigh globs and adding a wildcard never raises
/// the score.
#[must_use]
pub fn pattern_specificity(pattern: &str) -> f64 {
    let double_stars = pattern.matches("**").count();
    let single_stars = pattern.matches('*').count().saturating_sub(2 * double_stars);
    let question_marks = pattern.matches('?').count();
    let literal_segments = pattern
        .split('/')
        .filter(|s| !s.is_empty() && !s.contains('*') && !s.contains('?'))
        .count();

    let base = 0.4 + 0.12 * literal_segments.min(5) as f64;
    let penalty =
        0.25 * double_stars as f64 + 0.1 * single_stars as f64 + 0.05 * question_marks as f64;
    (base - penalty).clamp(0.05, 1.0)
}
