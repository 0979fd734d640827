//! Path/glob matching for selective extraction.
//!
//! Patterns follow glob syntax within a segment (`*` and `?` never cross
//! `/`). The recursive wildcard is supported as `prefix/**/suffix`: the
//! prefix must match the path as-is, the middle spans any number of
//! segments, and the suffix matches either the remaining path or its
//! trailing segment. Patterns that do not parse match nothing.

use glob_match::glob_match;

/// Returns true if `path` matches at least one of `patterns`.
///
/// An empty pattern list matches everything. Paths and patterns are
/// normalized to forward slashes before matching.
pub fn matches(path: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    let path = normalize(path);
    patterns.iter().any(|p| matches_one(&normalize(p), &path))
}

fn normalize(s: &str) -> String {
    s.replace('\\', "/")
}

fn matches_one(pattern: &str, path: &str) -> bool {
    let Some((prefix, rest)) = pattern.split_once("**") else {
        return glob_match(pattern, path);
    };

    // Multiple `**` segments are unspecified; they never match.
    if rest.contains("**") {
        return false;
    }

    let remainder = if prefix.is_empty() {
        path
    } else {
        match path.strip_prefix(prefix) {
            Some(r) => r,
            None => return false,
        }
    };

    let suffix = rest.trim_start_matches('/');
    if suffix.is_empty() {
        return true;
    }

    if glob_match(suffix, remainder) {
        return true;
    }
    let tail = remainder.rsplit('/').next().unwrap_or(remainder);
    glob_match(suffix, tail)
}
