//! Version string comparison.
//!
//! Versions are compared as dotted numeric components (`3.1` < `3.1.2` <
//! `24.8`). Strings that do not parse that way fall back to a lexical
//! comparison, and the result says so.

use std::cmp::Ordering;

/// Outcome of comparing two version strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionComparison {
    pub ordering: Ordering,
    /// False when at least one side was not dotted-numeric and the strings
    /// were compared lexically.
    pub recognized: bool,
}

/// Parses `"v3.1.2"` style versions into numeric components.
pub fn parse_version(version: &str) -> Option<Vec<u64>> {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                part.parse::<u64>().ok()
            }
        })
        .collect()
}

/// Compares two version strings.
pub fn compare_versions(a: &str, b: &str) -> VersionComparison {
    match (parse_version(a), parse_version(b)) {
        (Some(left), Some(right)) => {
            let len = left.len().max(right.len());
            let component = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);
            let ordering = (0..len)
                .map(|i| component(&left, i).cmp(&component(&right, i)))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal);
            VersionComparison {
                ordering,
                recognized: true,
            }
        }
        _ => VersionComparison {
            ordering: a.trim().cmp(b.trim()),
            recognized: false,
        },
    }
}

/// Strips the decoration release feeds put around a version (`v3.1`,
/// `pandoc-3.1`, trailing whitespace).
pub fn normalize_version(raw: &str) -> String {
    let trimmed = raw.trim();
    let start = trimmed
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(0);
    trimmed[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("3.1.2"), Some(vec![3, 1, 2]));
        assert_eq!(parse_version("v24.8"), Some(vec![24, 8]));
        assert_eq!(parse_version(" 7 "), Some(vec![7]));
        assert_eq!(parse_version("fresh"), None);
        assert_eq!(parse_version("3..1"), None);
        assert_eq!(parse_version("3.1-rc1"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_numeric_comparison() {
        let cmp = compare_versions("2.9", "3.1");
        assert_eq!(cmp.ordering, Ordering::Less);
        assert!(cmp.recognized);

        assert_eq!(compare_versions("3.10", "3.9").ordering, Ordering::Greater);
        assert_eq!(compare_versions("3.1", "3.1.0").ordering, Ordering::Equal);
        assert_eq!(compare_versions("v7.1", "7.1").ordering, Ordering::Equal);
    }

    #[test]
    fn test_lexical_fallback() {
        let cmp = compare_versions("fresh", "still");
        assert_eq!(cmp.ordering, Ordering::Less);
        assert!(!cmp.recognized);

        let mixed = compare_versions("7.1", "git-2024");
        assert!(!mixed.recognized);
    }

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("v3.6.2\n"), "3.6.2");
        assert_eq!(normalize_version("libreoffice-24.8.4"), "24.8.4");
        assert_eq!(normalize_version("fresh"), "fresh");
    }
}
