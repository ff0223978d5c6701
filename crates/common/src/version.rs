//! Numeric, digit-group-by-digit-group version comparison (spec.md §4.2
//! `SendMD`: "version comparison is done numerically, digit-group by
//! digit-group", and §4.4's minimum-protocol-version check).
//!
//! A plain string comparison would order `"4.10.0"` before `"4.9.0"`; this
//! splits on non-digit separators and compares each group as an integer,
//! treating a missing trailing group as zero.

use std::cmp::Ordering;

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut a_groups = digit_groups(a);
    let mut b_groups = digit_groups(b);
    let len = a_groups.len().max(b_groups.len());
    a_groups.resize(len, 0);
    b_groups.resize(len, 0);
    a_groups.cmp(&b_groups)
}

pub fn version_less_than(a: &str, b: &str) -> bool {
    compare_versions(a, b) == Ordering::Less
}

fn digit_groups(version: &str) -> Vec<u64> {
    version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|group| !group.is_empty())
        .map(|group| group.parse().unwrap_or(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_groups_outrank_lexical_order() {
        assert_eq!(compare_versions("4.10.0", "4.9.0"), Ordering::Greater);
    }

    #[test]
    fn missing_trailing_group_is_zero() {
        assert_eq!(compare_versions("4.4", "4.4.0"), Ordering::Equal);
    }

    #[test]
    fn known_buggy_version_is_detected() {
        assert!(version_less_than("4.4.17", "4.4.18"));
        assert!(!version_less_than("4.4.18", "4.4.18"));
        assert!(!version_less_than("4.5.0", "4.4.18"));
    }
}
