//! Key ordering and sorted-entry lookups
//!
//! Keys order case-insensitively (simple per-char uppercase, then code point). A
//! char whose uppercase form expands to several chars compares as itself, so
//! every key folds to the same number of chars. Keys that differ only in case
//! fall back to exact ordinal order, so they stay distinct entries with a stable
//! position.

use std::cmp::Ordering;

fn fold(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(single), None) => single,
        _ => c,
    }
}

fn folded(key: &str) -> impl Iterator<Item = char> + '_ {
    key.chars().map(fold)
}

/// Total order used by every node and by the cursor
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    folded(a).cmp(folded(b)).then_with(|| a.cmp(b))
}

/// Case-insensitive equality, ignoring the ordinal tie-break
pub fn keys_equal_ignore_case(a: &str, b: &str) -> bool {
    folded(a).eq(folded(b))
}

/// Case-insensitive prefix test under the same folding as [`compare_keys`]
pub(crate) fn starts_with_ignore_case(key: &str, prefix: &str) -> bool {
    let mut chars = folded(key);
    folded(prefix).all(|c| chars.next() == Some(c))
}

/// Binary search over entries sorted by [`compare_keys`]
pub(crate) fn search<V>(entries: &[(String, V)], key: &str) -> Result<usize, usize> {
    entries.binary_search_by(|(probe, _)| compare_keys(probe, key))
}

/// Index of the last entry whose key is `<= key`
///
/// A descent only routes keys at or above a branch's first separator into it,
/// so the floor always exists there.
pub(crate) fn floor_index<V>(entries: &[(String, V)], key: &str) -> usize {
    match search(entries, key) {
        Ok(index) => index,
        Err(index) => index.saturating_sub(1),
    }
}

/// Index of the first entry whose key is `>= key`
pub(crate) fn lower_bound<V>(entries: &[(String, V)], key: &str) -> usize {
    match search(entries, key) {
        Ok(index) | Err(index) => index,
    }
}

/// Index of the first entry whose key is `> key`
pub(crate) fn upper_bound<V>(entries: &[(String, V)], key: &str) -> usize {
    match search(entries, key) {
        Ok(index) => index + 1,
        Err(index) => index,
    }
}

/// Strictly ascending, with no duplicate keys
pub(crate) fn is_strictly_sorted<V>(entries: &[(String, V)]) -> bool {
    entries
        .windows(2)
        .all(|pair| compare_keys(&pair[0].0, &pair[1].0) == Ordering::Less)
}

/// Insert or replace, keeping `entries` sorted; returns true if the key was new
pub(crate) fn upsert_sorted<V>(entries: &mut Vec<(String, V)>, key: String, value: V) -> bool {
    match search(entries, &key) {
        Ok(index) => {
            entries[index].1 = value;
            false
        }
        Err(index) => {
            entries.insert(index, (key, value));
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(keys: &[&str]) -> Vec<(String, ())> {
        keys.iter().map(|k| (k.to_string(), ())).collect()
    }

    #[test]
    fn test_case_insensitive_order() {
        assert_eq!(compare_keys("apple", "BANANA"), Ordering::Less);
        assert_eq!(compare_keys("Zebra", "apple"), Ordering::Greater);
        assert_eq!(compare_keys("", "a"), Ordering::Less);
        assert_eq!(compare_keys("abc", "abc"), Ordering::Equal);
    }

    #[test]
    fn test_case_variants_stay_distinct() {
        assert_ne!(compare_keys("Key", "key"), Ordering::Equal);
        assert_eq!(compare_keys("Key", "key"), "Key".cmp("key"));
        assert!(keys_equal_ignore_case("Key", "kEY"));
        assert!(!keys_equal_ignore_case("Key", "Keys"));
    }

    #[test]
    fn test_expanding_uppercase_compares_as_itself() {
        assert!(keys_equal_ignore_case("é", "É"));
        assert!(!keys_equal_ignore_case("ß", "SS"));
        assert!(!keys_equal_ignore_case("straße", "STRASSE"));
        assert_eq!(compare_keys("ß", "ss"), Ordering::Greater);
        assert_eq!(compare_keys("ß", "SS"), Ordering::Greater);
    }

    #[test]
    fn test_starts_with_ignore_case() {
        assert!(starts_with_ignore_case("Apple-0001", "apple-"));
        assert!(starts_with_ignore_case("a", ""));
        assert!(!starts_with_ignore_case("a", "a-"));
        assert!(!starts_with_ignore_case("ab-1", "a-"));
        assert!(!starts_with_ignore_case("ß-1", "ss-"));
    }

    #[test]
    fn test_sorting_with_compare_keys() {
        let mut keys = vec!["b", "A", "a", "C", ""];
        keys.sort_by(|a, b| compare_keys(a, b));
        assert_eq!(keys, vec!["", "A", "a", "b", "C"]);
    }

    #[test]
    fn test_floor_and_bounds() {
        let sorted = entries(&["", "d", "m", "t"]);
        assert_eq!(floor_index(&sorted, "a"), 0);
        assert_eq!(floor_index(&sorted, "E"), 1);
        assert_eq!(floor_index(&sorted, "D"), 0);
        assert_eq!(floor_index(&sorted, "e"), 1);
        assert_eq!(floor_index(&sorted, "zzz"), 3);
        assert_eq!(floor_index(&sorted, ""), 0);

        assert_eq!(lower_bound(&sorted, "e"), 2);
        assert_eq!(lower_bound(&sorted, "m"), 2);
        assert_eq!(upper_bound(&sorted, "m"), 3);
        assert_eq!(upper_bound(&sorted, "zzz"), 4);
        assert!(is_strictly_sorted(&sorted));
        assert!(!is_strictly_sorted(&entries(&["", "m", "d"])));
        assert!(!is_strictly_sorted(&entries(&["a", "a"])));
    }

    #[test]
    fn test_upsert_sorted() {
        let mut sorted: Vec<(String, u32)> = Vec::new();
        assert!(upsert_sorted(&mut sorted, "m".into(), 1));
        assert!(upsert_sorted(&mut sorted, "a".into(), 2));
        assert!(upsert_sorted(&mut sorted, "Z".into(), 3));
        assert!(!upsert_sorted(&mut sorted, "m".into(), 4));

        let keys: Vec<&str> = sorted.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "m", "Z"]);
        assert_eq!(sorted[1].1, 4);
    }
}
