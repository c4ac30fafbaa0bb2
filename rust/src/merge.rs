//! Non-destructive combination of a freshly generated partition with the
//! previously persisted full-day map.
//!
//! The guarantee that makes concurrent partitioned editing safe: no key
//! outside the caller's bunks may differ between input and output.

use rustc_hash::FxHashSet;

use crate::models::DayMap;

/// Merged map plus the bunks the caller does not own, for UI lock marking.
///
/// Foreign entries are carried over bit-identical; the foreign set is
/// reported separately precisely so callers can render locks without the
/// merge ever rewriting foreign values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeResult {
    pub map: DayMap,
    pub foreign_bunks: Vec<String>,
}

/// Combine a freshly produced partition map with the persisted full day.
///
/// Every bunk outside `my_bunks` is preserved exactly as in `existing`;
/// every bunk in `my_bunks` present in `generated` is overwritten entirely.
/// Generated entries for bunks outside `my_bunks` are discarded: the caller
/// had no business producing them.
pub fn merge(existing: &DayMap, generated: &DayMap, my_bunks: &FxHashSet<String>) -> MergeResult {
    let mut map = existing.clone();

    for (bunk, entries) in generated {
        if my_bunks.contains(bunk) {
            map.insert(bunk.clone(), entries.clone());
        }
    }

    let mut foreign_bunks: Vec<String> = map
        .keys()
        .filter(|bunk| !my_bunks.contains(*bunk))
        .cloned()
        .collect();
    foreign_bunks.sort_unstable();

    MergeResult { map, foreign_bunks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Assignment;
    use chrono::NaiveDate;

    fn stamp() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn day_with(bunk: &str, resource: &str, slot: usize) -> DayMap {
        let mut day = DayMap::default();
        let mut entries: Vec<Option<Assignment>> = vec![None; 4];
        entries[slot] = Some(Assignment::new(resource, resource, true, stamp()));
        day.insert(bunk.to_string(), entries);
        day
    }

    fn bunks(names: &[&str]) -> FxHashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_foreign_bunks_preserved_exactly() {
        let mut existing = day_with("F1", "Range", 0);
        existing.extend(day_with("B1", "Field", 1));

        let generated = day_with("B1", "Lake", 2);
        let result = merge(&existing, &generated, &bunks(&["B1"]));

        // Key for key, value for value, outside the partition
        assert_eq!(result.map["F1"], existing["F1"]);
        // Own bunk overwritten entirely
        assert_eq!(result.map["B1"], generated["B1"]);
        assert_eq!(result.foreign_bunks, vec!["F1".to_string()]);
    }

    #[test]
    fn test_generated_foreign_keys_discarded() {
        let existing = day_with("F1", "Range", 0);
        // Caller produced an entry for a bunk it does not own
        let mut generated = day_with("B1", "Lake", 2);
        generated.extend(day_with("F1", "Lake", 3));

        let result = merge(&existing, &generated, &bunks(&["B1"]));
        assert_eq!(result.map["F1"], existing["F1"]);
    }

    #[test]
    fn test_own_bunk_absent_from_generated_kept() {
        let mut existing = day_with("B1", "Field", 1);
        existing.extend(day_with("B2", "Range", 0));
        let generated = day_with("B1", "Lake", 2);

        let result = merge(&existing, &generated, &bunks(&["B1", "B2"]));
        assert_eq!(result.map["B2"], existing["B2"]);
        assert!(result.foreign_bunks.is_empty());
    }

    #[test]
    fn test_three_disjoint_versions_union_last_write_wins() {
        // Scenario: three schedulers each persist a disjoint partition.
        let base = DayMap::default();

        let gen_a = day_with("A1", "Range", 0);
        let v1 = merge(&base, &gen_a, &bunks(&["A1"]));

        let gen_b = day_with("B1", "Field", 1);
        let v2 = merge(&v1.map, &gen_b, &bunks(&["B1"]));

        let mut gen_c = day_with("C1", "Lake", 2);
        gen_c.extend(day_with("C2", "Court", 3));
        let v3 = merge(&v2.map, &gen_c, &bunks(&["C1", "C2"]));

        assert_eq!(v3.map.len(), 4);
        assert_eq!(v3.map["A1"], gen_a["A1"]);
        assert_eq!(v3.map["B1"], gen_b["B1"]);
        assert_eq!(v3.map["C1"], gen_c["C1"]);
        assert_eq!(v3.map["C2"], gen_c["C2"]);
    }

    #[test]
    fn test_repeat_merge_by_same_partition_overwrites() {
        let existing = day_with("A1", "Range", 0);
        let regenerated = day_with("A1", "Field", 3);
        let result = merge(&existing, &regenerated, &bunks(&["A1"]));
        assert_eq!(result.map.len(), 1);
        assert_eq!(result.map["A1"], regenerated["A1"]);
    }
}
