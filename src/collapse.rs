use std::collections::{BTreeSet, HashMap};

use crate::cache::SortingCache;
use crate::db::models::{InstanceId, Record};
use crate::split::PackUnit;

/// True when the two records share at least one label name. Equal cached
/// label hashes settle it without walking the credits.
pub fn label_match(a: &Record, b: &Record, cache: &SortingCache) -> bool {
    let entries = cache.get(a.instance_id()).zip(cache.get(b.instance_id()));
    if let Some((ea, eb)) = entries {
        if !ea.label_hash.is_empty() && ea.label_hash == eb.label_hash {
            return true;
        }
    }

    let shared = a
        .release
        .labels
        .iter()
        .any(|la| b.release.labels.iter().any(|lb| la.name == lb.name));
    if let (true, Some((ea, eb))) = (shared, entries) {
        if !ea.main_label.is_empty() && ea.main_label != eb.main_label {
            log::warn!(
                "{} and {} share a label but file under {} and {}",
                ea.instance_id,
                eb.instance_id,
                ea.main_label,
                eb.main_label
            );
        }
    }
    shared
}

#[derive(Debug, Default)]
pub struct Collapsed {
    /// Sequence with each run replaced by its anchor carrying the run's width.
    pub units: Vec<PackUnit>,
    /// Anchor id to every member of its run, anchor first.
    pub groups: HashMap<InstanceId, Vec<PackUnit>>,
    /// `hard_gaps` renumbered against `units`.
    pub hard_gaps: BTreeSet<usize>,
}

/// Merge runs of records that label-match the run's first record.
///
/// A run never spans a hard gap.
pub fn collapse(
    units: Vec<PackUnit>,
    hard_gaps: &BTreeSet<usize>,
    cache: &SortingCache,
) -> Collapsed {
    let mut out = Collapsed::default();
    let mut open: Option<(PackUnit, Vec<PackUnit>)> = None;

    let mut iter = units.into_iter().enumerate().peekable();
    while let Some((i, unit)) = iter.next() {
        let at_gap = hard_gaps.contains(&i);

        if let Some((anchor, members)) = open.as_mut() {
            if !at_gap && label_match(&anchor.record, &unit.record, cache) {
                anchor.width += unit.width;
                members.push(unit);
                continue;
            }
        }
        if let Some((anchor, members)) = open.take() {
            out.groups.insert(anchor.record.instance_id(), members);
            out.units.push(anchor);
        }

        if at_gap {
            out.hard_gaps.insert(out.units.len());
        }

        let starts_run = iter
            .peek()
            .is_some_and(|(j, next)| {
                !hard_gaps.contains(j) && label_match(&unit.record, &next.record, cache)
            });
        if starts_run {
            open = Some((unit.clone(), vec![unit]));
        } else {
            out.units.push(unit);
        }
    }

    if let Some((anchor, members)) = open {
        out.groups.insert(anchor.record.instance_id(), members);
        out.units.push(anchor);
    }

    log::debug!("Collapsed {} groups", out.groups.len());
    out
}

/// Replace every anchor with the members of its run, in recorded order.
pub fn expand(units: Vec<PackUnit>, groups: &mut HashMap<InstanceId, Vec<PackUnit>>) -> Vec<PackUnit> {
    let mut out = Vec::with_capacity(units.len());
    for unit in units {
        match groups.remove(&unit.record.instance_id()) {
            Some(members) => out.extend(members),
            None => out.push(unit),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fake::record;
    use crate::db::models::Label;

    fn unit(id: i32, label: &str, width: f32) -> PackUnit {
        PackUnit { record: record(id, &format!("t{id}"), label, "1"), width }
    }

    fn ids(units: &[PackUnit]) -> Vec<i32> {
        units.iter().map(|u| u.record.instance_id()).collect()
    }

    #[test]
    fn test_collapse_same_label_run() {
        let units = vec![
            unit(1234, "Hudson", 123.0),
            unit(1235, "Hudson", 234.0),
            unit(1236, "Magic", 125.0),
        ];
        let mut collapsed = collapse(units, &BTreeSet::new(), &SortingCache::default());
        assert_eq!(collapsed.units.len(), 2);
        assert_eq!(collapsed.units[0].width, 357.0);
        assert_eq!(ids(&collapsed.groups[&1234]), vec![1234, 1235]);

        let expanded = expand(collapsed.units, &mut collapsed.groups);
        assert_eq!(ids(&expanded), vec![1234, 1235, 1236]);
        assert_eq!(expanded[0].width, 123.0);
    }

    #[test]
    fn test_trailing_run_is_kept() {
        let units = vec![
            unit(1, "Magic", 1.0),
            unit(2, "Hudson", 2.0),
            unit(3, "Hudson", 3.0),
        ];
        let mut collapsed = collapse(units, &BTreeSet::new(), &SortingCache::default());
        assert_eq!(ids(&collapsed.units), vec![1, 2]);
        assert_eq!(collapsed.units[1].width, 5.0);
        assert_eq!(ids(&expand(collapsed.units, &mut collapsed.groups)), vec![1, 2, 3]);
    }

    #[test]
    fn test_members_match_anchor_not_neighbour() {
        let a = unit(1, "X", 1.0);
        let mut b = unit(2, "X", 1.0);
        b.record.release.labels.push(Label { id: 2, name: "Y".into(), catno: "2".into() });
        let c = unit(3, "Y", 1.0);

        let collapsed = collapse(vec![a, b, c], &BTreeSet::new(), &SortingCache::default());
        assert_eq!(ids(&collapsed.units), vec![1, 3]);
    }

    #[test]
    fn test_cached_label_hash_matches() {
        let mut a = unit(1, "Hudson", 1.0);
        let mut b = unit(2, "Magic", 1.0);
        let mut cache = SortingCache::default();
        cache.refresh(&a.record);
        let mut relabelled = b.record.clone();
        relabelled.release.labels = a.record.release.labels.clone();
        cache.refresh(&relabelled);

        a.record.release.labels.clear();
        b.record.release.labels.clear();
        assert!(label_match(&a.record, &b.record, &cache));
        assert!(!label_match(&a.record, &b.record, &SortingCache::default()));

        let collapsed = collapse(vec![a, b], &BTreeSet::new(), &cache);
        assert_eq!(ids(&collapsed.units), vec![1]);
    }

    #[test]
    fn test_run_does_not_cross_hard_gap() {
        let units = vec![
            unit(1, "Other", 1.0),
            unit(2, "Hudson", 1.0),
            unit(3, "Hudson", 1.0),
            unit(4, "Hudson", 1.0),
            unit(5, "Hudson", 1.0),
        ];
        let gaps = BTreeSet::from([3]);
        let mut collapsed = collapse(units, &gaps, &SortingCache::default());
        assert_eq!(ids(&collapsed.units), vec![1, 2, 4]);
        assert_eq!(collapsed.hard_gaps, BTreeSet::from([2]));
        assert_eq!(
            ids(&expand(collapsed.units, &mut collapsed.groups)),
            vec![1, 2, 3, 4, 5]
        );
    }

    #[test]
    fn test_expand_preserves_sequence() {
        let labels = ["A", "A", "B", "C", "C", "C", "A", "D"];
        let units: Vec<_> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| unit(i as i32, l, 1.0))
            .collect();
        let before = ids(&units);
        let mut collapsed = collapse(units, &BTreeSet::new(), &SortingCache::default());
        assert_eq!(collapsed.units.len(), 5);
        assert_eq!(ids(&expand(collapsed.units, &mut collapsed.groups)), before);
    }
}
