use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use rayon::prelude::*;

use super::{Organiser, Result};
use crate::cache::SortingCache;
use crate::catalog::CatalogError;
use crate::collapse::{collapse, expand};
use crate::db::models::{InstanceId, Location, Quota, Record, ReleasePlacement, SortStrategy};
use crate::sorting::label::misalignments;
use crate::sorting::{
    CachedDateAdded, CachedLabelCatalogue, ExtractorSet, RecordOrdering, ordering, sort_records,
};
use crate::split::{PackUnit, SlotPlan, WidthModel, median_width, split};

/// Records fetched for one batch of instance ids.
#[derive(Debug, Default)]
pub struct FetchBatch {
    /// Fetched records, in request order. Departed records are left out.
    pub records: Vec<Record>,
    /// Earliest non-zero last-listen time in the batch.
    pub oldest_listen: Option<i64>,
}

impl Organiser {
    /// Fetch every record in parallel, at most `concurrency` at a time.
    ///
    /// All fetches run to completion; the first failure (other than a record
    /// that no longer exists) is then returned.
    pub fn fetch_records(&self, ids: &[InstanceId]) -> Result<FetchBatch> {
        let catalog = self.catalog.as_ref();
        let oldest = AtomicI64::new(i64::MAX);
        let first_error: Mutex<Option<CatalogError>> = Mutex::new(None);

        let fetched: Vec<Option<Record>> = self.pool.install(|| {
            ids.par_iter()
                .map(|id| match catalog.record(*id) {
                    Ok(record) => {
                        let listened = record.metadata.last_listen_time;
                        if listened > 0 {
                            oldest.fetch_min(listened, Ordering::Relaxed);
                        }
                        Some(record)
                    }
                    Err(CatalogError::Gone(id)) => {
                        log::debug!("Skipping {id}: no longer in the collection");
                        None
                    }
                    Err(e) => {
                        log::warn!("Fetch of {id} failed: {e}");
                        if let Ok(mut slot) = first_error.lock() {
                            slot.get_or_insert(e);
                        }
                        None
                    }
                })
                .collect()
        });

        let first_error = first_error.into_inner().unwrap_or_else(|p| p.into_inner());
        if let Some(e) = first_error {
            return Err(e.into());
        }

        let oldest = oldest.into_inner();
        Ok(FetchBatch {
            records: fetched.into_iter().flatten().collect(),
            oldest_listen: (oldest != i64::MAX).then_some(oldest),
        })
    }

    /// Re-lay `location` from the catalog's current contents.
    ///
    /// The placement is only replaced once the quota step succeeds. Returns the
    /// number of packing units (after collapsing) laid out.
    pub fn organise(
        &self,
        location: &mut Location,
        extractors: &ExtractorSet,
        cache: &mut SortingCache,
    ) -> Result<usize> {
        let mut sequence: Vec<Record> = Vec::new();
        let mut hard_gaps = BTreeSet::new();
        let mut oldest_listen: Option<i64> = None;

        for tier in location.tiers() {
            if tier.hard_gap && !sequence.is_empty() {
                hard_gaps.insert(sequence.len());
            }

            let ids = self.catalog.instance_ids(&tier.folders)?;
            let batch = self.fetch_records(&ids)?;
            oldest_listen = match (oldest_listen, batch.oldest_listen) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            for record in &batch.records {
                cache.refresh(record);
            }

            let mut records = batch.records;
            sort_records(&mut records, ordering(tier.strategy, extractors).as_ref());
            let cached: Option<Box<dyn RecordOrdering + '_>> = match tier.strategy {
                SortStrategy::ByLabelCatno => Some(Box::new(CachedLabelCatalogue::new(cache))),
                SortStrategy::ByDateAdded => Some(Box::new(CachedDateAdded::new(cache))),
                _ => None,
            };
            if let Some(cached) = cached {
                let off = misalignments(&records, cached.as_ref());
                if off > 0 {
                    log::warn!(
                        "{}: cached {:?} order disagrees at {off} positions in tier {}",
                        location.name,
                        tier.strategy,
                        tier.order
                    );
                }
            }
            sequence.extend(records);
        }

        if let Some(ts) = oldest_listen {
            log::info!("{}: oldest listen at {ts}", location.name);
        }

        let fallback = median_width(sequence.iter().map(|r| r.metadata.record_width))
            .unwrap_or(self.settings.default_width);
        let widths = WidthModel::new(self.settings.sleeves, fallback);
        let units: Vec<PackUnit> = sequence
            .into_iter()
            .map(|record| PackUnit { width: widths.effective(&record), record })
            .collect();

        let (units, mut groups, hard_gaps) = if location.combine_similar {
            let c = collapse(units, &hard_gaps, cache);
            (c.units, c.groups, c.hard_gaps)
        } else {
            (units, HashMap::new(), hard_gaps)
        };
        let processed = units.len();

        let plan = SlotPlan {
            slots: location.slots,
            max_width: match location.quota {
                Some(Quota::SlotWidth { width }) => width,
                _ => 0.0,
            },
            hard_gaps,
            allow_adjust: location.allow_adjust,
        };

        let mut placements = Vec::new();
        for (slot_idx, slot) in split(units, &plan, |u| u.width).into_iter().enumerate() {
            for (i, unit) in expand(slot, &mut groups).into_iter().enumerate() {
                placements.push(ReleasePlacement {
                    slot: slot_idx as i32 + 1,
                    index: i as i32 + 1,
                    instance_id: unit.record.instance_id(),
                    title: unit.record.release.title,
                    determined_width: unit.width,
                });
            }
        }

        let mut candidate = location.clone();
        candidate.releases_location = placements;
        if candidate.quota.is_some() {
            let sold = self.mark_over_quota(&mut candidate)?;
            if !sold.is_empty() {
                log::info!("{}: nominated {:?} for sale", candidate.name, sold);
            }
        } else if !candidate.no_alert {
            self.alerter
                .raise("Missing quota", &format!("{} has no quota", candidate.name));
        }

        log::info!(
            "Organised {}: {} units over {} slots",
            candidate.name,
            processed,
            candidate.max_slot()
        );
        *location = candidate;
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fake::record;
    use crate::db::models::{PlayState, Sleeve};
    use crate::organiser::OrgError;
    use crate::organiser::tests::harness;

    fn shelf(folders: &[i32]) -> Location {
        Location {
            name: "Shelf".into(),
            folder_ids: folders.to_vec(),
            in_play: PlayState::InPlay,
            quota: Some(Quota::Slots { slots: 100 }),
            ..Default::default()
        }
    }

    fn sized(id: i32, title: &str, label: &str, catno: &str, width: f32) -> Record {
        let mut r = record(id, title, label, catno);
        r.metadata.record_width = width;
        r.metadata.sleeve = Sleeve::Standard;
        r
    }

    fn layout(loc: &Location) -> Vec<(i32, i32, i32)> {
        loc.releases_location
            .iter()
            .map(|p| (p.slot, p.index, p.instance_id))
            .collect()
    }

    #[test]
    fn test_fetch_skips_gone_and_tracks_oldest_listen() {
        let h = harness();
        for id in 1..=20 {
            let mut r = record(id, "t", "L", "1");
            r.metadata.last_listen_time = 1000 + id as i64;
            h.catalog.add(1, r);
        }
        h.catalog.forget(7);

        let ids: Vec<i32> = (1..=20).collect();
        let batch = h.org.fetch_records(&ids).unwrap();
        assert_eq!(batch.records.len(), 19);
        assert_eq!(batch.records[0].instance_id(), 1);
        assert_eq!(batch.oldest_listen, Some(1001));
    }

    #[test]
    fn test_fetch_fails_late() {
        let h = harness();
        for id in 1..=10 {
            h.catalog.add(1, record(id, "t", "L", "1"));
        }
        h.catalog.break_record(3);

        let ids: Vec<i32> = (1..=10).collect();
        let err = h.org.fetch_records(&ids).unwrap_err();
        assert!(matches!(err, OrgError::Catalog(CatalogError::Transport(_))));
        assert_eq!(h.catalog.record_fetches(), 10);
    }

    #[test]
    fn test_fetch_error_leaves_placement_untouched() {
        let h = harness();
        h.catalog.add(1, record(1, "A", "L", "1"));
        let mut loc = shelf(&[1]);
        let mut cache = SortingCache::default();
        let extractors = ExtractorSet::default();
        h.org.organise(&mut loc, &extractors, &mut cache).unwrap();
        let before = loc.clone();

        h.catalog.add(1, record(2, "B", "L", "2"));
        h.catalog.break_record(2);
        assert!(h.org.organise(&mut loc, &extractors, &mut cache).is_err());
        assert_eq!(loc, before);
    }

    #[test]
    fn test_tiers_sorted_independently_with_hard_gap() {
        let h = harness();
        h.catalog.add(1, sized(1, "b", "Warp", "WARP 2", 10.0));
        h.catalog.add(1, sized(2, "a", "Warp", "WARP 1", 10.0));
        h.catalog.add(2, sized(3, "c", "Apple", "APPLE 9", 10.0));
        h.catalog.add(2, sized(4, "d", "Apple", "APPLE 10", 10.0));

        let mut loc = shelf(&[1, 2]);
        loc.folder_order.insert(1, 0);
        loc.folder_order.insert(2, 1);
        loc.hard_gaps.insert(2);

        let mut cache = SortingCache::default();
        let n = h.org.organise(&mut loc, &ExtractorSet::default(), &mut cache).unwrap();
        assert_eq!(n, 4);
        assert_eq!(
            layout(&loc),
            vec![(1, 1, 2), (1, 2, 1), (2, 1, 3), (2, 2, 4)]
        );
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_slot_width_budget_and_sleeves() {
        let h = harness();
        for id in 1..=5 {
            h.catalog.add(1, sized(id, &format!("{id}"), "Label", &format!("L {id}"), 40.0));
        }
        let mut loc = shelf(&[1]);
        loc.quota = Some(Quota::SlotWidth { width: 100.0 });
        loc.slots = 3;

        h.org.organise(&mut loc, &ExtractorSet::default(), &mut SortingCache::default()).unwrap();
        assert_eq!(
            layout(&loc),
            vec![(1, 1, 1), (1, 2, 2), (2, 1, 3), (2, 2, 4), (3, 1, 5)]
        );
        assert!(loc.releases_location.iter().all(|p| p.determined_width == 40.0));
    }

    #[test]
    fn test_unknown_widths_use_batch_median() {
        let h = harness();
        h.catalog.add(1, sized(1, "a", "L", "1", 2.0));
        h.catalog.add(1, sized(2, "b", "L", "2", 0.0));
        h.catalog.add(1, sized(3, "c", "L", "3", 6.0));
        h.catalog.add(1, sized(4, "d", "L", "4", 4.0));

        let mut loc = shelf(&[1]);
        h.org.organise(&mut loc, &ExtractorSet::default(), &mut SortingCache::default()).unwrap();
        let widths: Vec<f32> = loc.releases_location.iter().map(|p| p.determined_width).collect();
        assert_eq!(widths, vec![2.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_combine_similar_keeps_runs_together() {
        let h = harness();
        h.catalog.add(1, sized(1234, "x", "Hudson", "H 1", 60.0));
        h.catalog.add(1, sized(1235, "y", "Hudson", "H 2", 60.0));
        h.catalog.add(1, sized(1236, "z", "Magic", "M 1", 60.0));

        let mut loc = shelf(&[1]);
        loc.combine_similar = true;
        loc.quota = Some(Quota::SlotWidth { width: 150.0 });

        let n = h.org.organise(&mut loc, &ExtractorSet::default(), &mut SortingCache::default()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(layout(&loc), vec![(1, 1, 1234), (1, 2, 1235), (2, 1, 1236)]);
        assert_eq!(loc.releases_location[0].determined_width, 60.0);
    }

    #[test]
    fn test_missing_quota_alerts_but_succeeds() {
        let h = harness();
        h.catalog.add(1, record(1, "A", "L", "1"));
        let mut loc = shelf(&[1]);
        loc.quota = None;
        h.org.organise(&mut loc, &ExtractorSet::default(), &mut SortingCache::default()).unwrap();
        assert_eq!(loc.releases_location.len(), 1);
        assert_eq!(h.alerts.titles(), vec!["Missing quota".to_string()]);

        loc.no_alert = true;
        h.org.organise(&mut loc, &ExtractorSet::default(), &mut SortingCache::default()).unwrap();
        assert_eq!(h.alerts.titles().len(), 1);
    }
}
