use std::collections::BTreeMap;

use serde::Serialize;

use super::{OrgError, Organiser, Result};
use crate::catalog::RecordUpdate;
use crate::db::models::{FolderId, InstanceId, Location, Quota, Record};
use crate::sales::{SaleOrder, uniform_scores};
use crate::sorting::sort_records;
use crate::split::WidthModel;

/// Which location a quota check is for.
#[derive(Debug, Clone, Default)]
pub struct QuotaQuery {
    pub name: Option<String>,
    pub folder_id: Option<FolderId>,
    pub include_records: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub location: String,
    pub over_quota: bool,
    pub spill_folder: FolderId,
    pub quota: Option<Quota>,
    pub instance_ids: Vec<InstanceId>,
}

impl Organiser {
    fn sell(&self, id: InstanceId) -> Result<()> {
        log::info!("Nominating {id} for sale");
        self.mutation.update_record(&RecordUpdate::prepare_to_sell(id))?;
        Ok(())
    }

    /// Placed records, least valuable first.
    fn ranked(&self, ids: &[InstanceId]) -> Result<Vec<Record>> {
        let mut records = self.fetch_records(ids)?.records;
        sort_records(&mut records, &SaleOrder);
        Ok(records)
    }

    fn placed_ids(location: &Location) -> Vec<InstanceId> {
        location.releases_location.iter().map(|p| p.instance_id).collect()
    }

    /// Nominate records for sale until `location` is back within its quota.
    /// Returns the nominated instance ids.
    pub fn mark_over_quota(&self, location: &mut Location) -> Result<Vec<InstanceId>> {
        match location.quota {
            Some(Quota::Slots { slots }) => self.process_slot_quota(location, slots),
            Some(Quota::AbsoluteWidth { width }) => self.process_absolute_width_quota(location, width),
            Some(Quota::SlotWidth { width }) => self.process_width_quota(location, width),
            Some(Quota::NumOfSlots { count }) => self.process_quota(location, count),
            None => Err(OrgError::InvalidArgument(format!(
                "No quota specified for {}",
                location.name
            ))),
        }
    }

    fn process_slot_quota(&self, location: &Location, limit: i32) -> Result<Vec<InstanceId>> {
        if location.max_slot() <= limit {
            return Ok(Vec::new());
        }

        let records = self.ranked(&Self::placed_ids(location))?;
        if records.len() > 1 && uniform_scores(&records) && !location.no_alert {
            self.alerter.raise(
                "Slot Stocked",
                &format!("{} is over {limit} slots and every record scores the same", location.name),
            );
        }

        match records
            .iter()
            .find(|r| self.settings.eligibility.is_candidate(r, location))
        {
            Some(r) => {
                self.sell(r.instance_id())?;
                Ok(vec![r.instance_id()])
            }
            None => Ok(Vec::new()),
        }
    }

    fn process_absolute_width_quota(&self, location: &Location, limit: f32) -> Result<Vec<InstanceId>> {
        let total: f32 = location.releases_location.iter().map(|p| p.determined_width).sum();
        if total <= limit {
            return Ok(Vec::new());
        }
        log::info!("{} holds {total} against a limit of {limit}", location.name);

        let records = self.ranked(&Self::placed_ids(location))?;
        match records.iter().find(|r| self.settings.eligibility.is_countable(r)) {
            Some(r) => {
                self.sell(r.instance_id())?;
                Ok(vec![r.instance_id()])
            }
            None => Ok(Vec::new()),
        }
    }

    /// Trim every slot back to `budget`, cheapest records first.
    fn process_width_quota(&self, location: &Location, budget: f32) -> Result<Vec<InstanceId>> {
        let mut sold = Vec::new();
        for slot in 0..=location.slots {
            let placed: BTreeMap<InstanceId, f32> = location
                .releases_location
                .iter()
                .filter(|p| p.slot == slot)
                .map(|p| (p.instance_id, p.determined_width))
                .collect();
            let mut total: f32 = placed.values().sum();
            if total <= budget {
                continue;
            }

            let ids: Vec<InstanceId> = placed.keys().copied().collect();
            for record in self.ranked(&ids)? {
                if total <= budget {
                    break;
                }
                let Some(width) = placed.get(&record.instance_id()).copied() else {
                    log::warn!("Catalog answered with unplaced record {}", record.instance_id());
                    continue;
                };
                if !self.settings.eligibility.is_countable(&record) {
                    continue;
                }
                self.sell(record.instance_id())?;
                total -= width;
                sold.push(record.instance_id());
            }
        }
        Ok(sold)
    }

    /// Legacy count quota: sell down to `count` placed records.
    fn process_quota(&self, location: &mut Location, count: i32) -> Result<Vec<InstanceId>> {
        location.over_quota_time = 0;

        let placed = location.releases_location.len();
        let limit = count.max(0) as usize;
        if placed <= limit {
            return Ok(Vec::new());
        }

        let records: Vec<Record> = self
            .ranked(&Self::placed_ids(location))?
            .into_iter()
            .filter(|r| self.settings.eligibility.is_candidate(r, location))
            .collect();

        let mut sold = Vec::new();
        for record in records.iter().take(placed - limit) {
            self.sell(record.instance_id())?;
            sold.push(record.instance_id());
        }
        Ok(sold)
    }

    /// Sum of shelf widths, refusing to guess when a width is missing.
    fn measured_width(&self, location: &Location, records: &[Record]) -> Result<f32> {
        if let Some(r) = records.iter().find(|r| r.metadata.record_width <= 0.0) {
            self.alerter.raise(
                "Missing Spine Width",
                &format!("{} ({}) in {} has no width", r.title(), r.instance_id(), location.name),
            );
            return Err(OrgError::FailedPrecondition(format!(
                "Record {} has no width",
                r.instance_id()
            )));
        }
        let widths = WidthModel::new(self.settings.sleeves, self.settings.default_width);
        Ok(records.iter().map(|r| widths.effective(r)).sum())
    }

    /// Report whether a location is over its quota.
    pub fn get_quota(&self, query: &QuotaQuery) -> Result<QuotaStatus> {
        let mut org = self.load_org()?;
        let idx = org
            .locations
            .iter()
            .position(|l| match (&query.name, query.folder_id) {
                (Some(name), _) if !name.is_empty() => l.name == *name,
                (_, Some(folder)) => l.tracks_folder(folder),
                _ => false,
            })
            .ok_or_else(|| OrgError::InvalidArgument(format!("Unable to locate quota for {query:?}")))?;
        let location = &org.locations[idx];

        let ids = self.catalog.instance_ids(&location.folder_ids)?;
        let records: Vec<Record> = self
            .fetch_records(&ids)?
            .records
            .into_iter()
            .filter(|r| self.settings.eligibility.is_countable(r))
            .collect();

        let over_quota = match location.quota {
            Some(Quota::NumOfSlots { count }) => records.len() > count.max(0) as usize,
            Some(Quota::Slots { slots }) => location.max_slot() > slots,
            Some(Quota::AbsoluteWidth { width }) => self.measured_width(location, &records)? > width,
            Some(Quota::SlotWidth { width }) => {
                self.measured_width(location, &records)?;
                let mut per_slot: BTreeMap<i32, f32> = BTreeMap::new();
                for p in &location.releases_location {
                    *per_slot.entry(p.slot).or_default() += p.determined_width;
                }
                per_slot.values().any(|w| *w > width)
            }
            None => {
                return Err(OrgError::InvalidArgument(format!(
                    "No quota specified for {}",
                    location.name
                )));
            }
        };

        let status = QuotaStatus {
            location: location.name.clone(),
            over_quota,
            spill_folder: location.spill_folder,
            quota: location.quota,
            instance_ids: if query.include_records {
                records.iter().map(|r| r.instance_id()).collect()
            } else {
                Vec::new()
            },
        };

        if over_quota {
            let location = &mut org.locations[idx];
            if !location.no_alert {
                self.alerter.raise("Quota Problem", &format!("{} is over quota", location.name));
            }
            if location.over_quota_time == 0 {
                location.over_quota_time = Self::now();
                self.db.save_organisation(&org)?;
            }
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fake::record;
    use crate::db::models::{BoxState, Category, KeepState, PlayState, ReleasePlacement};
    use crate::organiser::tests::{harness, shelf};

    fn placed(slot: i32, id: InstanceId, width: f32) -> ReleasePlacement {
        ReleasePlacement {
            slot,
            index: 1,
            instance_id: id,
            title: format!("t{id}"),
            determined_width: width,
        }
    }

    fn sold(h: &crate::organiser::tests::Harness) -> Vec<InstanceId> {
        h.catalog.updates().iter().map(|u| u.instance_id).collect()
    }

    fn rated(id: InstanceId, rating: i32) -> Record {
        let mut r = record(id, &format!("t{id}"), "L", "1");
        r.release.rating = rating;
        r
    }

    #[test]
    fn test_legacy_count_quota_sells_lowest_ranked() {
        let h = harness();
        h.catalog.add(10, rated(1, 5));
        h.catalog.add(10, rated(2, 2));

        let mut loc = shelf("Singles", &[10]);
        loc.quota = Some(Quota::NumOfSlots { count: 1 });
        loc.over_quota_time = 12345;
        loc.releases_location = vec![placed(1, 1, 3.0), placed(1, 2, 3.0)];

        let nominated = h.org.mark_over_quota(&mut loc).unwrap();
        assert_eq!(nominated, vec![2]);
        assert_eq!(sold(&h), vec![2]);
        assert_eq!(loc.over_quota_time, 0);

        let update = &h.catalog.updates()[0];
        assert_eq!(update.category, Some(Category::PrepareToSell));
        assert_eq!(update.reason, "org-prepare-to-sell");
    }

    #[test]
    fn test_slot_quota_skips_boxed_and_foreign() {
        let h = harness();
        let mut boxed = rated(1, 1);
        boxed.metadata.box_state = BoxState::InTheBox;
        h.catalog.add(10, boxed);
        h.catalog.add(99, rated(2, 2));
        h.catalog.add(10, rated(3, 3));
        let mut keeper = rated(4, 1);
        keeper.metadata.keep = KeepState::Keeper;
        h.catalog.add(10, keeper);

        let mut loc = shelf("Singles", &[10]);
        loc.quota = Some(Quota::Slots { slots: 1 });
        loc.releases_location = vec![
            placed(1, 1, 1.0),
            placed(1, 2, 1.0),
            placed(2, 3, 1.0),
            placed(2, 4, 1.0),
        ];

        assert_eq!(h.org.mark_over_quota(&mut loc).unwrap(), vec![3]);
        assert!(h.alerts.titles().is_empty());
    }

    #[test]
    fn test_slot_quota_within_limit_is_noop() {
        let h = harness();
        let mut loc = shelf("Singles", &[10]);
        loc.quota = Some(Quota::Slots { slots: 2 });
        loc.releases_location = vec![placed(2, 1, 1.0)];
        assert!(h.org.mark_over_quota(&mut loc).unwrap().is_empty());
        assert_eq!(h.catalog.record_fetches(), 0);
    }

    #[test]
    fn test_stocked_slot_alert() {
        let h = harness();
        h.catalog.add(10, rated(1, 3));
        h.catalog.add(10, rated(2, 3));
        let mut loc = shelf("Singles", &[10]);
        loc.quota = Some(Quota::Slots { slots: 1 });
        loc.releases_location = vec![placed(1, 1, 1.0), placed(2, 2, 1.0)];

        assert_eq!(h.org.mark_over_quota(&mut loc).unwrap(), vec![1]);
        assert_eq!(h.alerts.titles(), vec!["Slot Stocked".to_string()]);
    }

    #[test]
    fn test_all_filtered_is_noop() {
        let h = harness();
        let mut r = rated(1, 1);
        r.metadata.category = Category::Sold;
        h.catalog.add(10, r);
        let mut loc = shelf("Singles", &[10]);
        loc.quota = Some(Quota::AbsoluteWidth { width: 1.0 });
        loc.releases_location = vec![placed(1, 1, 5.0)];
        assert!(h.org.mark_over_quota(&mut loc).unwrap().is_empty());
        assert!(h.catalog.updates().is_empty());
    }

    #[test]
    fn test_absolute_width_sells_one() {
        let h = harness();
        h.catalog.add(10, rated(1, 4));
        h.catalog.add(10, rated(2, 1));
        let mut loc = shelf("Singles", &[10]);
        loc.quota = Some(Quota::AbsoluteWidth { width: 10.0 });
        loc.releases_location = vec![placed(1, 1, 6.0), placed(1, 2, 6.0)];
        assert_eq!(h.org.mark_over_quota(&mut loc).unwrap(), vec![2]);
    }

    #[test]
    fn test_width_quota_trims_each_slot() {
        let h = harness();
        for (id, rating) in [(1, 5), (2, 1), (3, 2), (4, 3), (5, 4)] {
            h.catalog.add(10, rated(id, rating));
        }
        let mut loc = shelf("Singles", &[10]);
        loc.slots = 2;
        loc.quota = Some(Quota::SlotWidth { width: 10.0 });
        loc.releases_location = vec![
            placed(1, 1, 6.0),
            placed(1, 2, 6.0),
            placed(1, 3, 6.0),
            placed(2, 4, 6.0),
            placed(2, 5, 3.0),
        ];

        assert_eq!(h.org.mark_over_quota(&mut loc).unwrap(), vec![2, 3]);
        assert_eq!(sold(&h), vec![2, 3]);
    }

    #[test]
    fn test_width_quota_skips_mismatched_answers() {
        let h = harness();
        h.catalog.add(10, rated(1, 3));
        h.catalog.serve_as(2, rated(9, 1));
        let mut loc = shelf("Singles", &[10]);
        loc.slots = 1;
        loc.quota = Some(Quota::SlotWidth { width: 10.0 });
        loc.releases_location = vec![placed(1, 1, 6.0), placed(1, 2, 6.0)];

        assert_eq!(h.org.mark_over_quota(&mut loc).unwrap(), vec![1]);
        assert_eq!(sold(&h), vec![1]);
    }

    #[test]
    fn test_mutation_failure_propagates() {
        let h = harness();
        h.catalog.add(10, rated(1, 1));
        h.catalog.fail_updates();
        let mut loc = shelf("Singles", &[10]);
        loc.quota = Some(Quota::AbsoluteWidth { width: 1.0 });
        loc.releases_location = vec![placed(1, 1, 5.0)];
        assert!(matches!(
            h.org.mark_over_quota(&mut loc),
            Err(OrgError::Catalog(_))
        ));
    }

    #[test]
    fn test_missing_quota_is_invalid() {
        let h = harness();
        let mut loc = shelf("Singles", &[10]);
        loc.quota = None;
        assert!(matches!(
            h.org.mark_over_quota(&mut loc),
            Err(OrgError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_get_quota_unknown_location() {
        let h = harness();
        h.org.add_location(shelf("Singles", &[10])).unwrap();
        let query = QuotaQuery { name: Some("Nowhere".into()), ..Default::default() };
        assert!(matches!(h.org.get_quota(&query), Err(OrgError::InvalidArgument(_))));
        let query = QuotaQuery { folder_id: Some(77), ..Default::default() };
        assert!(matches!(h.org.get_quota(&query), Err(OrgError::InvalidArgument(_))));
    }

    #[test]
    fn test_get_quota_count_over_and_listing() {
        let h = harness();
        for id in 1..=3 {
            h.catalog.add(10, rated(id, 3));
        }
        let mut loc = shelf("Singles", &[10]);
        loc.quota = Some(Quota::NumOfSlots { count: 5 });
        loc.spill_folder = 44;
        h.org.add_location(loc).unwrap();
        h.org
            .update_location(
                "Singles",
                crate::organiser::LocationChange::Update(crate::organiser::LocationPatch {
                    quota: Some(Quota::NumOfSlots { count: 2 }),
                    ..Default::default()
                }),
            )
            .unwrap();

        let query = QuotaQuery { folder_id: Some(10), include_records: true, ..Default::default() };
        let status = h.org.get_quota(&query).unwrap();
        assert!(status.over_quota);
        assert_eq!(status.spill_folder, 44);
        assert_eq!(status.instance_ids, vec![1, 2, 3]);
        assert!(h.alerts.titles().contains(&"Quota Problem".to_string()));

        let stamped = h.org.locate(crate::organiser::LocateQuery::Folder(10)).unwrap();
        assert!(stamped.over_quota_time > 0);
    }

    #[test]
    fn test_get_quota_missing_width_fails() {
        let h = harness();
        let mut r = rated(1, 3);
        r.metadata.record_width = 0.0;
        h.catalog.add(10, r);
        let mut loc = shelf("Singles", &[10]);
        loc.quota = Some(Quota::AbsoluteWidth { width: 100.0 });
        loc.in_play = PlayState::InPlay;
        h.org.add_location(loc).unwrap();

        let query = QuotaQuery { name: Some("Singles".into()), ..Default::default() };
        assert!(matches!(
            h.org.get_quota(&query),
            Err(OrgError::FailedPrecondition(_))
        ));
        assert!(h.alerts.titles().contains(&"Missing Spine Width".to_string()));
    }

    #[test]
    fn test_get_quota_width_within_limit() {
        let h = harness();
        let mut r = rated(1, 3);
        r.metadata.record_width = 5.0;
        r.metadata.sleeve = crate::db::models::Sleeve::Standard;
        h.catalog.add(10, r);
        let mut loc = shelf("Singles", &[10]);
        loc.quota = Some(Quota::AbsoluteWidth { width: 100.0 });
        h.org.add_location(loc).unwrap();

        let query = QuotaQuery { name: Some("Singles".into()), ..Default::default() };
        let status = h.org.get_quota(&query).unwrap();
        assert!(!status.over_quota);
        assert!(status.instance_ids.is_empty());
    }
}
