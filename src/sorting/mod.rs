pub mod label;

use std::cmp::Ordering;

use crate::cache::{BY_DATE_ADDED, CacheEntry, SortingCache};
use crate::db::models::{Record, SortStrategy};

pub use label::{CachedLabelCatalogue, ExtractorSet, LabelCatalogue};

/// A total order over records.
pub trait RecordOrdering {
    fn compare(&self, a: &Record, b: &Record) -> Ordering;
}

fn then_title(primary: Ordering, a: &Record, b: &Record) -> Ordering {
    primary.then_with(|| a.title().cmp(b.title()))
}

pub struct DateAdded;

impl RecordOrdering for DateAdded {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        then_title(a.metadata.date_added.cmp(&b.metadata.date_added), a, b)
    }
}

/// Date-added order read from the cache's padded keys.
pub struct CachedDateAdded<'a> {
    cache: &'a SortingCache,
}

impl<'a> CachedDateAdded<'a> {
    pub fn new(cache: &'a SortingCache) -> Self {
        Self { cache }
    }

    fn key(&self, r: &Record) -> String {
        match self.cache.get(r.instance_id()) {
            Some(entry) => entry.key(BY_DATE_ADDED).to_string(),
            None => CacheEntry::build(r).key(BY_DATE_ADDED).to_string(),
        }
    }
}

impl RecordOrdering for CachedDateAdded<'_> {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        then_title(self.key(a).cmp(&self.key(b)), a, b)
    }
}

pub struct ReleaseDate;

impl RecordOrdering for ReleaseDate {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        then_title(
            a.release.earliest_release_date.cmp(&b.release.earliest_release_date),
            a,
            b,
        )
    }
}

pub struct MoveTime;

impl RecordOrdering for MoveTime {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        then_title(a.metadata.last_move_time.cmp(&b.metadata.last_move_time), a, b)
    }
}

pub struct LastListen;

impl RecordOrdering for LastListen {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        then_title(a.metadata.last_listen_time.cmp(&b.metadata.last_listen_time), a, b)
    }
}

pub struct InstanceOrder;

impl RecordOrdering for InstanceOrder {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        then_title(a.instance_id().cmp(&b.instance_id()), a, b)
    }
}

/// Home folder first, then release date.
pub struct FolderThenDate;

impl RecordOrdering for FolderThenDate {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let primary = a
            .release
            .folder_id
            .cmp(&b.release.folder_id)
            .then_with(|| a.release.earliest_release_date.cmp(&b.release.earliest_release_date));
        then_title(primary, a, b)
    }
}

/// The ordering a folder configured with `strategy` is laid out in.
pub fn ordering(strategy: SortStrategy, extractors: &ExtractorSet) -> Box<dyn RecordOrdering + '_> {
    match strategy {
        SortStrategy::ByLabelCatno => Box::new(LabelCatalogue::new(extractors)),
        SortStrategy::ByDateAdded => Box::new(DateAdded),
        SortStrategy::ByReleaseDate => Box::new(ReleaseDate),
        SortStrategy::ByMoveTime => Box::new(MoveTime),
        SortStrategy::ByLastListen => Box::new(LastListen),
        SortStrategy::ByFolderThenDate => Box::new(FolderThenDate),
        SortStrategy::ByIid => Box::new(InstanceOrder),
    }
}

/// Stable sort of `records` under `order`.
pub fn sort_records(records: &mut [Record], order: &dyn RecordOrdering) {
    records.sort_by(|a, b| order.compare(a, b));
}
