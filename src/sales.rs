use std::cmp::Ordering;

use crate::db::models::{Category, Location, Record};
use crate::sorting::RecordOrdering;

/// Rating when the record has one, otherwise the computed score.
pub fn sale_score(record: &Record) -> f32 {
    let score = if record.release.rating != 0 {
        record.release.rating as f32
    } else {
        record.metadata.overall_score
    };
    if score.is_nan() { 0.0 } else { score }
}

/// Least valuable first: non-keepers, low score, cheap, newest release, title.
pub struct SaleOrder;

impl RecordOrdering for SaleOrder {
    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        a.is_keeper()
            .cmp(&b.is_keeper())
            .then_with(|| sale_score(a).total_cmp(&sale_score(b)))
            .then_with(|| a.metadata.current_sale_price.cmp(&b.metadata.current_sale_price))
            .then_with(|| b.release.released.cmp(&a.release.released))
            .then_with(|| a.title().cmp(b.title()))
    }
}

/// True when every record carries the same sale score.
pub fn uniform_scores(records: &[Record]) -> bool {
    records
        .windows(2)
        .all(|w| sale_score(&w[0]).total_cmp(&sale_score(&w[1])).is_eq())
}

/// Whether a record may be counted against, and sold from, a location.
#[derive(Debug, Clone)]
pub struct QuotaEligibility {
    excluded: Vec<Category>,
}

impl Default for QuotaEligibility {
    fn default() -> Self {
        Self::new(Category::SALE_PIPELINE.to_vec())
    }
}

impl QuotaEligibility {
    pub fn new(excluded: Vec<Category>) -> Self {
        Self { excluded }
    }

    /// Still on the shelf and not already on its way out.
    pub fn is_countable(&self, record: &Record) -> bool {
        !record.is_boxed() && !self.excluded.contains(&record.metadata.category)
    }

    /// Countable and filed in one of the location's own folders.
    pub fn is_candidate(&self, record: &Record, location: &Location) -> bool {
        self.is_countable(record) && location.tracks_folder(record.release.folder_id)
    }
}
