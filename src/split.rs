use std::collections::BTreeSet;

use crate::config::SleevePolicy;
use crate::db::models::{Record, Sleeve};

/// Head room added to the balanced capacity of a run that ends at a hard gap.
const RUN_SLACK: f32 = 10.0;

/// Tolerance on a derived (total / slots) budget so float error cannot spill
/// the last record into an extra slot.
const DERIVED_BUDGET_TOLERANCE: f32 = 1.0001;

/// Converts stored spine widths into shelf widths.
#[derive(Debug, Clone, Copy)]
pub struct WidthModel {
    sleeves: SleevePolicy,
    fallback: f32,
}

impl WidthModel {
    pub fn new(sleeves: SleevePolicy, fallback: f32) -> Self {
        Self { sleeves, fallback }
    }

    /// Width adjusted for the sleeve, or the fallback when unmeasured.
    pub fn effective(&self, record: &Record) -> f32 {
        let width = record.metadata.record_width;
        if width <= 0.0 {
            return self.fallback;
        }
        match record.metadata.sleeve {
            Sleeve::VinylStorageDoubleFlap | Sleeve::BagsUnlimitedPlain => {
                width * self.sleeves.double_flap
            }
            Sleeve::SleeveUnknown => width * self.sleeves.unknown,
            Sleeve::VinylStorageNoInner => width * self.sleeves.no_inner,
            Sleeve::Standard | Sleeve::BoxSet => width,
        }
    }
}

/// Median of the positive widths, if any.
pub fn median_width(widths: impl IntoIterator<Item = f32>) -> Option<f32> {
    let mut known: Vec<f32> = widths.into_iter().filter(|w| *w > 0.0).collect();
    if known.is_empty() {
        return None;
    }
    known.sort_by(|a, b| a.total_cmp(b));
    Some(known[known.len() / 2])
}

/// A record travelling through collapse and packing with its shelf width.
#[derive(Debug, Clone, PartialEq)]
pub struct PackUnit {
    pub record: Record,
    pub width: f32,
}

/// Packing parameters for one location.
#[derive(Debug, Clone, Default)]
pub struct SlotPlan {
    /// Target slot count; used to derive a budget when `max_width` is unset.
    pub slots: i32,
    /// Per-slot width budget; zero or less when unset.
    pub max_width: f32,
    /// Sequence positions that always start a new slot.
    pub hard_gaps: BTreeSet<usize>,
    /// Pull a narrower record forward (up to 3 ahead) instead of closing a slot.
    pub allow_adjust: bool,
}

const LOOKAHEAD: usize = 3;

impl SlotPlan {
    fn budget(&self, total: f32) -> f32 {
        if self.max_width > 0.0 {
            self.max_width
        } else if self.slots > 0 && total > 0.0 {
            total / self.slots as f32 * DERIVED_BUDGET_TOLERANCE
        } else {
            f32::INFINITY
        }
    }

    fn gap_between(&self, from: usize, to: usize) -> bool {
        self.hard_gaps.range(from + 1..=to).next().is_some()
    }
}

/// Slots a first-fit pass over `widths` opens at `capacity`.
fn greedy_slots(widths: &[f32], capacity: f32) -> usize {
    let mut slots = 0;
    let mut filled = 0.0;
    for (i, w) in widths.iter().enumerate() {
        if i == 0 || filled + w > capacity {
            slots += 1;
            filled = 0.0;
        }
        filled += w;
    }
    slots
}

/// Per-slot capacity for a run closed by a hard gap.
///
/// The run is spread evenly over the slots it needs, unless the balanced
/// capacity would cost the run an extra slot over packing to the budget.
fn run_capacity(run: &[f32], budget: f32) -> f32 {
    let total: f32 = run.iter().sum();
    if !budget.is_finite() || total <= 0.0 {
        return budget;
    }
    let needed = (total / budget).ceil();
    let balanced = (total / needed + RUN_SLACK).min(budget);
    if greedy_slots(run, balanced) > greedy_slots(run, budget) {
        budget
    } else {
        balanced
    }
}

/// Partition `items` into slots, in order.
///
/// Every slot stays within its capacity except a slot holding a single record
/// that is wider than the budget on its own. Hard gaps always start a new slot,
/// even when that leaves an empty one behind.
pub fn split<T>(items: Vec<T>, plan: &SlotPlan, width_of: impl Fn(&T) -> f32) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }

    let widths: Vec<f32> = items.iter().map(&width_of).collect();
    let budget = plan.budget(widths.iter().sum());

    let mut capacities = Vec::new();
    let mut run_start = 0;
    for i in 0..widths.len() {
        if plan.hard_gaps.contains(&i) {
            capacities.push(run_capacity(&widths[run_start..i], budget));
            run_start = i;
        }
    }
    capacities.push(budget);

    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut slots: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut filled = 0.0;
    let mut cap_idx = 0;

    for pos in 0..order.len() {
        if plan.hard_gaps.contains(&pos) {
            slots.push(std::mem::take(&mut current));
            filled = 0.0;
            cap_idx += 1;
        }
        let capacity = capacities[cap_idx.min(capacities.len() - 1)];

        if !current.is_empty() && filled + widths[order[pos]] > capacity {
            let remaining = capacity - filled;
            let swapped = plan.allow_adjust
                && (pos + 1..order.len())
                    .take(LOOKAHEAD)
                    .take_while(|j| !plan.gap_between(pos, *j))
                    .find(|j| widths[order[*j]] <= remaining)
                    .map(|j| order[pos..=j].rotate_right(1))
                    .is_some();
            if !swapped {
                slots.push(std::mem::take(&mut current));
                filled = 0.0;
            }
        }

        current.push(order[pos]);
        filled += widths[order[pos]];
    }
    slots.push(current);

    let mut items: Vec<Option<T>> = items.into_iter().map(Some).collect();
    slots
        .into_iter()
        .map(|slot| slot.into_iter().filter_map(|i| items[i].take()).collect())
        .collect()
}
