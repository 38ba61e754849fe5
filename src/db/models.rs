use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub type InstanceId = i32;
pub type FolderId = i32;
pub type LabelId = i32;

/// One label credit on a release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Label {
    pub id: LabelId,
    pub name: String,
    pub catno: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Format {
    pub name: String,
    pub descriptions: Vec<String>,
}

/// Catalog-owned release facts for one owned copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Release {
    pub instance_id: InstanceId,
    pub id: i32,
    pub title: String,
    pub labels: Vec<Label>,
    pub formats: Vec<Format>,
    pub format_quantity: i32,
    /// Free-form earliest release year/date, e.g. "1977" or "1977-05-08".
    pub released: String,
    pub earliest_release_date: i64,
    pub rating: i32,
    pub folder_id: FolderId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sleeve {
    #[default]
    SleeveUnknown,
    Standard,
    BoxSet,
    VinylStorageDoubleFlap,
    BagsUnlimitedPlain,
    VinylStorageNoInner,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FiledUnder {
    #[default]
    FileUnknown,
    File12Inch,
    File7Inch,
    FileCd,
    FileTape,
    FileDigital,
    FileOutside,
}

/// Handling state of a record in the collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    #[default]
    Unknown,
    Unlistened,
    Staged,
    PreInCollection,
    InCollection,
    Validate,
    Digital,
    AssessForSale,
    PrepareToSell,
    StagedToSell,
    ListedToSell,
    SoldOffline,
    Sold,
    SoldArchive,
    Gone,
    NoLabel,
}

impl Category {
    /// Categories a record passes through once it is on its way out of the collection.
    pub const SALE_PIPELINE: [Category; 9] = [
        Category::AssessForSale,
        Category::PrepareToSell,
        Category::StagedToSell,
        Category::ListedToSell,
        Category::SoldOffline,
        Category::Sold,
        Category::SoldArchive,
        Category::Gone,
        Category::NoLabel,
    ];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeepState {
    #[default]
    Unknown,
    NotKeeper,
    Keeper,
    DigitalKeeper,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoxState {
    #[default]
    BoxUnknown,
    OutOfBox,
    InTheBox,
}

/// Mutable per-copy state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordMetadata {
    /// Spine width in millimetres; zero or negative when unmeasured.
    pub record_width: f32,
    pub sleeve: Sleeve,
    pub filed_under: FiledUnder,
    pub category: Category,
    pub keep: KeepState,
    pub box_state: BoxState,
    pub overall_score: f32,
    pub current_sale_price: i32,
    pub last_listen_time: i64,
    pub last_move_time: i64,
    pub date_added: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    pub release: Release,
    pub metadata: RecordMetadata,
}

impl Record {
    pub fn instance_id(&self) -> InstanceId {
        self.release.instance_id
    }

    pub fn title(&self) -> &str {
        &self.release.title
    }

    /// The label whose lower-cased name sorts first; the first listed wins ties.
    pub fn main_label(&self) -> Option<&Label> {
        let mut best: Option<&Label> = None;
        for label in &self.release.labels {
            match best {
                Some(b) if b.name.to_lowercase() <= label.name.to_lowercase() => {}
                _ => best = Some(label),
            }
        }
        best
    }

    pub fn is_keeper(&self) -> bool {
        self.metadata.keep == KeepState::Keeper
    }

    pub fn is_boxed(&self) -> bool {
        self.metadata.box_state == BoxState::InTheBox
    }
}

/// Ordering strategies a folder can be sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortStrategy {
    #[default]
    ByLabelCatno,
    ByDateAdded,
    ByReleaseDate,
    ByMoveTime,
    ByLastListen,
    ByFolderThenDate,
    ByIid,
}

/// How much a location may hold. Exactly one kind per location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Quota {
    /// Highest assigned slot may not exceed `slots`.
    Slots { slots: i32 },
    /// Sum of every placed width may not exceed `width`.
    AbsoluteWidth { width: f32 },
    /// Each slot's summed width may not exceed `width`; also the packing budget.
    SlotWidth { width: f32 },
    /// Legacy form: at most `count` records placed.
    NumOfSlots { count: i32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayState {
    #[default]
    Unknown,
    InPlay,
    OutOfPlay,
}

/// One record's computed position inside a location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleasePlacement {
    /// 1-based slot number.
    pub slot: i32,
    /// 1-based position inside the slot.
    pub index: i32,
    pub instance_id: InstanceId,
    pub title: String,
    pub determined_width: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub name: String,
    pub folder_ids: Vec<FolderId>,
    /// Strategy for folders without an explicit entry in `folder_sort`.
    pub sort: SortStrategy,
    pub folder_order: BTreeMap<FolderId, i32>,
    pub folder_sort: BTreeMap<FolderId, SortStrategy>,
    pub hard_gaps: BTreeSet<FolderId>,
    pub slots: i32,
    pub quota: Option<Quota>,
    pub combine_similar: bool,
    pub allow_adjust: bool,
    pub spill_folder: FolderId,
    pub no_alert: bool,
    pub in_play: PlayState,
    /// Seconds between expected manual reorganisations; zero when unset.
    pub reorg_time: i64,
    pub last_reorg: i64,
    pub over_quota_time: i64,
    pub releases_location: Vec<ReleasePlacement>,
}

/// A contiguous run of folders sharing one priority.
#[derive(Debug, Clone, PartialEq)]
pub struct Tier {
    pub order: i32,
    pub folders: Vec<FolderId>,
    pub strategy: SortStrategy,
    pub hard_gap: bool,
}

impl Location {
    pub fn tracks_folder(&self, folder: FolderId) -> bool {
        self.folder_ids.contains(&folder)
    }

    pub fn placement_of(&self, id: InstanceId) -> Option<&ReleasePlacement> {
        self.releases_location.iter().find(|p| p.instance_id == id)
    }

    /// The placement of `id` with the records either side of it in the same slot.
    pub fn shelf_neighbours(
        &self,
        id: InstanceId,
    ) -> Option<(Option<&ReleasePlacement>, &ReleasePlacement, Option<&ReleasePlacement>)> {
        let placements = &self.releases_location;
        let i = placements.iter().position(|p| p.instance_id == id)?;
        let here = &placements[i];
        let same_slot = |p: &&ReleasePlacement| p.slot == here.slot;
        let before = i.checked_sub(1).and_then(|j| placements.get(j)).filter(same_slot);
        let after = placements.get(i + 1).filter(same_slot);
        Some((before, here, after))
    }

    pub fn max_slot(&self) -> i32 {
        self.releases_location.iter().map(|p| p.slot).max().unwrap_or(0)
    }

    /// Folders grouped by ascending priority, each group keeping `folder_ids` order.
    pub fn tiers(&self) -> Vec<Tier> {
        let mut by_order: BTreeMap<i32, Vec<FolderId>> = BTreeMap::new();
        for folder in &self.folder_ids {
            let order = self.folder_order.get(folder).copied().unwrap_or(0);
            by_order.entry(order).or_default().push(*folder);
        }

        by_order
            .into_iter()
            .map(|(order, folders)| {
                let strategy = folders
                    .iter()
                    .find_map(|f| self.folder_sort.get(f).copied())
                    .unwrap_or(self.sort);
                let hard_gap = folders.iter().any(|f| self.hard_gaps.contains(f));
                Tier { order, folders, strategy, hard_gap }
            })
            .collect()
    }

    /// Dedupe folders and fill in a default order. Folders without a sort of
    /// their own follow `sort`. Returns false when the play state is unset.
    pub fn normalise(&mut self) -> bool {
        let mut seen = BTreeSet::new();
        self.folder_ids.retain(|f| seen.insert(*f));

        if self.folder_order.is_empty() {
            for folder in &self.folder_ids {
                self.folder_order.insert(*folder, 0);
            }
        }

        self.in_play != PlayState::Unknown
    }
}

/// Catalogue-number extraction pattern registered for a label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelExtractor {
    pub label_id: LabelId,
    pub extractor: String,
}

/// The persisted configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Organisation {
    pub locations: Vec<Location>,
    pub extractors: Vec<LabelExtractor>,
}

impl Organisation {
    pub fn location(&self, name: &str) -> Option<&Location> {
        self.locations.iter().find(|l| l.name == name)
    }

    pub fn location_mut(&mut self, name: &str) -> Option<&mut Location> {
        self.locations.iter_mut().find(|l| l.name == name)
    }

    /// Normalise every location, returning names with no play state configured.
    pub fn normalise(&mut self) -> Vec<String> {
        self.locations
            .iter_mut()
            .filter_map(|l| (!l.normalise()).then(|| l.name.clone()))
            .collect()
    }
}
