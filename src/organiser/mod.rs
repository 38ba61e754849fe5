pub mod cycle;
pub mod quota;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use thiserror::Error;

use crate::cache::{CacheEntry, SortingCache};
use crate::catalog::http::{HttpCatalog, WebhookAlerter};
use crate::catalog::{Alerter, CatalogError, ItemCatalog, ItemMutation, LogAlerter, RecordUpdate};
use crate::config::{AppConfig, SleevePolicy};
use crate::db::models::{
    FolderId, InstanceId, LabelExtractor, LabelId, Location, Organisation, PlayState, Quota,
    SortStrategy,
};
use crate::db::{Database, DbError};
use crate::sales::QuotaEligibility;
use crate::sorting::ExtractorSet;

pub use quota::{QuotaQuery, QuotaStatus};

#[derive(Error, Debug)]
pub enum OrgError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Could not start fetch workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, OrgError>;

/// Tunables shared by every organise cycle.
#[derive(Debug, Clone)]
pub struct OrganiserSettings {
    pub sleeves: SleevePolicy,
    pub default_width: f32,
    pub concurrency: usize,
    pub eligibility: QuotaEligibility,
}

impl Default for OrganiserSettings {
    fn default() -> Self {
        Self {
            sleeves: SleevePolicy::default(),
            default_width: 1.0,
            concurrency: 100,
            eligibility: QuotaEligibility::default(),
        }
    }
}

impl OrganiserSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sleeves: config.widths,
            default_width: config.default_width,
            concurrency: config.resolve_concurrency(),
            eligibility: QuotaEligibility::new(config.quota.excluded_categories.clone()),
        }
    }
}

/// Fields to change on an existing location. Unset fields are left alone;
/// folders, per-folder maps and hard gaps are merged in.
#[derive(Debug, Clone, Default)]
pub struct LocationPatch {
    pub folder_ids: Vec<FolderId>,
    pub sort: Option<SortStrategy>,
    pub folder_order: BTreeMap<FolderId, i32>,
    pub folder_sort: BTreeMap<FolderId, SortStrategy>,
    pub hard_gaps: BTreeSet<FolderId>,
    pub slots: Option<i32>,
    pub quota: Option<Quota>,
    pub combine_similar: Option<bool>,
    pub allow_adjust: Option<bool>,
    pub spill_folder: Option<FolderId>,
    pub no_alert: Option<bool>,
    pub in_play: Option<PlayState>,
    pub reorg_time: Option<i64>,
}

impl LocationPatch {
    fn apply(self, loc: &mut Location) {
        loc.folder_ids.extend(self.folder_ids);
        loc.folder_order.extend(self.folder_order);
        loc.folder_sort.extend(self.folder_sort);
        loc.hard_gaps.extend(self.hard_gaps);
        if let Some(sort) = self.sort {
            loc.sort = sort;
        }
        if let Some(slots) = self.slots {
            loc.slots = slots;
        }
        if let Some(quota) = self.quota {
            loc.quota = Some(quota);
        }
        if let Some(v) = self.combine_similar {
            loc.combine_similar = v;
        }
        if let Some(v) = self.allow_adjust {
            loc.allow_adjust = v;
        }
        if let Some(v) = self.spill_folder {
            loc.spill_folder = v;
        }
        if let Some(v) = self.no_alert {
            loc.no_alert = v;
        }
        if let Some(v) = self.in_play {
            loc.in_play = v;
        }
        if let Some(v) = self.reorg_time {
            loc.reorg_time = v;
        }
    }
}

#[derive(Debug, Clone)]
pub enum LocationChange {
    Update(LocationPatch),
    Delete,
}

#[derive(Debug, Clone, Copy)]
pub enum LocateQuery {
    Instance(InstanceId),
    Folder(FolderId),
}

/// Locations matching a `get_organisation` filter.
#[derive(Debug, Clone, Default)]
pub struct OrganisationView {
    pub locations: Vec<Location>,
    /// Packing units laid out by forced reorganisation.
    pub processed: usize,
}

/// A record that changed owning location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationMove {
    pub instance_id: InstanceId,
    pub from: Option<String>,
    pub to: Option<String>,
}

pub struct Organiser {
    db: Database,
    catalog: Arc<dyn ItemCatalog>,
    mutation: Arc<dyn ItemMutation>,
    alerter: Arc<dyn Alerter>,
    settings: OrganiserSettings,
    /// Fetch workers, sized to `settings.concurrency`.
    pool: rayon::ThreadPool,
}

impl Organiser {
    pub fn new(
        db: Database,
        catalog: Arc<dyn ItemCatalog>,
        mutation: Arc<dyn ItemMutation>,
        alerter: Arc<dyn Alerter>,
        settings: OrganiserSettings,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.concurrency.max(1))
            .build()?;
        Ok(Self { db, catalog, mutation, alerter, settings, pool })
    }

    /// Wire up the HTTP catalog and the configured alert sink.
    pub fn connect(db: Database, config: &AppConfig) -> Result<Self> {
        let catalog = Arc::new(HttpCatalog::new(&config.catalog_url, config.request_timeout()));
        let alerter: Arc<dyn Alerter> = match &config.alert_webhook {
            Some(url) => Arc::new(WebhookAlerter::new(url, config.request_timeout())),
            None => Arc::new(LogAlerter),
        };
        Self::new(
            db,
            catalog.clone(),
            catalog,
            alerter,
            OrganiserSettings::from_config(config),
        )
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn load_org(&self) -> Result<Organisation> {
        let mut org = self.db.load_organisation()?;
        for name in org.normalise() {
            self.alerter.raise(
                "Missing play state",
                &format!("{name} has no in-play configuration"),
            );
        }
        Ok(org)
    }

    fn save(&self, org: &Organisation, cache: &SortingCache) -> Result<()> {
        self.db.save_organisation(org)?;
        self.db.save_cache(cache)?;
        Ok(())
    }

    /// Organise the location at `idx` in place.
    fn organise_at(&self, org: &mut Organisation, idx: usize, cache: &mut SortingCache) -> Result<usize> {
        let extractors = ExtractorSet::compile(&org.extractors);
        self.organise(&mut org.locations[idx], &extractors, cache)
    }

    /// Append a new location and lay it out immediately.
    pub fn add_location(&self, mut location: Location) -> Result<Location> {
        if location.name.is_empty() {
            return Err(OrgError::InvalidArgument("Location needs a name".into()));
        }
        let mut org = self.load_org()?;
        if org.location(&location.name).is_some() {
            return Err(OrgError::InvalidArgument(format!(
                "Location {} already exists",
                location.name
            )));
        }

        location.normalise();
        org.locations.push(location);
        let idx = org.locations.len() - 1;

        let mut cache = self.db.load_cache()?;
        let processed = self.organise_at(&mut org, idx, &mut cache)?;
        self.save(&org, &cache)?;
        log::info!("Added {} ({processed} placed)", org.locations[idx].name);
        Ok(org.locations[idx].clone())
    }

    pub fn update_location(&self, name: &str, change: LocationChange) -> Result<()> {
        let mut org = self.load_org()?;
        let idx = org
            .locations
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| OrgError::NotFound(format!("No location named {name}")))?;

        match change {
            LocationChange::Delete => {
                org.locations.remove(idx);
                log::info!("Deleted location {name}");
            }
            LocationChange::Update(patch) => {
                let loc = &mut org.locations[idx];
                patch.apply(loc);
                loc.normalise();
                log::info!("Updated location {name}");
            }
        }
        self.db.save_organisation(&org)?;
        Ok(())
    }

    /// Locations whose name is in `names` (all of them when `names` is empty or
    /// contains an empty name), optionally reorganised first.
    pub fn get_organisation(
        &self,
        names: &[String],
        force_reorg: bool,
        reset_last_reorg: bool,
    ) -> Result<OrganisationView> {
        let mut org = self.load_org()?;
        let wanted = |l: &Location| {
            names.is_empty() || names.iter().any(|n| n.is_empty() || *n == l.name)
        };
        let matched: Vec<usize> = org
            .locations
            .iter()
            .enumerate()
            .filter(|(_, l)| wanted(l))
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;
        if force_reorg || reset_last_reorg {
            let mut cache = self.db.load_cache()?;
            let pb = if force_reorg {
                let pb = ProgressBar::new(matched.len() as u64);
                if let Ok(style) =
                    ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                {
                    pb.set_style(style.progress_chars("=> "));
                }
                pb
            } else {
                ProgressBar::hidden()
            };

            let now = Self::now();
            for idx in &matched {
                pb.set_message(org.locations[*idx].name.clone());
                if force_reorg {
                    processed += self.organise_at(&mut org, *idx, &mut cache)?;
                }
                if reset_last_reorg {
                    org.locations[*idx].last_reorg = now;
                }
                pb.inc(1);
            }
            pb.finish_and_clear();
            self.save(&org, &cache)?;
        }

        Ok(OrganisationView {
            locations: matched.iter().map(|i| org.locations[*i].clone()).collect(),
            processed,
        })
    }

    /// The location holding an instance, or tracking a folder.
    pub fn locate(&self, query: LocateQuery) -> Result<Location> {
        let org = self.load_org()?;
        let found = match query {
            LocateQuery::Instance(id) => org.locations.iter().find(|l| l.placement_of(id).is_some()),
            LocateQuery::Folder(folder) => org.locations.iter().find(|l| l.tracks_folder(folder)),
        };
        found
            .cloned()
            .ok_or_else(|| OrgError::NotFound(format!("Unable to locate {query:?}")))
    }

    /// Register (or replace) the catalogue extractor for a label.
    pub fn add_extractor(&self, label_id: LabelId, pattern: &str) -> Result<()> {
        Regex::new(pattern)
            .map_err(|e| OrgError::InvalidArgument(format!("Bad extractor for {label_id}: {e}")))?;
        let mut org = self.load_org()?;
        org.extractors.retain(|e| e.label_id != label_id);
        org.extractors.push(LabelExtractor { label_id, extractor: pattern.to_string() });
        self.db.save_organisation(&org)?;
        Ok(())
    }

    pub fn get_cache(&self) -> Result<SortingCache> {
        Ok(self.db.load_cache()?)
    }

    /// One cache entry, fetched from the catalog and stored if not yet cached.
    pub fn cache_entry(&self, id: InstanceId) -> Result<CacheEntry> {
        let mut cache = self.db.load_cache()?;
        let known = cache.get(id).is_some();
        let entry = cache.get_or_compute(id, self.catalog.as_ref())?.clone();
        if !known {
            self.db.save_cache(&cache)?;
        }
        Ok(entry)
    }

    /// React to a record changing folder: re-lay the location it left and the
    /// one it joined.
    pub fn client_update(&self, id: InstanceId) -> Result<Option<LocationMove>> {
        let record = match self.catalog.record(id) {
            Ok(r) => r,
            Err(CatalogError::Gone(_)) => {
                log::debug!("Ignoring update for departed record {id}");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut org = self.load_org()?;
        let old = org.locations.iter().position(|l| l.placement_of(id).is_some());
        let new = org
            .locations
            .iter()
            .position(|l| l.tracks_folder(record.release.folder_id));
        if old == new {
            return Ok(None);
        }

        let mut cache = self.db.load_cache()?;
        cache.refresh(&record);
        for idx in [old, new].into_iter().flatten() {
            self.organise_at(&mut org, idx, &mut cache)?;
        }
        self.save(&org, &cache)?;

        let moved = LocationMove {
            instance_id: id,
            from: old.map(|i| org.locations[i].name.clone()),
            to: new.map(|i| org.locations[i].name.clone()),
        };
        if !record.is_boxed() {
            let update = RecordUpdate::moved(
                id,
                moved.from.as_deref().unwrap_or("none"),
                moved.to.as_deref().unwrap_or("none"),
            );
            self.mutation.update_record(&update)?;
        }
        Ok(Some(moved))
    }

    /// Raise reorganisation reminders. Returns how many alerts went out.
    pub fn check_org(&self, now: i64) -> Result<usize> {
        let org = self.load_org()?;
        let mut raised = 0;
        for loc in &org.locations {
            if loc.reorg_time == 0 {
                self.alerter
                    .raise("Add reorg time", &format!("{} has no reorg time set", loc.name));
                raised += 1;
            } else if now - loc.last_reorg > loc.reorg_time {
                self.alerter.raise("Reorg", &format!("{} is due a reorg", loc.name));
                raised += 1;
            }
        }
        Ok(raised)
    }
}
