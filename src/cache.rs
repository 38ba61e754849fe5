//! Derived per-record attributes that are cheap to compare.
//!
//! Every entry can be regenerated from the record catalog, so the whole cache
//! may be dropped at any time.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogError, ItemCatalog};
use crate::db::models::{InstanceId, Record};

/// Sort key for the label/catalogue comparator: `label|catalogue|title`.
pub const BY_LABEL: &str = "BY_LABEL";
/// Sort key for date-added ordering, zero padded so string order is numeric order.
pub const BY_DATE_ADDED: &str = "BY_DATE_ADDED";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheEntry {
    pub instance_id: InstanceId,
    /// Raw spine width as reported by the catalog.
    pub width: f32,
    pub filed: String,
    pub folder: i32,
    /// Every distinct label name, concatenated in credit order.
    pub label_hash: String,
    pub main_label: String,
    pub entry: BTreeMap<String, String>,
}

impl CacheEntry {
    pub fn build(record: &Record) -> Self {
        let mut seen = BTreeSet::new();
        let mut label_hash = String::new();
        for label in &record.release.labels {
            if seen.insert(label.name.as_str()) {
                label_hash.push_str(&label.name);
            }
        }

        let (main_label, catno) = record
            .main_label()
            .map(|l| (l.name.clone(), l.catno.clone()))
            .unwrap_or_default();

        let mut entry = BTreeMap::new();
        entry.insert(
            BY_LABEL.to_string(),
            format!(
                "{}|{}|{}",
                main_label.to_lowercase(),
                convert_catno(&catno).to_lowercase(),
                record.title()
            ),
        );
        entry.insert(
            BY_DATE_ADDED.to_string(),
            format!("{:020}", record.metadata.date_added.max(0)),
        );

        Self {
            instance_id: record.instance_id(),
            width: record.metadata.record_width,
            filed: format!("{:?}", record.metadata.filed_under),
            folder: record.release.folder_id,
            label_hash,
            main_label,
            entry,
        }
    }

    pub fn key(&self, name: &str) -> &str {
        self.entry.get(name).map(String::as_str).unwrap_or("")
    }
}

/// Keep letters and digits; any other run of characters becomes one space.
pub fn convert_catno(catno: &str) -> String {
    let mut out = String::with_capacity(catno.len());
    let mut in_gap = false;
    for c in catno.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            in_gap = false;
        } else if !in_gap {
            out.push(' ');
            in_gap = true;
        }
    }
    out
}

/// The persisted cache document. At most one entry per instance id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortingCache {
    entries: BTreeMap<InstanceId, CacheEntry>,
}

impl SortingCache {
    pub fn get(&self, id: InstanceId) -> Option<&CacheEntry> {
        self.entries.get(&id)
    }

    /// Recompute the entry for `record`, replacing any previous one.
    pub fn refresh(&mut self, record: &Record) -> &CacheEntry {
        let entry = CacheEntry::build(record);
        log::trace!("Cache refresh for {}", entry.instance_id);
        self.entries.insert(entry.instance_id, entry.clone());
        &self.entries[&entry.instance_id]
    }

    /// Read-through lookup: fetch and store the entry from the catalog when absent.
    pub fn get_or_compute(
        &mut self,
        id: InstanceId,
        catalog: &dyn ItemCatalog,
    ) -> Result<&CacheEntry, CatalogError> {
        if !self.entries.contains_key(&id) {
            let record = catalog.record(id)?;
            self.entries.insert(id, CacheEntry::build(&record));
        }
        Ok(&self.entries[&id])
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
