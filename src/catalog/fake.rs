use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Alerter, CatalogError, ItemCatalog, ItemMutation, RecordUpdate};
use crate::db::models::{FolderId, InstanceId, Label, Record};

/// A record with a single label credit.
pub fn record(id: InstanceId, title: &str, label: &str, catno: &str) -> Record {
    let mut rec = Record::default();
    rec.release.instance_id = id;
    rec.release.id = id;
    rec.release.title = title.to_string();
    rec.release.labels = vec![Label { id: 1, name: label.to_string(), catno: catno.to_string() }];
    rec
}

#[derive(Default)]
pub struct FakeCatalog {
    folders: Mutex<BTreeMap<FolderId, Vec<InstanceId>>>,
    records: Mutex<BTreeMap<InstanceId, Record>>,
    broken: Mutex<HashSet<InstanceId>>,
    updates: Mutex<Vec<RecordUpdate>>,
    fail_updates: Mutex<bool>,
    fetches: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// File `rec` under `folder`.
    pub fn add(&self, folder: FolderId, mut rec: Record) {
        rec.release.folder_id = folder;
        let id = rec.instance_id();
        self.records.lock().unwrap().insert(id, rec);
        self.folders.lock().unwrap().entry(folder).or_default().push(id);
    }

    /// Answer fetches of `requested` with `rec`, whatever its own id.
    pub fn serve_as(&self, requested: InstanceId, rec: Record) {
        self.records.lock().unwrap().insert(requested, rec);
    }

    /// Move an already-filed record to another folder.
    pub fn refile(&self, id: InstanceId, folder: FolderId) {
        let mut folders = self.folders.lock().unwrap();
        for ids in folders.values_mut() {
            ids.retain(|i| *i != id);
        }
        folders.entry(folder).or_default().push(id);
        if let Some(rec) = self.records.lock().unwrap().get_mut(&id) {
            rec.release.folder_id = folder;
        }
    }

    /// Listed in its folder but no longer fetchable.
    pub fn forget(&self, id: InstanceId) {
        self.records.lock().unwrap().remove(&id);
    }

    /// Fetches of `id` fail with a transport error.
    pub fn break_record(&self, id: InstanceId) {
        self.broken.lock().unwrap().insert(id);
    }

    pub fn fail_updates(&self) {
        *self.fail_updates.lock().unwrap() = true;
    }

    pub fn updates(&self) -> Vec<RecordUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn record_fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ItemCatalog for FakeCatalog {
    fn instance_ids(&self, folders: &[FolderId]) -> Result<Vec<InstanceId>, CatalogError> {
        let all = self.folders.lock().unwrap();
        Ok(folders
            .iter()
            .flat_map(|f| all.get(f).cloned().unwrap_or_default())
            .collect())
    }

    fn record(&self, id: InstanceId) -> Result<Record, CatalogError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.broken.lock().unwrap().contains(&id) {
            return Err(CatalogError::Transport(format!("connection reset fetching {id}")));
        }
        self.records
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(CatalogError::Gone(id))
    }
}

impl ItemMutation for FakeCatalog {
    fn update_record(&self, update: &RecordUpdate) -> Result<(), CatalogError> {
        if *self.fail_updates.lock().unwrap() {
            return Err(CatalogError::Transport("update rejected".into()));
        }
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAlerter {
    alerts: Mutex<Vec<(String, String)>>,
}

impl RecordingAlerter {
    pub fn titles(&self) -> Vec<String> {
        self.alerts.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }
}

impl Alerter for RecordingAlerter {
    fn raise(&self, title: &str, body: &str) {
        self.alerts.lock().unwrap().push((title.to_string(), body.to_string()));
    }
}
