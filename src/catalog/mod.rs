pub mod http;

#[cfg(test)]
pub mod fake;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::{Category, FolderId, InstanceId, Record};

#[derive(Error, Debug)]
pub enum CatalogError {
    /// The record was deleted or moved out of the collection.
    #[error("Record {0} no longer exists")]
    Gone(InstanceId),
    #[error("Catalog request failed: {0}")]
    Transport(String),
    #[error("Catalog returned an unreadable response: {0}")]
    Decode(String),
}

/// Read access to the collection.
pub trait ItemCatalog: Send + Sync {
    /// Instance ids currently filed in any of `folders`.
    fn instance_ids(&self, folders: &[FolderId]) -> Result<Vec<InstanceId>, CatalogError>;

    fn record(&self, id: InstanceId) -> Result<Record, CatalogError>;
}

/// A change written back to one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub instance_id: InstanceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    pub reason: String,
}

impl RecordUpdate {
    pub fn prepare_to_sell(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            category: Some(Category::PrepareToSell),
            reason: "org-prepare-to-sell".to_string(),
        }
    }

    pub fn moved(instance_id: InstanceId, from: &str, to: &str) -> Self {
        Self {
            instance_id,
            category: None,
            reason: format!("Org Move Update ({from} -> {to})"),
        }
    }
}

pub trait ItemMutation: Send + Sync {
    fn update_record(&self, update: &RecordUpdate) -> Result<(), CatalogError>;
}

/// Operational notices. Delivery is best effort and never fails the caller.
pub trait Alerter: Send + Sync {
    fn raise(&self, title: &str, body: &str);
}

/// Alerts written to the log only.
pub struct LogAlerter;

impl Alerter for LogAlerter {
    fn raise(&self, title: &str, body: &str) {
        log::warn!("{title}: {body}");
    }
}
