use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Alerter, CatalogError, ItemCatalog, ItemMutation, RecordUpdate};
use crate::db::models::{FolderId, InstanceId, Record};

#[derive(Deserialize)]
struct FolderListing {
    #[serde(default)]
    instance_ids: Vec<InstanceId>,
}

pub struct HttpCatalog {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpCatalog {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn folder_url(&self, folder: FolderId) -> String {
        format!("{}/folders/{folder}/records", self.base_url)
    }

    fn record_url(&self, id: InstanceId) -> String {
        format!("{}/records/{id}", self.base_url)
    }
}

/// 404 on a record means it has left the collection.
fn classify(id: Option<InstanceId>, err: ureq::Error) -> CatalogError {
    match (id, err) {
        (Some(id), ureq::Error::StatusCode(404)) => CatalogError::Gone(id),
        (_, ureq::Error::Json(e)) => CatalogError::Decode(e.to_string()),
        (_, e) => CatalogError::Transport(e.to_string()),
    }
}

impl ItemCatalog for HttpCatalog {
    fn instance_ids(&self, folders: &[FolderId]) -> Result<Vec<InstanceId>, CatalogError> {
        let mut ids = Vec::new();
        for folder in folders {
            let url = self.folder_url(*folder);
            log::debug!("GET {url}");
            let listing: FolderListing = self
                .agent
                .get(&url)
                .call()
                .map_err(|e| classify(None, e))?
                .body_mut()
                .read_json()
                .map_err(|e| classify(None, e))?;
            ids.extend(listing.instance_ids);
        }
        Ok(ids)
    }

    fn record(&self, id: InstanceId) -> Result<Record, CatalogError> {
        let url = self.record_url(id);
        log::trace!("GET {url}");
        self.agent
            .get(&url)
            .call()
            .map_err(|e| classify(Some(id), e))?
            .body_mut()
            .read_json()
            .map_err(|e| classify(Some(id), e))
    }
}

impl ItemMutation for HttpCatalog {
    fn update_record(&self, update: &RecordUpdate) -> Result<(), CatalogError> {
        let url = format!("{}/update", self.record_url(update.instance_id));
        log::info!("Updating {}: {}", update.instance_id, update.reason);
        self.agent
            .post(&url)
            .send_json(update)
            .map_err(|e| classify(Some(update.instance_id), e))?;
        Ok(())
    }
}

#[derive(Serialize)]
struct AlertBody<'a> {
    title: &'a str,
    body: &'a str,
    service: &'a str,
}

/// Posts alerts to a webhook (issue tracker, chat relay, ...).
pub struct WebhookAlerter {
    url: String,
    agent: ureq::Agent,
}

impl WebhookAlerter {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { url: url.to_string(), agent }
    }
}

impl Alerter for WebhookAlerter {
    fn raise(&self, title: &str, body: &str) {
        let payload = AlertBody { title, body, service: crate::APP_NAME };
        if let Err(e) = self.agent.post(&self.url).send_json(&payload) {
            log::error!("Failed to deliver alert '{title}': {e}");
        }
    }
}
