use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::models::Organisation;
use super::{Database, DbError, Result};
use crate::cache::SortingCache;

/// Key of the organisation document (locations and extractors).
pub const ORG_KEY: &str = "shelfmark/org";
/// Key of the derived sort/width cache document.
pub const CACHE_KEY: &str = "shelfmark/cache";

impl Database {
    /// Load a JSON document, or `None` if it has never been written.
    pub fn load_document<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let body: Option<String> = self
            .conn
            .query_row("SELECT body FROM documents WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;

        body.map(|b| {
            serde_json::from_str(&b).map_err(|source| DbError::Decode {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }

    pub fn save_document<T: Serialize>(&self, key: &str, doc: &T) -> Result<()> {
        let body = serde_json::to_string(doc).map_err(|source| DbError::Encode {
            key: key.to_string(),
            source,
        })?;
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO documents (key, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![key, body, now],
        )?;
        Ok(())
    }

    /// When the document was last written (RFC 3339), if ever.
    pub fn document_updated_at(&self, key: &str) -> Result<Option<String>> {
        let at = self
            .conn
            .query_row(
                "SELECT updated_at FROM documents WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(at)
    }

    pub fn load_organisation(&self) -> Result<Organisation> {
        Ok(self.load_document(ORG_KEY)?.unwrap_or_default())
    }

    pub fn save_organisation(&self, org: &Organisation) -> Result<()> {
        self.save_document(ORG_KEY, org)
    }

    /// A missing cache is not an error; it is rebuilt on the next organise.
    pub fn load_cache(&self) -> Result<SortingCache> {
        Ok(self.load_document(CACHE_KEY)?.unwrap_or_default())
    }

    pub fn save_cache(&self, cache: &SortingCache) -> Result<()> {
        self.save_document(CACHE_KEY, cache)
    }
}
