pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Document {key} is not valid JSON: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
    #[error("Failed to serialize document {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, DbError>;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }
        if version < 2 {
            self.migrate_v2()?;
        }

        self.conn.pragma_update(None, "user_version", 2)?;
        Ok(())
    }

    /// V1: keyed JSON documents (organisation, sort cache)
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                key         TEXT PRIMARY KEY,
                body        TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// V2: write timestamps, so `shelfmark cache` can report staleness
    fn migrate_v2(&self) -> Result<()> {
        let has_column: bool = self
            .conn
            .prepare("SELECT 1 FROM pragma_table_info('documents') WHERE name = 'updated_at'")?
            .exists([])?;
        if !has_column {
            self.conn.execute_batch(
                "ALTER TABLE documents ADD COLUMN updated_at TEXT NOT NULL DEFAULT '';",
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_migrates() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_reopen_file_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("shelfmark.db");
        {
            let db = Database::open(&path).unwrap();
            db.conn
                .execute("INSERT INTO documents (key, body) VALUES ('k', '{}')", [])
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        let body: String = db
            .conn
            .query_row("SELECT body FROM documents WHERE key = 'k'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(body, "{}");
    }
}
