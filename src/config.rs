use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::db::models::Category;

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Base URL of the record catalog service.
    pub catalog_url: String,
    /// Where alerts are POSTed. Alerts only go to the log when unset.
    pub alert_webhook: Option<String>,
    /// Per-request timeout for catalog and webhook calls.
    pub request_timeout_secs: u64,
    /// Maximum record fetches in flight during an organise.
    pub fetch_concurrency: usize,
    /// Shelf width assumed when no record in a batch has a measured width.
    pub default_width: f32,
    /// Sleeve width multipliers.
    pub widths: SleevePolicy,
    pub quota: QuotaConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            catalog_url: "http://localhost:8085".to_string(),
            alert_webhook: None,
            request_timeout_secs: 30,
            fetch_concurrency: 100,
            default_width: 1.0,
            widths: SleevePolicy::default(),
            quota: QuotaConfig::default(),
        }
    }
}

/// How much each sleeve type inflates a stored spine width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SleevePolicy {
    /// Double-flap storage sleeves and plain outer bags.
    pub double_flap: f32,
    pub unknown: f32,
    pub no_inner: f32,
}

impl Default for SleevePolicy {
    fn default() -> Self {
        Self {
            double_flap: 1.26,
            unknown: 1.18,
            no_inner: 1.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Records in these categories are never nominated for sale.
    pub excluded_categories: Vec<Category>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            excluded_categories: Category::SALE_PIPELINE.to_vec(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/shelfmark/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Fan-out width, never below one.
    pub fn resolve_concurrency(&self) -> usize {
        self.fetch_concurrency.max(1)
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("shelfmark.db")
    } else {
        PathBuf::from("shelfmark.db")
    }
}
