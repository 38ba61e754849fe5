pub mod cache;
pub mod catalog;
pub mod collapse;
pub mod config;
pub mod db;
pub mod organiser;
pub mod sales;
pub mod sorting;
pub mod split;

/// Application name for XDG paths
pub const APP_NAME: &str = "shelfmark";
