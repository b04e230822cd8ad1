//! File configuration — TOML-backed settings for the refresh pipeline.
//!
//! Every field has a default matching the built-in behavior, so a config file
//! only needs to name what it overrides.

use crate::provider::FetchConfig;
use crate::refresh::RefreshMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location of the remote ticker feed.
pub const DEFAULT_FEED_URL: &str =
    "https://raw.githubusercontent.com/splocs/meu-repositorio/main/acoes.csv";

/// Default store location, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "quotes.db";

/// Pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    pub feed_url: String,
    pub db_path: PathBuf,
    pub mode: RefreshMode,
    pub fetch: FetchConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            mode: RefreshMode::default(),
            fetch: FetchConfig::default(),
        }
    }
}

impl VaultConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("read config file: {e}"))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("parse config TOML: {e}"))
    }
}
