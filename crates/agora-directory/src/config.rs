//! Directory server configuration, loaded from TOML with defaults.
//!
//! A malformed or missing config file never stops the server: it logs a
//! warning and falls back to defaults, so a bad edit degrades rather than
//! breaks.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Which storage backend to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Durable SQLite database (production default).
    Sqlite,
    /// Process-local memory (tests, development).
    Memory,
}

/// Full directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Listen address, e.g. `127.0.0.1:7420`.
    pub listen_addr: String,
    /// Storage backend selected at startup.
    pub store: StoreBackend,
    /// SQLite database path (ignored for the memory backend).
    pub db_path: String,
    /// Per-IP rate-limit budget in tokens per minute.
    pub rate_limit_per_minute: u32,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7420".to_string(),
            store: StoreBackend::Sqlite,
            db_path: "agora.db".to_string(),
            rate_limit_per_minute: 500,
        }
    }
}

/// Load configuration from a TOML file, with defaults.
pub fn load_config(path: Option<&Path>) -> DirectoryConfig {
    let Some(config_path) = path else {
        return DirectoryConfig::default();
    };

    match std::fs::read_to_string(config_path) {
        Ok(contents) => match toml::from_str::<DirectoryConfig>(&contents) {
            Ok(config) => {
                info!(path = %config_path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                DirectoryConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            DirectoryConfig::default()
        }
    }
}
