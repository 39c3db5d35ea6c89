//! Configuration loader for Tasker.
//!
//! Reads `config.toml` from the data directory (`~/.tasker/` by default) and
//! deserializes it into [`TaskerConfig`]. Falls back to defaults when the file
//! is missing or malformed.

use std::path::{Path, PathBuf};

use tasker_types::config::TaskerConfig;

use crate::sqlite::pool::default_database_url;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TASKER_DATA_DIR";

/// Resolve the data directory.
///
/// Priority:
/// 1. `TASKER_DATA_DIR` environment variable
/// 2. `~/.tasker`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".tasker");
    }

    PathBuf::from(".tasker")
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`TaskerConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_config(data_dir: &Path) -> TaskerConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return TaskerConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return TaskerConfig::default();
        }
    };

    match toml::from_str::<TaskerConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            TaskerConfig::default()
        }
    }
}

/// The configured database URL, or `{data_dir}/tasker.db`.
pub fn database_url(config: &TaskerConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| default_database_url(data_dir))
}
