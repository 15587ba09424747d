//! Configuration loader for Conductor.
//!
//! Reads `conductor.toml` (from the data directory or an explicit path) into
//! [`ConductorConfig`]. The lenient loaders fall back to defaults when the
//! file is missing or malformed; `read_config` surfaces the error instead.

use std::path::Path;

use anyhow::Context;
use conductor_types::config::ConductorConfig;

use crate::sqlite::pool::default_database_url;

pub const CONFIG_FILE_NAME: &str = "conductor.toml";

/// Parse `path` strictly.
pub async fn read_config(path: &Path) -> anyhow::Result<ConductorConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Load `path`, returning defaults (with a warning) if it can't be used.
pub async fn load_config_file(path: &Path) -> ConductorConfig {
    match tokio::fs::try_exists(path).await {
        Ok(true) => {}
        _ => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return ConductorConfig::default();
        }
    }

    match read_config(path).await {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("{err:#}, using defaults");
            ConductorConfig::default()
        }
    }
}

/// Load `{data_dir}/conductor.toml`.
pub async fn load_config(data_dir: &Path) -> ConductorConfig {
    load_config_file(&data_dir.join(CONFIG_FILE_NAME)).await
}

/// Configured database URL, or the default under the data directory.
pub fn database_url(config: &ConductorConfig) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(default_database_url)
}
