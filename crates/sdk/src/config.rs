//! SDK runtime configuration: endpoint URLs and local storage root.
//!
//! Loaded from a JSON file (e.g. `~/.skill/config.json`) with env overrides.
//! Missing file means defaults; hosts usually only set the endpoints.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkConfig {
    /// GraphQL endpoint; workspace id is appended per request.
    #[serde(default = "default_graphql_url")]
    pub graphql_url: String,

    /// Datalog query endpoint; workspace id is appended per request.
    #[serde(default = "default_datalog_url")]
    pub datalog_url: String,

    /// Endpoint for status/prompt publishing (HttpMessageClient). Hosts with
    /// their own transport leave this unset.
    #[serde(default)]
    pub publish_url: Option<String>,

    /// Root directory for file:// storage (default: ~/.skill/storage).
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

fn default_graphql_url() -> String {
    "https://automation.atomist.com/graphql/team".to_string()
}

fn default_datalog_url() -> String {
    "https://api.atomist.com/datalog/team".to_string()
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            graphql_url: default_graphql_url(),
            datalog_url: default_datalog_url(),
            publish_url: None,
            storage_dir: None,
        }
    }
}

/// Resolve config path from env or default (~/.skill/config.json).
pub fn default_config_path() -> PathBuf {
    std::env::var("SKILL_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".skill").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the graphql endpoint: env SKILL_GRAPHQL_URL overrides config.
pub fn resolve_graphql_url(config: &SdkConfig) -> String {
    env_override("SKILL_GRAPHQL_URL").unwrap_or_else(|| config.graphql_url.clone())
}

/// Resolve the datalog endpoint: env SKILL_DATALOG_URL overrides config.
pub fn resolve_datalog_url(config: &SdkConfig) -> String {
    env_override("SKILL_DATALOG_URL").unwrap_or_else(|| config.datalog_url.clone())
}

/// Resolve the storage root: env SKILL_STORAGE_DIR, then config, then
/// ~/.skill/storage.
pub fn resolve_storage_dir(config: &SdkConfig) -> PathBuf {
    if let Some(dir) = env_override("SKILL_STORAGE_DIR") {
        return PathBuf::from(dir);
    }
    config.storage_dir.clone().unwrap_or_else(|| {
        dirs::home_dir()
            .map(|h| h.join(".skill").join("storage"))
            .unwrap_or_else(|| PathBuf::from("storage"))
    })
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Load config from the given path (or SKILL_CONFIG_PATH / default).
/// Missing file => default config. Returns the config and the path used.
pub fn load_config(path: Option<PathBuf>) -> Result<(SdkConfig, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        SdkConfig::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
