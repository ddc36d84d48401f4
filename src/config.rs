use serde::Deserialize;
use std::path::Path;

use crate::error::{IngestError, Result};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    #[serde(default = "default_totals_index")]
    pub totals_index: String,
    #[serde(default = "default_totals_category")]
    pub totals_category: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_totals_index() -> String {
    "totals".to_string()
}

fn default_totals_category() -> String {
    "apps".to_string()
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
