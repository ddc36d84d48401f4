use crate::app::ports::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("bucket write to {index}/{category} failed: {source}")]
    BucketWrite {
        index: String,
        category: String,
        source: StoreError,
    },

    #[error("totals reconciliation failed: {source}")]
    Reconcile { source: StoreError },

    #[error("totals reconciliation gave up after {attempts} attempts for entities {ids:?}")]
    RetriesExhausted { attempts: u32, ids: Vec<String> },
}

pub type Result<T> = std::result::Result<T, IngestError>;
