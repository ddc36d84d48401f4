use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{Document, FetchedDoc};

/// Store-side failures as seen by the pipeline. Only the version conflict is
/// recoverable; everything that is not a conflict or a missing document is
/// transport.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("version conflict writing {id}")]
    Conflict { id: String },

    #[error("not found")]
    NotFound,

    #[error("store transport failure: {0}")]
    Transport(String),
}

/// Narrow interface to the document store. The pipeline never speaks HTTP
/// itself; it only issues these three calls.
#[async_trait]
pub trait StorePort: Send + Sync {
    /// Write one bucket of documents in a single request, preserving order.
    async fn bulk_write(
        &self,
        index: &str,
        category: &str,
        docs: &[Document],
    ) -> Result<(), StoreError>;

    /// Fetch several documents by id in one round-trip. Only existing
    /// documents appear in the result map.
    async fn multi_fetch(
        &self,
        index: &str,
        category: &str,
        ids: &[String],
    ) -> Result<HashMap<String, FetchedDoc>, StoreError>;

    /// Compare-and-swap write: succeeds only if the stored version still
    /// equals `expected_version` (0 means "create, nothing stored yet").
    async fn versioned_write(
        &self,
        index: &str,
        category: &str,
        id: &str,
        body: &Value,
        expected_version: i64,
    ) -> Result<(), StoreError>;
}

/// Injected clock so date-defaulting stays deterministic in tests.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Produces distinct, URL-safe document identifiers. The optional seed date
/// is an explicit parameter rather than an overloaded field on the item.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self, seed: Option<NaiveDate>) -> String;
}
