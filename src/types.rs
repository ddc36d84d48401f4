use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One usage event as submitted by a collector.
///
/// Only the fields the pipeline actually reads are named; everything else is
/// opaque payload carried through to the store unchanged. The identity field
/// (configurable, e.g. `uid`) also lives in `extra` because its name is not
/// fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users_count: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Item {
    pub fn new() -> Self {
        Self {
            date: None,
            category: None,
            app_uuid: None,
            downloads_count: None,
            users_count: None,
            extra: Map::new(),
        }
    }
}

impl Default for Item {
    fn default() -> Self {
        Self::new()
    }
}

/// Destination of one bulk write: a time-sliced index plus a category used as
/// the document type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub index: String,
    pub category: String,
}

/// A document ready for persistence: resolved identity plus the item body
/// (category and identity field already stripped).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Map<String, Value>,
}

/// A versioned document as returned by the store's multi-fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDoc {
    pub version: i64,
    pub source: Map<String, Value>,
}
