use chrono::{Datelike, NaiveDate};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::app::ports::{Clock, IdGenerator};
use crate::pipeline::totals::DeltaMap;
use crate::types::{BucketKey, Document, Item};

/// Name of the monthly time-slice index an item's date maps to.
pub fn index_name(date: NaiveDate) -> String {
    format!("time_{:04}-{:02}", date.year(), date.month())
}

/// Result of one partitioning pass: per-bucket document lists plus the
/// per-entity deltas collected while scanning the same items.
#[derive(Debug, Default)]
pub struct PartitionedBatch {
    pub buckets: BTreeMap<BucketKey, Vec<Document>>,
    pub deltas: DeltaMap,
}

/// Sorts a batch into (time-index, category) buckets in a single pass,
/// resolving each document's identity along the way.
pub struct BatchPartitioner {
    id_field: String,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl BatchPartitioner {
    pub fn new(id_field: impl Into<String>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            id_field: id_field.into(),
            clock,
            ids,
        }
    }

    pub fn partition(&self, batch: Vec<Item>) -> PartitionedBatch {
        let today = self.clock.today();
        let mut buckets: BTreeMap<BucketKey, Vec<Document>> = BTreeMap::new();
        let mut deltas = DeltaMap::new();

        for mut item in batch {
            deltas.record(&item);

            let day = item.date.unwrap_or(today);
            let key = BucketKey {
                index: index_name(day),
                category: item
                    .category
                    .take()
                    .unwrap_or_else(|| "unknown".to_string()),
            };

            // Pop the identity field; items arriving without one get a fresh
            // id, seeded with the item's explicit date when it has one.
            let id = match item.extra.remove(&self.id_field) {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => self.ids.new_id(item.date),
            };

            buckets.entry(key).or_default().push(Document {
                id,
                body: into_body(item),
            });
        }

        debug!(
            buckets = buckets.len(),
            entities = deltas.len(),
            "partitioned batch"
        );
        PartitionedBatch { buckets, deltas }
    }
}

/// Flattens the remaining item fields into the document body. The category
/// was consumed by the bucket key and the identity field by the action line;
/// everything else rides along unchanged.
fn into_body(item: Item) -> Map<String, Value> {
    let mut body = item.extra;
    if let Some(date) = item.date {
        body.insert("date".to_string(), Value::String(date.to_string()));
    }
    if let Some(app) = item.app_uuid {
        body.insert("app_uuid".to_string(), Value::String(app));
    }
    if let Some(n) = item.downloads_count {
        body.insert("downloads_count".to_string(), Value::from(n));
    }
    if let Some(n) = item.users_count {
        body.insert("users_count".to_string(), Value::from(n));
    }
    body
}
