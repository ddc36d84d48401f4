use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::app::ports::{StoreError, StorePort};
use crate::types::{Document, FetchedDoc};

type Space = (String, String);

/// In-memory store implementation for development/testing. Implements the
/// same versioning discipline as the real store: documents carry a version
/// starting at 1, and a versioned write succeeds only when the expected
/// version matches (0 meaning "create, nothing stored").
pub struct MemoryStore {
    spaces: Arc<Mutex<HashMap<Space, HashMap<String, FetchedDoc>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            spaces: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn space_key(index: &str, category: &str) -> Space {
        (index.to_string(), category.to_string())
    }

    /// Pre-populates a document, for test setup.
    pub fn seed(&self, index: &str, category: &str, id: &str, version: i64, source: Value) {
        let Value::Object(source) = source else {
            panic!("seed source must be an object")
        };
        self.spaces
            .lock()
            .unwrap()
            .entry(Self::space_key(index, category))
            .or_default()
            .insert(id.to_string(), FetchedDoc { version, source });
    }

    pub fn get(&self, index: &str, category: &str, id: &str) -> Option<FetchedDoc> {
        self.spaces
            .lock()
            .unwrap()
            .get(&Self::space_key(index, category))
            .and_then(|space| space.get(id))
            .cloned()
    }

    pub fn count(&self, index: &str, category: &str) -> usize {
        self.spaces
            .lock()
            .unwrap()
            .get(&Self::space_key(index, category))
            .map_or(0, |space| space.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorePort for MemoryStore {
    async fn bulk_write(
        &self,
        index: &str,
        category: &str,
        docs: &[Document],
    ) -> Result<(), StoreError> {
        let mut spaces = self.spaces.lock().unwrap();
        let space = spaces.entry(Self::space_key(index, category)).or_default();
        for doc in docs {
            let version = space.get(&doc.id).map_or(1, |d| d.version + 1);
            space.insert(
                doc.id.clone(),
                FetchedDoc {
                    version,
                    source: doc.body.clone(),
                },
            );
        }
        debug!(index, category, docs = docs.len(), "bulk write stored");
        Ok(())
    }

    async fn multi_fetch(
        &self,
        index: &str,
        category: &str,
        ids: &[String],
    ) -> Result<HashMap<String, FetchedDoc>, StoreError> {
        let spaces = self.spaces.lock().unwrap();
        // A space nothing was ever written to behaves like a missing index.
        let Some(space) = spaces.get(&Self::space_key(index, category)) else {
            return Err(StoreError::NotFound);
        };
        Ok(ids
            .iter()
            .filter_map(|id| space.get(id).map(|d| (id.clone(), d.clone())))
            .collect())
    }

    async fn versioned_write(
        &self,
        index: &str,
        category: &str,
        id: &str,
        body: &Value,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let Value::Object(source) = body.clone() else {
            return Err(StoreError::Transport(
                "document body must be an object".to_string(),
            ));
        };
        let mut spaces = self.spaces.lock().unwrap();
        let space = spaces.entry(Self::space_key(index, category)).or_default();
        let current = space.get(id).map_or(0, |d| d.version);
        if current != expected_version {
            return Err(StoreError::Conflict { id: id.to_string() });
        }
        space.insert(
            id.to_string(),
            FetchedDoc {
                version: expected_version + 1,
                source,
            },
        );
        Ok(())
    }
}
