use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::app::ports::{StoreError, StorePort};
use crate::error::{IngestError, Result};
use crate::pipeline::totals::{DeltaMap, EntityDelta};
use crate::types::FetchedDoc;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(50);

/// Folds a batch's per-entity deltas into the persisted running totals using
/// the store's per-document compare-and-swap. Concurrent writers are expected;
/// a rejected write is re-fetched and re-merged from the original delta, up to
/// a bounded number of retry rounds with exponential backoff.
pub struct TotalsReconciler {
    store: Arc<dyn StorePort>,
    index: String,
    category: String,
    max_retries: u32,
    base_delay: Duration,
}

impl TotalsReconciler {
    pub fn new(store: Arc<dyn StorePort>, index: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            store,
            index: index.into(),
            category: category.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    #[instrument(skip(self, deltas), fields(entities = deltas.len()))]
    pub async fn reconcile(&self, deltas: DeltaMap) -> Result<()> {
        let mut pending = deltas.into_inner();
        if pending.is_empty() {
            return Ok(());
        }

        let mut attempts = 0u32;
        loop {
            let ids: Vec<String> = pending.keys().cloned().collect();
            let found = match self.store.multi_fetch(&self.index, &self.category, &ids).await {
                Ok(found) => found,
                // No totals stored yet: every entity gets create semantics.
                Err(StoreError::NotFound) => HashMap::new(),
                Err(source) => return Err(IngestError::Reconcile { source }),
            };

            let mut retry = BTreeMap::new();
            for (id, delta) in &pending {
                let (version, body) = merge(found.get(id.as_str()), *delta);
                match self
                    .store
                    .versioned_write(&self.index, &self.category, id, &body, version)
                    .await
                {
                    Ok(()) => {
                        debug!(id = %id, version, "totals write accepted");
                    }
                    Err(StoreError::Conflict { .. }) => {
                        // Another writer landed between our fetch and write.
                        // Keep the original delta; the merge is redone against
                        // a fresh fetch next round.
                        retry.insert(id.clone(), *delta);
                    }
                    Err(source) => return Err(IngestError::Reconcile { source }),
                }
            }

            attempts += 1;
            if retry.is_empty() {
                return Ok(());
            }
            if attempts > self.max_retries {
                return Err(IngestError::RetriesExhausted {
                    attempts,
                    ids: retry.keys().cloned().collect(),
                });
            }
            warn!(conflicts = retry.len(), attempts, "version conflicts, retrying");
            tokio::time::sleep(self.backoff(attempts)).await;
            pending = retry;
        }
    }

    /// Exponential backoff with jitter so competing workers drift apart.
    fn backoff(&self, completed_rounds: u32) -> Duration {
        let shift = completed_rounds.saturating_sub(1).min(10);
        let base = self.base_delay.saturating_mul(1u32 << shift);
        let jitter_ms = rand::thread_rng().gen_range(0..=(base.as_millis() as u64) / 4);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Computes the write payload and expected version for one entity: additive
/// merge on the two counters, every other stored field passed through; an
/// unseen entity is created at version 0 from the delta alone.
fn merge(found: Option<&FetchedDoc>, delta: EntityDelta) -> (i64, Value) {
    match found {
        Some(doc) => {
            let mut source = doc.source.clone();
            bump(&mut source, "downloads", delta.downloads);
            bump(&mut source, "users", delta.users);
            (doc.version, Value::Object(source))
        }
        None => (
            0,
            json!({ "downloads": delta.downloads, "users": delta.users }),
        ),
    }
}

fn bump(source: &mut Map<String, Value>, key: &str, by: i64) {
    let current = source.get(key).and_then(Value::as_i64).unwrap_or(0);
    source.insert(key.to_string(), Value::from(current + by));
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::types::Document;

    /// Scripted store for driving the reconciler through its outcomes:
    /// per-id forced conflicts (with a simulated concurrent writer bumping
    /// the stored counters), one optional fatal id, and call recording.
    struct ScriptedStore {
        docs: Mutex<HashMap<String, FetchedDoc>>,
        conflicts: Mutex<HashMap<String, u32>>,
        fatal_id: Option<String>,
        fetch_not_found: bool,
        writes: Mutex<Vec<(String, Value, i64)>>,
        fetches: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedStore {
        fn new() -> Self {
            Self {
                docs: Mutex::new(HashMap::new()),
                conflicts: Mutex::new(HashMap::new()),
                fatal_id: None,
                fetch_not_found: false,
                writes: Mutex::new(Vec::new()),
                fetches: Mutex::new(Vec::new()),
            }
        }

        fn seed(&self, id: &str, version: i64, source: Value) {
            let Value::Object(source) = source else {
                panic!("source must be an object")
            };
            self.docs
                .lock()
                .unwrap()
                .insert(id.to_string(), FetchedDoc { version, source });
        }

        fn force_conflicts(&self, id: &str, times: u32) {
            self.conflicts.lock().unwrap().insert(id.to_string(), times);
        }
    }

    #[async_trait]
    impl StorePort for ScriptedStore {
        async fn bulk_write(&self, _: &str, _: &str, _: &[Document]) -> std::result::Result<(), StoreError> {
            Ok(())
        }

        async fn multi_fetch(
            &self,
            _: &str,
            _: &str,
            ids: &[String],
        ) -> std::result::Result<HashMap<String, FetchedDoc>, StoreError> {
            self.fetches.lock().unwrap().push(ids.to_vec());
            if self.fetch_not_found {
                return Err(StoreError::NotFound);
            }
            let docs = self.docs.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| docs.get(id).map(|d| (id.clone(), d.clone())))
                .collect())
        }

        async fn versioned_write(
            &self,
            _: &str,
            _: &str,
            id: &str,
            body: &Value,
            expected_version: i64,
        ) -> std::result::Result<(), StoreError> {
            self.writes
                .lock()
                .unwrap()
                .push((id.to_string(), body.clone(), expected_version));

            if self.fatal_id.as_deref() == Some(id) {
                return Err(StoreError::Transport("boom".to_string()));
            }

            let mut conflicts = self.conflicts.lock().unwrap();
            if let Some(remaining) = conflicts.get_mut(id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    // Simulate the concurrent writer that caused the
                    // conflict: two more downloads, one version ahead.
                    let mut docs = self.docs.lock().unwrap();
                    if let Some(doc) = docs.get_mut(id) {
                        doc.version += 1;
                        let d = doc.source.get("downloads").and_then(Value::as_i64).unwrap_or(0);
                        doc.source.insert("downloads".to_string(), Value::from(d + 2));
                    }
                    return Err(StoreError::Conflict { id: id.to_string() });
                }
            }

            let Value::Object(source) = body.clone() else {
                panic!("body must be an object")
            };
            self.docs.lock().unwrap().insert(
                id.to_string(),
                FetchedDoc {
                    version: expected_version + 1,
                    source,
                },
            );
            Ok(())
        }
    }

    fn deltas(entries: &[(&str, i64, i64)]) -> DeltaMap {
        let mut map = DeltaMap::new();
        for (id, downloads, users) in entries {
            let d = map.entry_or_zero(id);
            d.downloads = *downloads;
            d.users = *users;
        }
        map
    }

    fn reconciler(store: Arc<ScriptedStore>) -> TotalsReconciler {
        TotalsReconciler::new(store, "totals", "apps")
            .with_retry_policy(5, Duration::ZERO)
    }

    #[tokio::test]
    async fn merges_stored_counters_at_fetched_version() {
        let store = Arc::new(ScriptedStore::new());
        store.seed("app-1", 3, json!({"downloads": 10, "users": 4, "name": "keep me"}));

        reconciler(store.clone())
            .reconcile(deltas(&[("app-1", 5, 1)]))
            .await
            .unwrap();

        let writes = store.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        let (id, body, version) = &writes[0];
        assert_eq!(id, "app-1");
        assert_eq!(*version, 3);
        assert_eq!(body["downloads"], json!(15));
        assert_eq!(body["users"], json!(5));
        assert_eq!(body["name"], json!("keep me"));
    }

    #[tokio::test]
    async fn unseen_entity_is_created_at_version_zero() {
        let store = Arc::new(ScriptedStore::new());

        reconciler(store.clone())
            .reconcile(deltas(&[("app-1", 5, 1)]))
            .await
            .unwrap();

        let writes = store.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        let (_, body, version) = &writes[0];
        assert_eq!(*version, 0);
        assert_eq!(*body, json!({"downloads": 5, "users": 1}));
    }

    #[tokio::test]
    async fn whole_fetch_not_found_means_no_entities() {
        let mut store = ScriptedStore::new();
        store.fetch_not_found = true;
        let store = Arc::new(store);

        reconciler(store.clone())
            .reconcile(deltas(&[("app-1", 2, 0)]))
            .await
            .unwrap();

        let writes = store.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].2, 0);
    }

    #[tokio::test]
    async fn conflict_refetches_and_reapplies_the_original_delta_once() {
        let store = Arc::new(ScriptedStore::new());
        store.seed("app-1", 3, json!({"downloads": 10, "users": 4}));
        store.force_conflicts("app-1", 1);

        reconciler(store.clone())
            .reconcile(deltas(&[("app-1", 5, 1)]))
            .await
            .unwrap();

        assert_eq!(store.fetches.lock().unwrap().len(), 2);
        let writes = store.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        // First attempt merged against the stale fetch.
        assert_eq!(writes[0].1["downloads"], json!(15));
        assert_eq!(writes[0].2, 3);
        // Retry merged the same delta against the concurrent writer's state
        // (12 downloads at version 4), not on top of its own first attempt.
        assert_eq!(writes[1].1["downloads"], json!(17));
        assert_eq!(writes[1].1["users"], json!(5));
        assert_eq!(writes[1].2, 4);

        let docs = store.docs.lock().unwrap();
        let doc = docs.get("app-1").unwrap();
        assert_eq!(doc.version, 5);
        assert_eq!(doc.source["downloads"], json!(17));
    }

    #[tokio::test]
    async fn non_conflict_write_failure_aborts_remaining_entities() {
        let mut store = ScriptedStore::new();
        store.fatal_id = Some("app-a".to_string());
        let store = Arc::new(store);

        let err = reconciler(store.clone())
            .reconcile(deltas(&[("app-a", 1, 0), ("app-b", 2, 0)]))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Reconcile { .. }));
        // Entities are visited in order; app-b was never attempted.
        let writes = store.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "app-a");
    }

    #[tokio::test]
    async fn gives_up_after_the_retry_budget() {
        let store = Arc::new(ScriptedStore::new());
        store.seed("app-1", 1, json!({"downloads": 0, "users": 0}));
        store.force_conflicts("app-1", 100);

        let err = TotalsReconciler::new(store.clone(), "totals", "apps")
            .with_retry_policy(2, Duration::ZERO)
            .reconcile(deltas(&[("app-1", 1, 1)]))
            .await
            .unwrap_err();

        match err {
            IngestError::RetriesExhausted { attempts, ids } => {
                assert_eq!(attempts, 3);
                assert_eq!(ids, vec!["app-1".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.writes.lock().unwrap().len(), 3);
        assert_eq!(store.fetches.lock().unwrap().len(), 3);
    }
}
