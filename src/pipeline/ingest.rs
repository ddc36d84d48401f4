use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::app::ports::StorePort;
use crate::error::{IngestError, Result};
use crate::pipeline::partition::BatchPartitioner;
use crate::pipeline::reconcile::TotalsReconciler;
use crate::types::Item;

/// Result of one pipeline run.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub buckets_written: usize,
    pub documents_written: usize,
    pub entities_reconciled: usize,
}

/// One-batch orchestration: partition, one bulk write per bucket, then fold
/// the collected deltas into the stored totals. Store calls are sequential;
/// safety against other concurrently running pipelines is entirely the
/// store's version check, exercised by the reconciler.
pub struct IngestionPipeline {
    partitioner: BatchPartitioner,
    store: Arc<dyn StorePort>,
    reconciler: TotalsReconciler,
}

impl IngestionPipeline {
    pub fn new(
        partitioner: BatchPartitioner,
        store: Arc<dyn StorePort>,
        reconciler: TotalsReconciler,
    ) -> Self {
        Self {
            partitioner,
            store,
            reconciler,
        }
    }

    #[instrument(skip(self, batch), fields(items = batch.len()))]
    pub async fn run(&self, batch: Vec<Item>) -> Result<IngestReport> {
        counter!("usage_ingest_runs_total").increment(1);
        let t_run = std::time::Instant::now();

        let parts = self.partitioner.partition(batch);
        let entities = parts.deltas.len();

        // One bulk request per bucket. A failed bucket aborts the rest of the
        // batch; buckets already sent stay committed (no cross-bucket
        // transaction exists).
        let mut documents = 0;
        let buckets = parts.buckets.len();
        for (key, docs) in parts.buckets {
            self.store
                .bulk_write(&key.index, &key.category, &docs)
                .await
                .map_err(|source| IngestError::BucketWrite {
                    index: key.index.clone(),
                    category: key.category.clone(),
                    source,
                })?;
            documents += docs.len();
            counter!("usage_ingest_documents_written_total").increment(docs.len() as u64);
        }

        if !parts.deltas.is_empty() {
            self.reconciler.reconcile(parts.deltas).await?;
            counter!("usage_ingest_entities_reconciled_total").increment(entities as u64);
        }

        histogram!("usage_ingest_batch_duration_seconds").record(t_run.elapsed().as_secs_f64());
        info!(buckets, documents, entities, "batch ingested");

        Ok(IngestReport {
            buckets_written: buckets,
            documents_written: documents,
            entities_reconciled: entities,
        })
    }
}
