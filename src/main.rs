use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use usage_ingest::config::Config;
use usage_ingest::infra::clock::SystemClock;
use usage_ingest::infra::es_store::EsStore;
use usage_ingest::infra::ids::UrlSafeIds;
use usage_ingest::logging::init_logging;
use usage_ingest::pipeline::ingest::IngestionPipeline;
use usage_ingest::pipeline::partition::BatchPartitioner;
use usage_ingest::pipeline::reconcile::TotalsReconciler;
use usage_ingest::types::Item;

#[derive(Parser)]
#[command(name = "usage-ingest")]
#[command(about = "Usage-event ingestion into a document store")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the store-side index templates
    Setup,
    /// Ingest a batch of usage events from a JSON file
    Ingest {
        /// JSON file holding an array of usage-event objects
        #[arg(long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let store = Arc::new(EsStore::new(&config.store.url));

    match cli.command {
        Commands::Setup => {
            store
                .configure_templates()
                .await
                .context("template setup failed")?;
            println!("✅ Store templates configured");
        }
        Commands::Ingest { input } => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("reading batch file {}", input.display()))?;
            let batch: Vec<Item> = serde_json::from_str(&raw)?;
            info!("Loaded batch of {} items from {}", batch.len(), input.display());

            let partitioner = BatchPartitioner::new(
                config.store.id_field.clone(),
                Arc::new(SystemClock),
                Arc::new(UrlSafeIds),
            );
            let reconciler = TotalsReconciler::new(
                store.clone(),
                config.store.totals_index.clone(),
                config.store.totals_category.clone(),
            )
            .with_retry_policy(
                config.store.max_retries,
                Duration::from_millis(config.store.retry_base_delay_ms),
            );
            let pipeline = IngestionPipeline::new(partitioner, store, reconciler);

            let report = pipeline.run(batch).await?;
            println!("\n📊 Ingestion results:");
            println!("   Buckets written: {}", report.buckets_written);
            println!("   Documents written: {}", report.documents_written);
            println!("   Entities reconciled: {}", report.entities_reconciled);
        }
    }

    Ok(())
}
