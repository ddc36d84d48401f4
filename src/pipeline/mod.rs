pub mod bulk;
pub mod ingest;
pub mod partition;
pub mod reconcile;
pub mod totals;
