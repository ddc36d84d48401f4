pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// Application-facing ports and the store adapters behind them
pub mod app;
pub mod infra;

// Batch partitioning, bulk encoding, and totals reconciliation
pub mod pipeline;
