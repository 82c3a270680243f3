//! # nbpress
//!
//! Executes notebook documents against a live interpreter and publishes them
//! in several formats.
//!
//! ## Design Philosophy
//!
//! nbpress is designed to be:
//! - **Library-first** - No CLI, purely a Rust crate for embedding in build tools
//! - **Incremental** - Artifacts newer than their document are never rebuilt
//! - **Failure-isolating** - One broken document never aborts a batch
//! - **Pluggable** - Engines, converters and ledgers sit behind traits
//!
//! ## Quick Start
//!
//! ```no_run
//! use nbpress::{BatchExecutor, BatchEntry, Config, ConversionPipeline, RunOptions, Runner};
//! use std::path::{Path, PathBuf};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     // Execute the documents and record the outcome
//!     let runner = Arc::new(Runner::from_config(&config));
//!     let executor = BatchExecutor::new(runner, config.batch.clone());
//!     let documents = vec![PathBuf::from("notebooks/intro.ipynb")];
//!     let entries: Vec<BatchEntry> = documents.iter().cloned().map(BatchEntry::from).collect();
//!     let options = RunOptions::from_config(&config, "build/run");
//!     let report = executor.execute_list(Path::new("build/run"), &entries, &options).await?;
//!
//!     let ledger = nbpress::ledger::open(&config.ledger).await?;
//!     nbpress::batch::finalize(report, Some(ledger.as_ref())).await?;
//!
//!     // Publish them
//!     let pipeline = ConversionPipeline::from_config(&config.conversion);
//!     pipeline
//!         .run(&documents, Path::new("build/notebooks"), Path::new("site/notebooks"))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Batch execution of many documents
pub mod batch;
/// Configuration types
pub mod config;
/// Multi-format conversion pipeline
pub mod conversion;
/// SQLite run ledger
pub mod db;
/// Notebook document model
pub mod document;
/// Execution engines
pub mod engine;
/// Error types
pub mod error;
/// Persistent run history
pub mod ledger;
/// Copying artifacts to their publication directory
pub mod materialize;
/// Remote resource cache
pub mod resource_cache;
/// Single document execution
pub mod runner;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use batch::{BatchEntry, BatchExecutor, BatchReport, DocumentRecord};
pub use config::Config;
pub use conversion::{ConversionJob, ConversionPipeline, ConversionReport};
pub use db::Database;
pub use document::{Block, BlockKind, Document, Output};
pub use engine::{ExecutionEngine, ProcessEngine};
pub use error::{
    BlockRef, ConversionError, DocumentError, Error, ExecutionError, LedgerError, Result,
};
pub use ledger::{RunLedger, TsvLedger};
pub use runner::{RunOptions, Runner};
pub use types::{
    ExecutionCounters, ExecutionResult, JobState, RunRecord, TargetFormat, Validity,
};
