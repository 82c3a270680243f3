//! Database layer for nbpress
//!
//! SQLite store for the run ledger, used in place of the tab-separated file
//! when concurrent batches need a transactional merge.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`runs`]: Run records and the [`RunLedger`](crate::ledger::RunLedger) implementation

use crate::types::{ExecutionCounters, RunRecord};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::time::Duration;

mod migrations;
mod runs;

/// Run record from database
#[derive(Debug, Clone, FromRow)]
pub struct RunRow {
    /// Normalized document key (primary key)
    pub key: String,
    /// Document path as given to the batch
    pub name: String,
    /// Whether the run succeeded (0 = no, 1 = yes)
    pub success: i32,
    /// Run duration in milliseconds
    pub duration_ms: i64,
    /// Unix timestamp in microseconds when the run finished
    pub finished_at_us: i64,
    /// Blocks in the document
    pub blocks: i64,
    /// Code blocks sent to the engine
    pub executed: i64,
    /// Executed blocks without error
    pub valid: i64,
    /// Machine-readable error code of a failed run
    pub error_code: Option<String>,
    /// Execution log
    pub captured_log: String,
}

impl From<RunRow> for RunRecord {
    fn from(row: RunRow) -> Self {
        use chrono::{TimeZone, Utc};

        RunRecord {
            key: row.key,
            name: row.name,
            success: row.success != 0,
            duration: Duration::from_millis(row.duration_ms.max(0) as u64),
            timestamp: Utc
                .timestamp_micros(row.finished_at_us)
                .single()
                .unwrap_or_else(Utc::now),
            counters: ExecutionCounters {
                blocks: row.blocks.max(0) as usize,
                executed: row.executed.max(0) as usize,
                valid: row.valid.max(0) as usize,
            },
            error_code: row.error_code,
            captured_log: row.captured_log,
        }
    }
}

/// Database handle for nbpress
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
