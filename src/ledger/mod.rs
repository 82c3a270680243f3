//! Run ledger
//!
//! The ledger is the only state that outlives a process: one row per
//! document key, holding the outcome of that document's most recent run.
//!
//! Writers never append blindly. Every [`RunLedger::merge`] re-reads the
//! stored rows, keeps the newest record per key, and writes the whole
//! ledger back, so independent batches finalizing one after the other do
//! not lose each other's rows.
//!
//! ## Submodules
//!
//! - [`tsv`] - Tab-separated file backend
//! - [`coverage`] - Join of the ledger with the documents that exist on disk

use crate::config::{LedgerBackend, LedgerConfig};
use crate::error::Result;
use crate::types::RunRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod coverage;
pub mod tsv;

pub use coverage::{CoverageRow, CoverageSummary, coverage};
pub use tsv::TsvLedger;

/// Persistent store of run records
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Every stored record, one per key
    async fn load(&self) -> Result<Vec<RunRecord>>;

    /// Merge new records into the store, newest record per key wins
    async fn merge(&self, records: &[RunRecord]) -> Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Keep the newest record per key, sorted by key
///
/// On equal timestamps the incoming record replaces the stored one.
pub fn merge_newest(existing: Vec<RunRecord>, incoming: &[RunRecord]) -> Vec<RunRecord> {
    let mut by_key: BTreeMap<String, RunRecord> = BTreeMap::new();
    let candidates = existing.into_iter().chain(incoming.iter().cloned());
    for record in candidates {
        match by_key.get(&record.key) {
            Some(kept) if kept.timestamp > record.timestamp => {}
            _ => {
                by_key.insert(record.key.clone(), record);
            }
        }
    }
    by_key.into_values().collect()
}

/// Open the ledger selected by the configuration
pub async fn open(config: &LedgerConfig) -> Result<Arc<dyn RunLedger>> {
    match config.backend {
        LedgerBackend::Tsv => Ok(Arc::new(TsvLedger::new(&config.path))),
        LedgerBackend::Sqlite => Ok(Arc::new(crate::db::Database::new(&config.path).await?)),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionCounters;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    pub(crate) fn record(key: &str, secs: i64, success: bool) -> RunRecord {
        RunRecord {
            key: key.to_string(),
            name: format!("/docs/{}", key),
            success,
            duration: Duration::from_millis(1500),
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            counters: ExecutionCounters {
                blocks: 4,
                executed: 3,
                valid: 3,
            },
            error_code: None,
            captured_log: String::new(),
        }
    }

    #[test]
    fn newer_record_replaces_older_one() {
        let existing = vec![record("a/b/k.ipynb", 0, false)];
        let merged = merge_newest(existing, &[record("a/b/k.ipynb", 10, true)]);

        assert_eq!(merged.len(), 1);
        assert!(merged[0].success);
        assert_eq!(merged[0].timestamp, record("x", 10, true).timestamp);
    }

    #[test]
    fn older_incoming_record_is_ignored() {
        let existing = vec![record("k", 10, true)];
        let merged = merge_newest(existing, &[record("k", 0, false)]);

        assert_eq!(merged.len(), 1);
        assert!(merged[0].success);
    }

    #[test]
    fn distinct_keys_are_all_kept_sorted() {
        let existing = vec![record("b", 0, true)];
        let merged = merge_newest(existing, &[record("c", 0, true), record("a", 0, true)]);

        let keys: Vec<_> = merged.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
