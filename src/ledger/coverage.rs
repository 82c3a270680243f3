//! Coverage of existing documents by recent runs

use crate::error::{LedgerError, Result};
use crate::types::{RunRecord, document_key};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// One existing document joined with its latest recent run
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CoverageRow {
    /// Document path
    pub document: PathBuf,
    /// Normalized merge key
    pub key: String,
    /// File name part of the key
    pub last_name: String,
    /// Latest run younger than the age limit
    #[serde(skip)]
    pub record: Option<RunRecord>,
}

impl CoverageRow {
    /// Share of blocks that were executed, `None` without a run or blocks
    pub fn executed_ratio(&self) -> Option<f64> {
        let r = self.record.as_ref()?;
        (r.counters.blocks > 0).then(|| r.counters.executed as f64 / r.counters.blocks as f64)
    }

    /// Share of blocks that executed without error
    pub fn valid_ratio(&self) -> Option<f64> {
        let r = self.record.as_ref()?;
        (r.counters.blocks > 0).then(|| r.counters.valid as f64 / r.counters.blocks as f64)
    }
}

/// Totals over a coverage report
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CoverageSummary {
    /// Documents in the report
    pub documents: usize,
    /// Documents with a recent run
    pub covered: usize,
    /// Blocks over all covered documents
    pub blocks: usize,
    /// Executed blocks
    pub executed: usize,
    /// Blocks executed without error
    pub valid: usize,
}

impl CoverageSummary {
    /// Sum the counters of every covered row
    pub fn from_rows(rows: &[CoverageRow]) -> Self {
        rows.iter().fold(
            Self {
                documents: rows.len(),
                ..Default::default()
            },
            |mut acc, row| {
                if let Some(r) = &row.record {
                    acc.covered += 1;
                    acc.blocks += r.counters.blocks;
                    acc.executed += r.counters.executed;
                    acc.valid += r.counters.valid;
                }
                acc
            },
        )
    }

    /// Executed blocks over all blocks (1.0 when there are none)
    pub fn executed_ratio(&self) -> f64 {
        ratio(self.executed, self.blocks)
    }

    /// Valid blocks over all blocks (1.0 when there are none)
    pub fn valid_ratio(&self) -> f64 {
        ratio(self.valid, self.blocks)
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        part as f64 / total as f64
    }
}

/// Join the ledger with the documents that exist
///
/// Records older than `too_old_days` before `now` are dropped, the newest
/// remaining record per key is kept, and every document gets one row
/// (with or without a record). Records without a matching document are
/// left out. Rows are sorted by key. Checkpoint copies of documents are
/// ignored.
///
/// # Errors
///
/// [`LedgerError::DuplicateKey`] when two documents share a key or a file name.
pub fn coverage(
    records: &[RunRecord],
    documents: &[PathBuf],
    too_old_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<CoverageRow>> {
    let cutoff = now - chrono::Duration::days(i64::from(too_old_days));

    let mut latest: HashMap<&str, &RunRecord> = HashMap::new();
    for record in records.iter().filter(|r| r.timestamp > cutoff) {
        match latest.get(record.key.as_str()) {
            Some(kept) if kept.timestamp >= record.timestamp => {}
            _ => {
                latest.insert(record.key.as_str(), record);
            }
        }
    }

    let mut rows: Vec<CoverageRow> = documents
        .iter()
        .filter(|d| !is_checkpoint(d))
        .map(|document| {
            let key = document_key(document);
            let last_name = key.rsplit('/').next().unwrap_or(&key).to_string();
            CoverageRow {
                document: document.clone(),
                record: latest.get(key.as_str()).map(|r| (*r).clone()),
                key,
                last_name,
            }
        })
        .collect();
    rows.sort_by(|a, b| a.key.cmp(&b.key));

    check_unique("key", rows.iter().map(|r| r.key.as_str()))?;
    check_unique("last_name", rows.iter().map(|r| r.last_name.as_str()))?;
    Ok(rows)
}

fn is_checkpoint(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == ".ipynb_checkpoints")
}

fn check_unique<'a>(column: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for name in names {
        *seen.entry(name).or_default() += 1;
    }
    if seen.values().any(|&n| n > 1) {
        let mut all: Vec<String> = Vec::new();
        for (name, n) in seen {
            all.extend(std::iter::repeat_n(name.to_string(), n));
        }
        return Err(LedgerError::DuplicateKey {
            column: column.to_string(),
            names: all,
        }
        .into());
    }
    Ok(())
}
