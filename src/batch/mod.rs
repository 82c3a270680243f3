//! Batch executor
//!
//! Runs a list of documents through the [`Runner`], one record per document.
//! A failing document never stops the batch: its error is stored in its
//! [`DocumentRecord`] and only surfaces when the caller invokes [`finalize`].

use crate::config::BatchConfig;
use crate::error::{DocumentError, Error, ExecutionError, Result};
use crate::ledger::RunLedger;
use crate::resource_cache::ResourceCache;
use crate::runner::{RunOptions, Runner};
use crate::types::{ExecutionCounters, RunRecord, document_key};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One document to run, with an optional pre-amble
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchEntry {
    /// Document path
    pub document: PathBuf,
    /// Code run before the document's first block
    pub preamble: Option<String>,
}

impl From<PathBuf> for BatchEntry {
    fn from(document: PathBuf) -> Self {
        Self {
            document,
            preamble: None,
        }
    }
}

impl From<&Path> for BatchEntry {
    fn from(document: &Path) -> Self {
        PathBuf::from(document).into()
    }
}

impl<S: Into<String>> From<(PathBuf, S)> for BatchEntry {
    fn from((document, preamble): (PathBuf, S)) -> Self {
        Self {
            document,
            preamble: Some(preamble.into()),
        }
    }
}

/// Outcome of one document of a batch
#[derive(Debug)]
pub struct DocumentRecord {
    /// Document path as given
    pub name: String,
    /// Whether the document ran and its executed copy exists
    pub success: bool,
    /// Execution log (empty when execution never started)
    pub captured_log: String,
    /// Wall-clock time, including failed attempts
    pub elapsed: Duration,
    /// When the document finished
    pub timestamp: DateTime<Utc>,
    /// Seconds spent per block, keyed by block label
    pub timings: BTreeMap<String, f64>,
    /// Block counts
    pub counters: ExecutionCounters,
    /// Where the executed copy is written
    pub output: PathBuf,
    /// Why the document failed
    pub error: Option<Error>,
}

impl DocumentRecord {
    /// Ledger row for this record
    pub fn to_run_record(&self) -> RunRecord {
        let captured_log = match &self.error {
            Some(e) if self.captured_log.is_empty() => e.to_string(),
            _ => self.captured_log.clone(),
        };
        RunRecord {
            key: document_key(Path::new(&self.name)),
            name: self.name.clone(),
            success: self.success,
            duration: self.elapsed,
            timestamp: self.timestamp,
            counters: self.counters,
            error_code: self.error.as_ref().map(|e| e.error_code().to_string()),
            captured_log,
        }
    }
}

/// Records of a batch, keyed (and ordered) by document name
#[derive(Debug, Default)]
pub struct BatchReport {
    /// One record per document
    pub records: BTreeMap<String, DocumentRecord>,
}

impl BatchReport {
    /// Whether no document was run
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Failed records, in name order
    pub fn failures(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.records.values().filter(|r| !r.success)
    }

    /// One line per document: file name, success flag, elapsed seconds
    pub fn summary(&self) -> String {
        self.records
            .values()
            .map(|r| {
                format!(
                    "{} {} {:.3}s\n",
                    file_name(&r.name),
                    r.success,
                    r.elapsed.as_secs_f64()
                )
            })
            .collect()
    }

    /// Ledger rows for every record
    pub fn run_records(&self) -> Vec<RunRecord> {
        self.records.values().map(DocumentRecord::to_run_record).collect()
    }
}

/// Runs lists of documents
pub struct BatchExecutor {
    runner: Arc<Runner>,
    config: BatchConfig,
}

impl BatchExecutor {
    /// Create an executor around a runner
    pub fn new(runner: Arc<Runner>, config: BatchConfig) -> Self {
        Self { runner, config }
    }

    /// Where the executed copy of `document` goes: `<folder>/<prefix><file name>`
    pub fn output_path(&self, folder: &Path, document: &Path) -> PathBuf {
        let name = document
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        folder.join(format!("{}{}", self.config.output_prefix, name))
    }

    /// Execute every entry with `folder` as working directory
    ///
    /// Remote resources are fetched once before the first document.
    ///
    /// # Errors
    ///
    /// The whole batch fails before anything runs when two entries would
    /// write the same executed copy (a document listed twice, or two documents
    /// with the same file name), or when the pre-fetch fails. Document
    /// failures are stored in their records.
    pub async fn execute_list(
        &self,
        folder: &Path,
        entries: &[BatchEntry],
        options: &RunOptions,
    ) -> Result<BatchReport> {
        let mut outputs = HashSet::new();
        for entry in entries {
            if !outputs.insert(self.output_path(folder, &entry.document)) {
                return Err(DocumentError::InvalidName {
                    path: entry.document.clone(),
                    reason: "another batch entry writes the same executed copy".into(),
                }
                .into());
            }
        }

        let cache = ResourceCache::new(folder);
        cache.ensure(&options.cache_urls, self.runner.fetcher()).await?;

        let options = options.clone().with_working_dir(folder);
        let concurrency = self.config.max_concurrent_documents.max(1);
        info!(
            folder = ?folder,
            documents = entries.len(),
            concurrency,
            "starting batch"
        );

        let records: Vec<DocumentRecord> = stream::iter(entries.iter().enumerate())
            .map(|(index, entry)| {
                let options = &options;
                async move {
                    info!(index, document = ?entry.document, "running document");
                    self.run_entry(folder, entry, options).await
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for record in records {
            report.records.insert(record.name.clone(), record);
        }
        Ok(report)
    }

    async fn run_entry(&self, folder: &Path, entry: &BatchEntry, options: &RunOptions) -> DocumentRecord {
        let started = Instant::now();
        let output = self.output_path(folder, &entry.document);
        let mut options = options.clone();
        options.preamble = entry.preamble.clone();

        let mut record = DocumentRecord {
            name: entry.document.to_string_lossy().into_owned(),
            success: false,
            captured_log: String::new(),
            elapsed: Duration::ZERO,
            timestamp: Utc::now(),
            timings: BTreeMap::new(),
            counters: ExecutionCounters::default(),
            output: output.clone(),
            error: None,
        };

        match self.runner.run_file(&entry.document, Some(&output), &options).await {
            Ok(result) => {
                record.timings = result.timing_map();
                record.counters = result.counters;
                record.captured_log = result.captured_log;
                record.error = match (result.success, result.raised_error) {
                    (false, Some(error)) => Some(error.into()),
                    (false, None) => Some(Error::Other("execution failed".into())),
                    (true, _) => match tokio::fs::try_exists(&output).await {
                        Ok(true) => None,
                        Ok(false) => Some(ExecutionError::MissingOutput { path: output }.into()),
                        Err(e) => Some(e.into()),
                    },
                };
            }
            Err(e) => record.error = Some(e),
        }

        record.success = record.error.is_none();
        record.elapsed = started.elapsed();
        record.timestamp = Utc::now();
        if let Some(error) = &record.error {
            warn!(
                document = %record.name,
                error = %error,
                code = error.error_code(),
                "document failed"
            );
        }
        record
    }
}

/// Report a batch and surface its first failure
///
/// Logs one summary line per document, merges every record into `ledger`
/// when given, then returns the first failure in name order.
///
/// # Errors
///
/// An empty report, a ledger failure, or the first failed document's error.
pub async fn finalize(report: BatchReport, ledger: Option<&dyn RunLedger>) -> Result<()> {
    if report.is_empty() {
        return Err(Error::Other("no document was run".into()));
    }

    for record in report.failures() {
        warn!(
            document = file_name(&record.name),
            error = ?record.error,
            "failed document"
        );
    }
    for record in report.records.values() {
        info!(
            document = file_name(&record.name),
            success = record.success,
            elapsed_ms = record.elapsed.as_millis() as u64,
            "batch result"
        );
    }

    if let Some(ledger) = ledger {
        ledger.merge(&report.run_records()).await?;
    }

    let first_failure = report
        .records
        .into_values()
        .find(|r| !r.success)
        .and_then(|r| r.error);
    match first_failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn file_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}
