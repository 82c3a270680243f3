//! Tab-separated ledger file

use super::{RunLedger, merge_newest};
use crate::error::{LedgerError, Result};
use crate::types::{ExecutionCounters, RunRecord};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Column order of written ledgers
pub const COLUMNS: [&str; 10] = [
    "key",
    "name",
    "success",
    "duration",
    "timestamp",
    "blocks",
    "executed",
    "valid",
    "error_code",
    "captured_log",
];

/// Ledger stored as a tab-separated file with a header row
///
/// Reads parse the whole file; writes rewrite it through a temporary file
/// renamed over the original. Merges within one process are serialized.
pub struct TsvLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TsvLedger {
    /// Ledger backed by `path` (created on first merge)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Ledger file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<RunRecord>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, records: &[RunRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut partial = self.path.as_os_str().to_owned();
        partial.push(format!(".{}.tmp", std::process::id()));
        let partial = PathBuf::from(partial);

        tokio::fs::write(&partial, render(records)).await?;
        tokio::fs::rename(&partial, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RunLedger for TsvLedger {
    async fn load(&self) -> Result<Vec<RunRecord>> {
        self.read().await
    }

    async fn merge(&self, records: &[RunRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let existing = self.read().await?;
        let before = existing.len();
        let merged = merge_newest(existing, records);
        self.write(&merged).await?;
        info!(
            path = ?self.path,
            incoming = records.len(),
            before,
            after = merged.len(),
            "ledger merged"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tsv"
    }
}

/// Render records as a ledger file, header first
pub fn render(records: &[RunRecord]) -> String {
    let mut out = COLUMNS.join("\t");
    out.push('\n');
    for r in records {
        let fields = [
            escape(&r.key),
            escape(&r.name),
            r.success.to_string(),
            format!("{:.6}", r.duration.as_secs_f64()),
            r.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            r.counters.blocks.to_string(),
            r.counters.executed.to_string(),
            r.counters.valid.to_string(),
            r.error_code.as_deref().map(escape).unwrap_or_default(),
            escape(&r.captured_log),
        ];
        out.push_str(&fields.join("\t"));
        out.push('\n');
    }
    out
}

/// Parse a ledger file
///
/// Columns are matched by header name, so files with extra or reordered
/// columns still load. `key`, `success` and `timestamp` are required.
pub fn parse(text: &str) -> Result<Vec<RunRecord>> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let Some((_, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: HashMap<&str, usize> = header
        .split('\t')
        .enumerate()
        .map(|(i, name)| (name.trim(), i))
        .collect();
    for required in ["key", "success", "timestamp"] {
        if !columns.contains_key(required) {
            return Err(malformed(1, format!("missing column '{}'", required)));
        }
    }

    let mut records = Vec::new();
    for (index, line) in lines {
        let line_no = index + 1;
        let fields: Vec<&str> = line.split('\t').collect();
        let field = |name: &str| columns.get(name).and_then(|&i| fields.get(i)).copied();

        let key = field("key")
            .map(unescape)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| malformed(line_no, "empty key".into()))?;
        let success = match field("success") {
            Some("true") | Some("True") => true,
            Some("false") | Some("False") => false,
            other => return Err(malformed(line_no, format!("invalid success flag {:?}", other))),
        };
        let timestamp = field("timestamp")
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| malformed(line_no, "invalid timestamp".into()))?;
        let duration = field("duration")
            .filter(|d| !d.is_empty())
            .map(|d| {
                d.parse::<f64>()
                    .ok()
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .ok_or_else(|| malformed(line_no, format!("invalid duration '{}'", d)))
            })
            .transpose()?
            .unwrap_or_default();
        let count = |name: &str| -> Result<usize> {
            match field(name).filter(|c| !c.is_empty()) {
                Some(c) => c
                    .parse()
                    .map_err(|_| malformed(line_no, format!("invalid {} '{}'", name, c))),
                None => Ok(0),
            }
        };

        records.push(RunRecord {
            name: field("name").map(unescape).unwrap_or_else(|| key.clone()),
            key,
            success,
            duration,
            timestamp,
            counters: ExecutionCounters {
                blocks: count("blocks")?,
                executed: count("executed")?,
                valid: count("valid")?,
            },
            error_code: field("error_code").filter(|c| !c.is_empty()).map(unescape),
            captured_log: field("captured_log").map(unescape).unwrap_or_default(),
        });
    }
    debug!(records = records.len(), "ledger parsed");
    Ok(records)
}

fn malformed(line: usize, reason: String) -> crate::Error {
    LedgerError::Malformed { line, reason }.into()
}

/// Make a value fit on one tab-separated line; carriage returns are dropped
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape`]
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
