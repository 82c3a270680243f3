//! Core types for nbpress

use crate::error::{BlockRef, ExecutionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Outcome of the per-block validity predicate
///
/// Replaces a tri-state boolean: `Stop` is an intentional partial run, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Validity {
    /// Run the block
    Execute,
    /// Leave the block untouched and move on
    Skip,
    /// End the run before this block
    Stop,
}

/// Publication format produced by the conversion pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFormat {
    /// Copy of the source document
    #[serde(alias = "ipynb")]
    Notebook,
    /// Static HTML page
    Html,
    /// LaTeX source
    Latex,
    /// Compiled PDF (LaTeX conversion, then compilation)
    Pdf,
    /// reStructuredText page
    Rst,
    /// Plain script extracted from the code blocks
    #[serde(alias = "py")]
    Python,
    /// Word document (HTML conversion, then transcoding)
    #[serde(alias = "word")]
    Docx,
}

impl TargetFormat {
    /// Extension of the final artifact
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Notebook => "ipynb",
            TargetFormat::Html => "html",
            TargetFormat::Latex => "tex",
            TargetFormat::Pdf => "pdf",
            TargetFormat::Rst => "rst",
            TargetFormat::Python => "py",
            TargetFormat::Docx => "docx",
        }
    }

    /// Format passed to the converter's `--to` flag, `None` when no conversion runs
    pub fn converter_target(&self) -> Option<&'static str> {
        match self {
            TargetFormat::Notebook => None,
            TargetFormat::Html | TargetFormat::Docx => Some("html"),
            TargetFormat::Latex | TargetFormat::Pdf => Some("latex"),
            TargetFormat::Rst => Some("rst"),
            TargetFormat::Python => Some("python"),
        }
    }

    /// Extension of the file the primary conversion writes
    pub fn primary_extension(&self) -> &'static str {
        match self {
            TargetFormat::Pdf => "tex",
            TargetFormat::Docx => "html",
            other => other.extension(),
        }
    }

    /// Whether a second tool runs on the primary artifact
    pub fn secondary_stage(&self) -> Option<SecondaryStage> {
        match self {
            TargetFormat::Pdf => Some(SecondaryStage::Compile),
            TargetFormat::Docx => Some(SecondaryStage::Transcode),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TargetFormat::Notebook => "notebook",
            TargetFormat::Html => "html",
            TargetFormat::Latex => "latex",
            TargetFormat::Pdf => "pdf",
            TargetFormat::Rst => "rst",
            TargetFormat::Python => "python",
            TargetFormat::Docx => "docx",
        };
        f.write_str(name)
    }
}

/// Second conversion step of a two-stage format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecondaryStage {
    /// LaTeX compiler run from the intermediate file's directory
    Compile,
    /// HTML to word-processor transcoding
    Transcode,
}

/// State of one (document, format) conversion job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Not started
    Pending,
    /// Primary conversion done
    Converted,
    /// Second stage done (compiled or transcoded)
    SecondaryConverted,
    /// Format-specific fixes applied
    PostProcessed,
    /// Artifacts copied to the destination
    Materialized,
    /// Failed; the job's error is kept in its report
    Error,
}

/// Wall-clock time spent in one block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockTiming {
    /// Which block
    pub block: BlockRef,
    /// Time between request and reply
    pub elapsed: Duration,
}

/// Block counts of one execution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounters {
    /// Blocks in the document
    pub blocks: usize,
    /// Code blocks sent to the engine
    pub executed: usize,
    /// Executed code blocks that did not raise
    pub valid: usize,
}

/// Outcome of executing one document
#[must_use]
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    /// Time spent per executed block, in execution order
    pub timings: Vec<BlockTiming>,
    /// Block counts
    pub counters: ExecutionCounters,
    /// Whether no block failed
    pub success: bool,
    /// Append-only execution log
    pub captured_log: String,
    /// The error that ended (or marked) the run
    pub raised_error: Option<ExecutionError>,
    /// Index of the block the validity predicate stopped at
    pub stopped_at: Option<usize>,
}

impl ExecutionResult {
    /// Turn a failed result into its error
    pub fn into_result(self) -> crate::Result<Self> {
        match (&self.raised_error, self.success) {
            (Some(error), false) => Err(error.clone().into()),
            _ => Ok(self),
        }
    }

    /// Per-block timings keyed by block label, in seconds
    pub fn timing_map(&self) -> std::collections::BTreeMap<String, f64> {
        self.timings
            .iter()
            .map(|t| (t.block.to_string(), t.elapsed.as_secs_f64()))
            .collect()
    }
}

/// One row of the run ledger
#[derive(Clone, Debug, PartialEq)]
pub struct RunRecord {
    /// Normalized merge key, see [`document_key`]
    pub key: String,
    /// Document path as given to the batch
    pub name: String,
    /// Whether the run succeeded
    pub success: bool,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// When the run finished
    pub timestamp: DateTime<Utc>,
    /// Block counts
    pub counters: ExecutionCounters,
    /// Machine-readable error code of a failed run
    pub error_code: Option<String>,
    /// Execution log (or error text for a failed run)
    pub captured_log: String,
}

/// Normalized key of a document path: its last three components, forward slashes, lowercase
///
/// Documents executed from different checkouts still merge onto the same ledger row.
pub fn document_key(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    let parts: Vec<&str> = text
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    let start = parts.len().saturating_sub(3);
    parts[start..].join("/").to_lowercase()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_key_keeps_last_three_components() {
        assert_eq!(
            document_key(Path::new("/home/u/Repo/_doc/notebooks/Intro.ipynb")),
            "_doc/notebooks/intro.ipynb"
        );
        assert_eq!(
            document_key(Path::new(r"C:\work\_doc\notebooks\Intro.ipynb")),
            "_doc/notebooks/intro.ipynb"
        );
        assert_eq!(document_key(Path::new("a.ipynb")), "a.ipynb");
    }

    #[test]
    fn format_stages() {
        assert_eq!(TargetFormat::Pdf.converter_target(), Some("latex"));
        assert_eq!(TargetFormat::Pdf.primary_extension(), "tex");
        assert_eq!(
            TargetFormat::Pdf.secondary_stage(),
            Some(SecondaryStage::Compile)
        );
        assert_eq!(TargetFormat::Docx.primary_extension(), "html");
        assert_eq!(TargetFormat::Notebook.converter_target(), None);
        assert_eq!(TargetFormat::Python.secondary_stage(), None);
    }

    #[test]
    fn format_aliases() {
        let formats: Vec<TargetFormat> =
            serde_json::from_str(r#"["ipynb", "py", "word", "pdf"]"#).unwrap();
        assert_eq!(
            formats,
            vec![
                TargetFormat::Notebook,
                TargetFormat::Python,
                TargetFormat::Docx,
                TargetFormat::Pdf
            ]
        );
    }

    #[test]
    fn failed_result_converts_to_error() {
        let result = ExecutionResult {
            timings: vec![],
            counters: ExecutionCounters::default(),
            success: false,
            captured_log: String::new(),
            raised_error: Some(ExecutionError::MissingOutput {
                path: "out.ipynb".into(),
            }),
            stopped_at: None,
        };

        let error = result.into_result().unwrap_err();
        assert_eq!(error.error_code(), "missing_output");
    }
}
