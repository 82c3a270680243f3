//! Configuration types for nbpress

use crate::error::{Error, Result};
use crate::types::TargetFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Execution engine settings
///
/// The engine is an external interpreter process driven over a line-based
/// request/response channel (see [`crate::engine`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the interpreter executable (auto-detected if None)
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Engine (kernel) name, recorded in logs (default: "python")
    #[serde(default = "default_engine_name")]
    pub engine_name: String,

    /// Engine log level: 0, 10, 20, 30, 40 or 50 (default: 30)
    #[serde(default = "default_log_level")]
    pub log_level: u8,

    /// Extra command line arguments passed to the interpreter
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Whether to search PATH for the interpreter if `program` is not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: None,
            engine_name: default_engine_name(),
            log_level: default_log_level(),
            extra_args: Vec::new(),
            search_path: true,
        }
    }
}

/// Execution runner settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum time to wait for the engine to answer one block (default: 300 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Keep running after a block raised (default: false)
    #[serde(default)]
    pub skip_exceptions: bool,

    /// Variable bound to the document's absolute path before execution (default: "theNotebook")
    #[serde(default = "default_document_variable")]
    pub document_variable: Option<String>,

    /// Remote resources to download before execution
    #[serde(default)]
    pub cache_urls: Vec<String>,

    /// Literal (pattern, replacement) substitutions applied to every block
    #[serde(default)]
    pub replacements: Vec<(String, String)>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            skip_exceptions: false,
            document_variable: default_document_variable(),
            cache_urls: Vec::new(),
            replacements: Vec::new(),
        }
    }
}

/// Batch executor settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Prefix of the executed document written next to the batch folder (default: "out_")
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,

    /// Number of documents executed at the same time (default: 1)
    #[serde(default = "default_max_concurrent_documents")]
    pub max_concurrent_documents: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            output_prefix: default_output_prefix(),
            max_concurrent_documents: default_max_concurrent_documents(),
        }
    }
}

/// How the pipeline decides an artifact is up to date
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessMode {
    /// Artifact modification time newer than the source (default)
    #[default]
    Mtime,
    /// Artifact sidecar digest equal to the source digest
    ContentHash,
}

/// Conversion pipeline settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Formats to produce (default: notebook, html, python, rst, pdf)
    #[serde(default = "default_formats")]
    pub formats: Vec<TargetFormat>,

    /// Path to the `jupyter` executable (auto-detected if None)
    #[serde(default)]
    pub converter_path: Option<PathBuf>,

    /// Path to the `pdflatex` executable (auto-detected if None)
    #[serde(default)]
    pub compiler_path: Option<PathBuf>,

    /// Path to the `pandoc` executable (auto-detected if None)
    #[serde(default)]
    pub transcoder_path: Option<PathBuf>,

    /// Template passed to the HTML conversion (default: "classic")
    #[serde(default = "default_html_template")]
    pub html_template: Option<String>,

    /// Template passed to the LaTeX conversion
    #[serde(default)]
    pub latex_template: Option<String>,

    /// Up-to-date check strategy
    #[serde(default)]
    pub freshness: FreshnessMode,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            formats: default_formats(),
            converter_path: None,
            compiler_path: None,
            transcoder_path: None,
            html_template: default_html_template(),
            latex_template: None,
            freshness: FreshnessMode::default(),
            search_path: true,
        }
    }
}

/// Ledger storage backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    /// Tab-separated text file (default)
    #[default]
    Tsv,
    /// SQLite database
    Sqlite,
}

/// Run ledger settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Ledger location (default: "notebook_runs.txt")
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,

    /// Storage backend
    #[serde(default)]
    pub backend: LedgerBackend,

    /// Records older than this many days are ignored by coverage reports (default: 30)
    #[serde(default = "default_too_old_days")]
    pub too_old_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            backend: LedgerBackend::default(),
            too_old_days: default_too_old_days(),
        }
    }
}

/// Main configuration
///
/// Fields are organized into sub-configs, one per component:
/// - [`engine`](EngineConfig): interpreter discovery and start arguments
/// - [`runner`](RunnerConfig): timeouts, exception policy, substitutions
/// - [`batch`](BatchConfig): batch output naming and concurrency
/// - [`conversion`](ConversionConfig): formats, tools, templates
/// - [`ledger`](LedgerConfig): run history persistence
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Execution engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Execution runner settings
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Batch executor settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Conversion pipeline settings
    #[serde(default)]
    pub conversion: ConversionConfig,

    /// Run ledger settings
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl Config {
    /// Load a configuration from a JSON file, filling absent fields with defaults
    pub async fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.runner.timeout.is_zero() {
            return Err(Error::Config {
                message: "timeout must be at least one second".into(),
                key: Some("runner.timeout".into()),
            });
        }
        if self.batch.max_concurrent_documents == 0 {
            return Err(Error::Config {
                message: "at least one document must run at a time".into(),
                key: Some("batch.max_concurrent_documents".into()),
            });
        }
        if self.conversion.formats.is_empty() {
            return Err(Error::Config {
                message: "no target format requested".into(),
                key: Some("conversion.formats".into()),
            });
        }
        if ![0, 10, 20, 30, 40, 50].contains(&self.engine.log_level) {
            return Err(Error::Config {
                message: format!("unknown log level {}", self.engine.log_level),
                key: Some("engine.log_level".into()),
            });
        }
        Ok(())
    }
}

// Default value functions
fn default_engine_name() -> String {
    "python".into()
}

fn default_log_level() -> u8 {
    30
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_document_variable() -> Option<String> {
    Some("theNotebook".into())
}

fn default_output_prefix() -> String {
    "out_".into()
}

fn default_max_concurrent_documents() -> usize {
    1
}

fn default_formats() -> Vec<TargetFormat> {
    vec![
        TargetFormat::Notebook,
        TargetFormat::Html,
        TargetFormat::Python,
        TargetFormat::Rst,
        TargetFormat::Pdf,
    ]
}

fn default_html_template() -> Option<String> {
    Some("classic".into())
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("notebook_runs.txt")
}

fn default_too_old_days() -> u32 {
    30
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");

        assert_eq!(config.runner.timeout, Duration::from_secs(300));
        assert!(!config.runner.skip_exceptions);
        assert_eq!(config.runner.document_variable.as_deref(), Some("theNotebook"));
        assert_eq!(config.engine.engine_name, "python");
        assert_eq!(config.engine.log_level, 30);
        assert_eq!(config.batch.output_prefix, "out_");
        assert_eq!(config.batch.max_concurrent_documents, 1);
        assert_eq!(config.conversion.formats.len(), 5);
        assert_eq!(config.conversion.freshness, FreshnessMode::Mtime);
        assert_eq!(config.ledger.backend, LedgerBackend::Tsv);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn durations_are_whole_seconds() {
        let config: Config =
            serde_json::from_str(r#"{"runner": {"timeout": 12}}"#).expect("deserialize failed");
        assert_eq!(config.runner.timeout, Duration::from_secs(12));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["runner"]["timeout"], 12);
    }

    #[test]
    fn formats_and_backends_use_snake_case() {
        let config: Config = serde_json::from_str(
            r#"{"conversion": {"formats": ["html", "docx"], "freshness": "content_hash"},
                "ledger": {"backend": "sqlite"}}"#,
        )
        .expect("deserialize failed");

        assert_eq!(
            config.conversion.formats,
            vec![TargetFormat::Html, TargetFormat::Docx]
        );
        assert_eq!(config.conversion.freshness, FreshnessMode::ContentHash);
        assert_eq!(config.ledger.backend, LedgerBackend::Sqlite);
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.runner.timeout = Duration::ZERO;

        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("runner.timeout")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_empty_formats_and_bad_log_level() {
        let mut config = Config::default();
        config.conversion.formats.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine.log_level = 25;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn from_json_file_reads_and_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nbpress.json");
        tokio::fs::write(&path, r#"{"batch": {"output_prefix": "exec_"}}"#)
            .await
            .unwrap();

        let config = Config::from_json_file(&path).await.unwrap();
        assert_eq!(config.batch.output_prefix, "exec_");

        tokio::fs::write(&path, r#"{"batch": {"max_concurrent_documents": 0}}"#)
            .await
            .unwrap();
        assert!(Config::from_json_file(&path).await.is_err());
    }
}
