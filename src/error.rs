//! Error types for nbpress
//!
//! This module provides the error taxonomy for the library:
//! - Document read/parse failures (encoding vs. structure)
//! - Execution failures (engine exceptions, timeouts, crashed engines)
//! - Conversion failures (tool errors, missing artifacts, copy failures)
//! - Ledger failures (malformed rows, key collisions)
//!
//! Every error exposes a stable machine-readable code through
//! [`Error::error_code`], which is what ends up in logs and ledger rows.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for nbpress operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nbpress
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "runner.timeout")
        key: Option<String>,
    },

    /// Document could not be read or parsed
    #[error("document unreadable: {0}")]
    Document(#[from] DocumentError),

    /// Document execution failed
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Conversion pipeline failed
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Run ledger could not be read or merged
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error while fetching a remote resource
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool could not be launched (python, jupyter, pdflatex, pandoc)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, not implemented, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Document read/parse errors
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The file is not valid UTF-8
    #[error("unable to decode {path} as UTF-8")]
    Encoding {
        /// The document path
        path: PathBuf,
    },

    /// The file is text but not a valid document
    #[error("unable to parse {path}: {reason}")]
    Structure {
        /// The document path
        path: PathBuf,
        /// Parser message
        reason: String,
    },

    /// The document file name cannot be published
    #[error("invalid document name {path}: {reason}")]
    InvalidName {
        /// The document path
        path: PathBuf,
        /// Why the name was rejected
        reason: String,
    },
}

/// Execution errors
///
/// These are cloneable because they are stored inside immutable
/// [`ExecutionResult`](crate::types::ExecutionResult) values and batch records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The engine did not answer within the configured timeout
    #[error("block {block} timed out after {timeout:?}")]
    Timeout {
        /// Index of the block being executed (`None` for the pre-amble)
        block: BlockRef,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// The engine reported an exception while running a block
    #[error("block {block} raised {ename}: {evalue}\n{traceback}")]
    Engine {
        /// Index of the failing block
        block: BlockRef,
        /// Exception name
        ename: String,
        /// Exception value
        evalue: String,
        /// Traceback text as reported by the engine
        traceback: String,
    },

    /// The engine process died or its channel broke
    #[error("engine crashed while running block {block}: {reason}")]
    EngineCrashed {
        /// Index of the block being executed
        block: BlockRef,
        /// What went wrong with the channel
        reason: String,
    },

    /// The executed document was not written where expected
    #[error("executed document missing at {path}")]
    MissingOutput {
        /// The expected output path
        path: PathBuf,
    },
}

/// Identifies the unit the engine was running when an error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockRef {
    /// The implicit pre-amble block
    Preamble,
    /// A block of the document, by index
    Index(usize),
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockRef::Preamble => write!(f, "<preamble>"),
            BlockRef::Index(i) => write!(f, "#{}", i),
        }
    }
}

/// Conversion pipeline errors
#[derive(Debug, Error)]
pub enum ConversionError {
    /// An external tool reported an error (stderr pattern or exit status)
    #[error("{tool} failed during {stage}: {message}")]
    Tool {
        /// Tool name (e.g. "nbconvert", "pdflatex")
        tool: String,
        /// Pipeline stage that invoked the tool
        stage: String,
        /// Captured diagnostics
        message: String,
    },

    /// An expected artifact is absent after conversion
    #[error("missing artifact {path}\n{stderr}")]
    MissingOutput {
        /// The expected artifact
        path: PathBuf,
        /// The stderr of the tool that should have produced it
        stderr: String,
    },

    /// Copying an artifact to its destination failed
    #[error("failed to materialize {path}: {reason}")]
    Materialization {
        /// The artifact or destination path
        path: PathBuf,
        /// The reason the copy failed
        reason: String,
    },

    /// No conversion route exists for this format
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A ledger row could not be parsed
    #[error("malformed ledger row {line}: {reason}")]
    Malformed {
        /// 1-based line number in the ledger file
        line: usize,
        /// What was wrong with the row
        reason: String,
    },

    /// Two documents collapse onto the same merge key
    #[error("duplicated names in column '{column}': {names:?}")]
    DuplicateKey {
        /// Column with duplicates ("key" or "last_name")
        column: String,
        /// All names in that column
        names: Vec<String>,
    },
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

impl Error {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Document(e) => match e {
                DocumentError::Encoding { .. } => "document_encoding",
                DocumentError::Structure { .. } => "document_structure",
                DocumentError::InvalidName { .. } => "document_invalid_name",
            },
            Error::Execution(e) => e.error_code(),
            Error::Conversion(e) => match e {
                ConversionError::Tool { .. } => "conversion_tool_error",
                ConversionError::MissingOutput { .. } => "missing_output",
                ConversionError::Materialization { .. } => "materialization_error",
                ConversionError::UnsupportedFormat(_) => "unsupported_format",
            },
            Error::Ledger(e) => match e {
                LedgerError::Malformed { .. } => "ledger_malformed",
                LedgerError::DuplicateKey { .. } => "ledger_duplicate_key",
            },
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::NotSupported(_) => "not_supported",
            Error::Other(_) => "internal_error",
        }
    }
}

impl ExecutionError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            ExecutionError::Timeout { .. } => "execution_timeout",
            ExecutionError::Engine { .. } => "execution_engine_error",
            ExecutionError::EngineCrashed { .. } => "engine_crashed",
            ExecutionError::MissingOutput { .. } => "missing_output",
        }
    }
}
