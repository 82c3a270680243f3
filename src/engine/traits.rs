//! Traits and types for execution engines

use crate::document::Output;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Parameters used to start an engine
#[derive(Debug, Clone)]
pub struct EngineStartOptions {
    /// Current directory of the engine
    pub working_dir: PathBuf,
    /// Extra import/search paths, in priority order
    pub extra_paths: Vec<PathBuf>,
    /// Engine (kernel) name
    pub engine_name: String,
    /// Engine log level (0, 10, 20, 30, 40, 50)
    pub log_level: u8,
    /// Extra interpreter arguments
    pub extra_args: Vec<String>,
    /// Variables bound before the first block runs
    pub variables: Vec<(String, String)>,
}

impl EngineStartOptions {
    /// Options with defaults for everything but the working directory
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            extra_paths: Vec::new(),
            engine_name: "python".into(),
            log_level: 30,
            extra_args: Vec::new(),
            variables: Vec::new(),
        }
    }
}

/// Exception reported by the engine for one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineException {
    /// Exception name
    pub ename: String,
    /// Exception value
    pub evalue: String,
    /// Traceback lines
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl EngineException {
    /// The error output stored in the block
    pub fn to_output(&self) -> Output {
        Output::Error {
            ename: self.ename.clone(),
            evalue: self.evalue.clone(),
            traceback: self.traceback.clone(),
        }
    }
}

/// Answer to one execute request
#[must_use]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineReply {
    /// Outputs other than the exception
    #[serde(default)]
    pub outputs: Vec<Output>,
    /// Exception raised by the block
    #[serde(default)]
    pub error: Option<EngineException>,
    /// Engine execution counter
    #[serde(default)]
    pub execution_count: Option<u32>,
}

/// Factory for engine sessions
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Start a fresh engine process
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be launched or does not
    /// acknowledge its start parameters.
    async fn start(&self, options: &EngineStartOptions) -> crate::Result<Box<dyn EngineSession>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// One running engine
///
/// State (variables, imports) persists between [`execute`](EngineSession::execute)
/// calls until [`shutdown`](EngineSession::shutdown).
#[async_trait]
pub trait EngineSession: Send {
    /// Run one block and wait for its reply
    ///
    /// An exception raised by the block is a successful reply carrying
    /// [`EngineReply::error`]; `Err` means the channel itself broke.
    async fn execute(&mut self, source: &str) -> crate::Result<EngineReply>;

    /// Stop the engine and release its process
    async fn shutdown(&mut self) -> crate::Result<()>;
}
