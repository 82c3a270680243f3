//! Execution engines
//!
//! An execution engine is an external, stateful interpreter that runs one
//! block at a time and answers with the block's outputs. The runner only
//! sees the [`ExecutionEngine`] / [`EngineSession`] traits; the transport is
//! up to the implementation.
//!
//! - [`ProcessEngine`]: spawns an interpreter and talks to it over a
//!   line-delimited JSON channel on stdin/stdout
//! - [`NoOpEngine`]: used when no interpreter is available
//!
//! ## Usage
//!
//! ```no_run
//! use nbpress::engine::{EngineStartOptions, ExecutionEngine, ProcessEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ProcessEngine::from_path().expect("python not found");
//!     let mut session = engine.start(&EngineStartOptions::new(".")).await?;
//!
//!     session.execute("x = 1").await?;
//!     let reply = session.execute("print(x + 1)").await?;
//!     println!("{:?}", reply.outputs);
//!
//!     session.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod noop;
mod process;
mod traits;

pub use noop::NoOpEngine;
pub use process::ProcessEngine;
pub use traits::{EngineException, EngineReply, EngineSession, EngineStartOptions, ExecutionEngine};

use crate::config::EngineConfig;
use std::sync::Arc;

/// Pick the engine described by the configuration
///
/// Uses the explicit `program` when set, otherwise searches PATH (if allowed),
/// and falls back to [`NoOpEngine`] when no interpreter is found.
pub fn from_config(config: &EngineConfig) -> Arc<dyn ExecutionEngine> {
    let engine = match &config.program {
        Some(program) => Some(ProcessEngine::new(program.clone())),
        None if config.search_path => ProcessEngine::from_path(),
        None => None,
    };
    match engine {
        Some(engine) => Arc::new(engine),
        None => {
            tracing::warn!("no interpreter found, documents cannot be executed");
            Arc::new(NoOpEngine)
        }
    }
}
