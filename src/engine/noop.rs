//! No-op engine for graceful degradation

use super::traits::{EngineSession, EngineStartOptions, ExecutionEngine};
use async_trait::async_trait;

/// Engine used when no interpreter is available
///
/// Starting it returns `Error::NotSupported`, so a batch records a clear
/// failure per document instead of aborting.
pub struct NoOpEngine;

#[async_trait]
impl ExecutionEngine for NoOpEngine {
    async fn start(&self, _options: &EngineStartOptions) -> crate::Result<Box<dyn EngineSession>> {
        Err(crate::Error::NotSupported(
            "document execution requires an interpreter. \
             Configure engine.program or ensure python3 is in PATH."
                .into(),
        ))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
