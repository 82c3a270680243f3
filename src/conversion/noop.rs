//! No-op conversion tool for graceful degradation

use super::traits::{Compiler, ConvertRequest, Converter, ToolOutput, Transcoder};
use async_trait::async_trait;
use std::path::Path;

/// Stand-in for a conversion tool that is not installed
///
/// Every operation returns `Error::NotSupported`. The pipeline records the
/// failure for the jobs that need the tool and still converts the formats
/// that do not.
///
/// # Examples
///
/// ```
/// use nbpress::conversion::{Compiler, NoOpTool};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() {
/// let result = NoOpTool.compile(Path::new("intro.tex"), Path::new("build")).await;
/// assert!(result.is_err());
/// # }
/// ```
pub struct NoOpTool;

fn not_supported(tool: &str, setting: &str) -> crate::Error {
    crate::Error::NotSupported(format!(
        "{tool} is required for this format. \
         Configure conversion.{setting} or ensure {tool} is in PATH."
    ))
}

#[async_trait]
impl Converter for NoOpTool {
    async fn convert(&self, _request: &ConvertRequest<'_>) -> crate::Result<ToolOutput> {
        Err(not_supported("jupyter", "converter_path"))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[async_trait]
impl Compiler for NoOpTool {
    async fn compile(&self, _intermediate: &Path, _output_dir: &Path) -> crate::Result<ToolOutput> {
        Err(not_supported("pdflatex", "compiler_path"))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[async_trait]
impl Transcoder for NoOpTool {
    async fn transcode(&self, _input: &Path, _output: &Path, _to: &str) -> crate::Result<ToolOutput> {
        Err(not_supported("pandoc", "transcoder_path"))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
