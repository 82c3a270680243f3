//! Traits and types for external conversion tools

use async_trait::async_trait;
use std::path::Path;

/// Captured result of one tool invocation
#[must_use]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Command line, for diagnostics
    pub command: String,
}

impl ToolOutput {
    /// Whether the process exited with status 0
    pub fn exit_ok(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// One primary conversion
#[derive(Debug, Clone, Copy)]
pub struct ConvertRequest<'a> {
    /// Source document
    pub input: &'a Path,
    /// Directory receiving the artifact
    pub output_dir: &'a Path,
    /// Artifact file name without extension
    pub basename: &'a str,
    /// Converter format identifier (`html`, `latex`, `rst`, `python`)
    pub target: &'a str,
    /// Converter template
    pub template: Option<&'a str>,
}

/// Document converter (produces HTML, LaTeX, reST or a script from a document)
///
/// # Examples
///
/// ```no_run
/// use nbpress::conversion::{CliConverter, ConvertRequest, Converter};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let converter = CliConverter::from_path().expect("jupyter not found");
/// let output = converter
///     .convert(&ConvertRequest {
///         input: Path::new("notebooks/intro.ipynb"),
///         output_dir: Path::new("build"),
///         basename: "intro",
///         target: "html",
///         template: Some("classic"),
///     })
///     .await?;
/// println!("exit code {:?}", output.exit_code);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Converter: Send + Sync {
    /// Run the conversion and capture its output
    ///
    /// # Errors
    ///
    /// Only when the tool cannot be launched; a tool that runs and fails
    /// returns its output so the caller can classify it.
    async fn convert(&self, request: &ConvertRequest<'_>) -> crate::Result<ToolOutput>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// LaTeX compiler, run from the intermediate file's directory
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile `intermediate`, writing into `output_dir`
    async fn compile(&self, intermediate: &Path, output_dir: &Path) -> crate::Result<ToolOutput>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Format transcoder (HTML to word-processor documents)
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcode `input` (HTML) into `output` of format `to`
    async fn transcode(&self, input: &Path, output: &Path, to: &str) -> crate::Result<ToolOutput>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
