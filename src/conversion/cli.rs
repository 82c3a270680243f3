//! Command-line tools: jupyter nbconvert, pdflatex, pandoc

use super::traits::{Compiler, ConvertRequest, Converter, ToolOutput, Transcoder};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Run a command to completion and capture both streams
async fn run_tool(program: &Path, args: Vec<OsString>, cwd: Option<&Path>) -> crate::Result<ToolOutput> {
    let command = std::iter::once(program.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    debug!(command = %command, cwd = ?cwd, "running tool");

    let mut cmd = Command::new(program);
    cmd.args(&args).stdin(Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd.output().await.map_err(|e| {
        crate::Error::ExternalTool(format!("Failed to execute {}: {}", program.display(), e))
    })?;

    Ok(ToolOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        command,
    })
}

/// Arguments of `jupyter nbconvert` for one request
pub fn nbconvert_args(request: &ConvertRequest<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "nbconvert".into(),
        "--to".into(),
        request.target.into(),
        request.input.as_os_str().to_owned(),
        format!("--output={}", request.basename).into(),
    ];
    let mut dir = OsString::from("--output-dir=");
    dir.push(request.output_dir.as_os_str());
    args.push(dir);
    if let Some(template) = request.template {
        args.push("--template".into());
        args.push(template.into());
    }
    args
}

/// Converter driving `jupyter nbconvert`
pub struct CliConverter {
    binary_path: PathBuf,
}

impl CliConverter {
    /// Create a converter with an explicit `jupyter` path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find `jupyter` in PATH
    pub fn from_path() -> Option<Self> {
        which::which("jupyter").ok().map(Self::new)
    }
}

#[async_trait]
impl Converter for CliConverter {
    async fn convert(&self, request: &ConvertRequest<'_>) -> crate::Result<ToolOutput> {
        run_tool(&self.binary_path, nbconvert_args(request), None).await
    }

    fn name(&self) -> &'static str {
        "nbconvert"
    }
}

/// Compiler driving `pdflatex`
pub struct CliCompiler {
    binary_path: PathBuf,
}

impl CliCompiler {
    /// Create a compiler with an explicit `pdflatex` path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find `pdflatex` in PATH
    pub fn from_path() -> Option<Self> {
        which::which("pdflatex").ok().map(Self::new)
    }
}

#[async_trait]
impl Compiler for CliCompiler {
    async fn compile(&self, intermediate: &Path, output_dir: &Path) -> crate::Result<ToolOutput> {
        let mut out_dir = OsString::from("-output-directory=");
        out_dir.push(output_dir.as_os_str());
        let args = vec![
            "-interaction=nonstopmode".into(),
            out_dir,
            intermediate.as_os_str().to_owned(),
        ];
        let cwd = intermediate.parent().filter(|p| !p.as_os_str().is_empty());
        run_tool(&self.binary_path, args, cwd).await
    }

    fn name(&self) -> &'static str {
        "pdflatex"
    }
}

/// Transcoder driving `pandoc`
pub struct CliTranscoder {
    binary_path: PathBuf,
}

impl CliTranscoder {
    /// Create a transcoder with an explicit `pandoc` path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find `pandoc` in PATH
    pub fn from_path() -> Option<Self> {
        which::which("pandoc").ok().map(Self::new)
    }
}

#[async_trait]
impl Transcoder for CliTranscoder {
    async fn transcode(&self, input: &Path, output: &Path, to: &str) -> crate::Result<ToolOutput> {
        let args = vec![
            "-f".into(),
            "html".into(),
            "-t".into(),
            to.into(),
            input.as_os_str().to_owned(),
            "-o".into(),
            output.as_os_str().to_owned(),
        ];
        run_tool(&self.binary_path, args, None).await
    }

    fn name(&self) -> &'static str {
        "pandoc"
    }
}
