//! Fake collaborators implementing the public traits

use async_trait::async_trait;
use nbpress::Output;
use nbpress::conversion::{Compiler, ConvertRequest, Converter, ToolOutput, Transcoder};
use nbpress::engine::{EngineException, EngineReply, EngineSession, EngineStartOptions, ExecutionEngine};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Engine that knows `name = <int>`, `print(<name>[+<int>])` and `raise`
#[derive(Default)]
pub struct ToyEngine {
    /// Sessions started
    pub starts: AtomicUsize,
    /// Sessions shut down
    pub shutdowns: std::sync::Arc<AtomicUsize>,
}

struct ToySession {
    variables: HashMap<String, i64>,
    shutdowns: std::sync::Arc<AtomicUsize>,
}

#[async_trait]
impl ExecutionEngine for ToyEngine {
    async fn start(&self, _options: &EngineStartOptions) -> nbpress::Result<Box<dyn EngineSession>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ToySession {
            variables: HashMap::new(),
            shutdowns: self.shutdowns.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "toy"
    }
}

#[async_trait]
impl EngineSession for ToySession {
    async fn execute(&mut self, source: &str) -> nbpress::Result<EngineReply> {
        let mut reply = EngineReply::default();
        for line in source.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line == "raise" {
                reply.error = Some(EngineException {
                    ename: "RuntimeError".into(),
                    evalue: "toy failure".into(),
                    traceback: vec!["RuntimeError: toy failure".into()],
                });
                break;
            }
            if let Some(expr) = line.strip_prefix("print(").and_then(|l| l.strip_suffix(')')) {
                let (name, add) = expr.split_once('+').unwrap_or((expr, "0"));
                let value = self.variables.get(name.trim()).copied().unwrap_or_default()
                    + add.trim().parse::<i64>().unwrap_or_default();
                reply.outputs.push(Output::Stream {
                    name: "stdout".into(),
                    text: format!("{value}\n"),
                });
            } else if let Some((name, value)) = line.split_once('=') {
                self.variables
                    .insert(name.trim().into(), value.trim().parse().unwrap_or_default());
            }
        }
        Ok(reply)
    }

    async fn shutdown(&mut self) -> nbpress::Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Converter writing a small artifact per target
#[derive(Default)]
pub struct RecordingConverter {
    /// `<basename>:<target>` per invocation
    pub calls: Mutex<Vec<String>>,
}

impl RecordingConverter {
    /// Number of invocations so far
    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Converter for RecordingConverter {
    async fn convert(&self, request: &ConvertRequest<'_>) -> nbpress::Result<ToolOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", request.basename, request.target));
        let (ext, body) = match request.target {
            "html" => ("html", "<html><body>page</body></html>"),
            "latex" => ("tex", "\\documentclass{article}"),
            "rst" => ("rst", "Title\n=====\n"),
            _ => ("py", "x = 1\n"),
        };
        tokio::fs::write(
            request.output_dir.join(format!("{}.{}", request.basename, ext)),
            body,
        )
        .await?;
        // converters also drop images next to the page
        tokio::fs::write(
            request.output_dir.join(format!("{}_1_0.png", request.basename)),
            "png",
        )
        .await?;
        Ok(ToolOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Compiler producing `<stem>.pdf`
#[derive(Default)]
pub struct RecordingCompiler {
    /// Invocations so far
    pub calls: AtomicUsize,
}

#[async_trait]
impl Compiler for RecordingCompiler {
    async fn compile(&self, intermediate: &Path, output_dir: &Path) -> nbpress::Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stem = nbpress::utils::file_stem(intermediate);
        tokio::fs::write(output_dir.join(format!("{stem}.pdf")), "%PDF-1.5").await?;
        Ok(ToolOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Transcoder producing its output file
#[derive(Default)]
pub struct RecordingTranscoder {
    /// Invocations so far
    pub calls: AtomicUsize,
}

#[async_trait]
impl Transcoder for RecordingTranscoder {
    async fn transcode(&self, _input: &Path, output: &Path, _to: &str) -> nbpress::Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, "PK").await?;
        Ok(ToolOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
