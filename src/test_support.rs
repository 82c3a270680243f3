//! Fakes shared by unit tests

use crate::document::{Block, Document, Output};
use crate::engine::{EngineException, EngineReply, EngineSession, EngineStartOptions, ExecutionEngine};
use crate::resource_cache::ResourceFetcher;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// What the scripted engine saw, shared with the test
#[derive(Default)]
pub(crate) struct Journal {
    pub(crate) executed: Mutex<Vec<String>>,
    pub(crate) started: Mutex<Vec<EngineStartOptions>>,
    pub(crate) shutdowns: AtomicUsize,
}

/// Engine understanding a handful of statements:
/// `name = <int>`, `print(name)`, `print(name+<int>)`, `raise`, `sleep`, `crash`.
pub(crate) struct ScriptedEngine {
    journal: Arc<Journal>,
}

impl ScriptedEngine {
    pub(crate) fn new(journal: Arc<Journal>) -> Self {
        Self { journal }
    }
}

struct ScriptedSession {
    journal: Arc<Journal>,
    variables: HashMap<String, i64>,
    count: u32,
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn start(&self, options: &EngineStartOptions) -> crate::Result<Box<dyn EngineSession>> {
        self.journal.started.lock().unwrap().push(options.clone());
        Ok(Box::new(ScriptedSession {
            journal: self.journal.clone(),
            variables: HashMap::new(),
            count: 0,
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

impl ScriptedSession {
    fn eval(&self, expr: &str) -> Option<i64> {
        match expr.split_once('+') {
            Some((name, n)) => Some(self.variables.get(name.trim())? + n.trim().parse::<i64>().ok()?),
            None => self.variables.get(expr.trim()).copied(),
        }
    }
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn execute(&mut self, source: &str) -> crate::Result<EngineReply> {
        self.journal.executed.lock().unwrap().push(source.to_string());
        self.count += 1;
        let mut reply = EngineReply {
            execution_count: Some(self.count),
            ..Default::default()
        };

        for line in source.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line == "sleep" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            } else if line == "crash" {
                return Err(crate::Error::ExternalTool("engine closed its channel".into()));
            } else if line == "raise" {
                reply.error = Some(EngineException {
                    ename: "ValueError".into(),
                    evalue: "raised on purpose".into(),
                    traceback: vec![
                        "Traceback (most recent call last):\n".into(),
                        "ValueError: raised on purpose\n".into(),
                    ],
                });
                break;
            } else if let Some(expr) = line.strip_prefix("print(").and_then(|l| l.strip_suffix(')')) {
                match self.eval(expr) {
                    Some(value) => reply.outputs.push(Output::Stream {
                        name: "stdout".into(),
                        text: format!("{}\n", value),
                    }),
                    None => {
                        reply.error = Some(EngineException {
                            ename: "NameError".into(),
                            evalue: format!("name '{}' is not defined", expr),
                            traceback: vec![],
                        });
                        break;
                    }
                }
            } else if let Some((name, value)) = line.split_once('=') {
                let value = value.trim().parse().unwrap_or_default();
                self.variables.insert(name.trim().to_string(), value);
            }
        }
        Ok(reply)
    }

    async fn shutdown(&mut self) -> crate::Result<()> {
        self.journal.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fetcher writing a fixed body and counting calls
#[derive(Default)]
pub(crate) struct CountingFetcher {
    pub(crate) calls: AtomicUsize,
}

#[async_trait]
impl ResourceFetcher for CountingFetcher {
    async fn fetch(&self, _url: &str, sink: &mut (dyn AsyncWrite + Unpin + Send)) -> crate::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sink.write_all(b"1,2,3").await?;
        Ok(5)
    }
}

pub(crate) fn code_document(sources: &[&str]) -> Document {
    Document::new(sources.iter().map(|s| Block::code(*s)).collect())
}

/// Write a document of code blocks to `dir/name`
pub(crate) async fn write_document(dir: &Path, name: &str, sources: &[&str]) -> PathBuf {
    let path = dir.join(name);
    code_document(sources).write(&path).await.unwrap();
    path
}
