//! Execution runner
//!
//! Runs the code blocks of one [`Document`], in source order, against a single
//! engine session:
//!
//! 1. Pre-fetch - download remote resources into the working directory
//! 2. Start - launch the engine with search paths and the document variable
//! 3. Pre-amble - run the optional initialization code as an implicit first block
//! 4. Blocks - ask the validity predicate, sanitize, substitute, execute
//! 5. Teardown - shut the engine down on every exit path
//!
//! Engine exceptions, timeouts and crashes never surface as `Err`: they end
//! the run and are reported through [`ExecutionResult::raised_error`]. `Err`
//! is reserved for failures before execution starts (unreadable document,
//! engine that cannot start, failed download).

use crate::config::{Config, EngineConfig};
use crate::document::{Block, Document};
use crate::engine::{EngineReply, EngineSession, EngineStartOptions, ExecutionEngine};
use crate::error::{BlockRef, ExecutionError, Result};
use crate::resource_cache::{HttpFetcher, ResourceCache, ResourceFetcher};
use crate::types::{BlockTiming, ExecutionCounters, ExecutionResult, Validity};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

mod log;

use log::ExecutionLog;

/// Per-block predicate deciding whether a block runs
pub type ValidityFn = Arc<dyn Fn(&Block) -> Validity + Send + Sync>;

/// Source rewrite applied to each block before execution
pub type SanitizeFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Options for one document execution
#[derive(Clone)]
pub struct RunOptions {
    /// Engine current directory, also where resources are cached
    pub working_dir: PathBuf,
    /// Extra import/search paths
    pub extra_paths: Vec<PathBuf>,
    /// Code run before the first block
    pub preamble: Option<String>,
    /// Validity predicate (all blocks run when None)
    pub valid: Option<ValidityFn>,
    /// Sanitizer (sources run as-is when None)
    pub sanitize: Option<SanitizeFn>,
    /// Remote resources to cache before execution
    pub cache_urls: Vec<String>,
    /// Literal (pattern, replacement) substitutions
    pub replacements: Vec<(String, String)>,
    /// Maximum wait for one block
    pub timeout: Duration,
    /// Keep running after a block raised
    pub skip_exceptions: bool,
    /// Variable bound to the document's absolute path
    pub document_variable: Option<String>,
    /// Path bound to `document_variable`
    pub document_path: Option<PathBuf>,
    /// Secondary log receiving every execution log line
    pub log_sink: Option<UnboundedSender<String>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default(), ".")
    }
}

impl RunOptions {
    /// Options taken from the runner section of a configuration
    pub fn from_config(config: &Config, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            extra_paths: Vec::new(),
            preamble: None,
            valid: None,
            sanitize: None,
            cache_urls: config.runner.cache_urls.clone(),
            replacements: config.runner.replacements.clone(),
            timeout: config.runner.timeout,
            skip_exceptions: config.runner.skip_exceptions,
            document_variable: config.runner.document_variable.clone(),
            document_path: None,
            log_sink: None,
        }
    }

    /// Set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Add an import/search path.
    pub fn with_extra_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_paths.push(path.into());
        self
    }

    /// Set the pre-amble.
    pub fn with_preamble(mut self, code: impl Into<String>) -> Self {
        self.preamble = Some(code.into());
        self
    }

    /// Set the validity predicate.
    pub fn with_validity(
        mut self,
        valid: impl Fn(&Block) -> Validity + Send + Sync + 'static,
    ) -> Self {
        self.valid = Some(Arc::new(valid));
        self
    }

    /// Set the sanitizer.
    pub fn with_sanitizer(mut self, clean: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.sanitize = Some(Arc::new(clean));
        self
    }

    /// Add a literal substitution.
    pub fn with_replacement(mut self, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.replacements.push((pattern.into(), replacement.into()));
        self
    }

    /// Add a resource to pre-fetch.
    pub fn with_cache_url(mut self, url: impl Into<String>) -> Self {
        self.cache_urls.push(url.into());
        self
    }

    /// Set the per-block timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep running after exceptions.
    pub fn with_skip_exceptions(mut self, skip: bool) -> Self {
        self.skip_exceptions = skip;
        self
    }

    /// Set the secondary log.
    pub fn with_log_sink(mut self, sink: UnboundedSender<String>) -> Self {
        self.log_sink = Some(sink);
        self
    }
}

/// Executes documents against an engine
pub struct Runner {
    engine: Arc<dyn ExecutionEngine>,
    fetcher: Arc<dyn ResourceFetcher>,
    engine_config: EngineConfig,
}

/// Mutable state of the block loop
struct Progress {
    timings: Vec<BlockTiming>,
    counters: ExecutionCounters,
    fatal: Option<ExecutionError>,
    stopped_at: Option<usize>,
}

impl Runner {
    /// Create a runner from explicit collaborators
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        fetcher: Arc<dyn ResourceFetcher>,
        engine_config: EngineConfig,
    ) -> Self {
        Self {
            engine,
            fetcher,
            engine_config,
        }
    }

    /// Create a runner with the configured engine and an HTTP fetcher
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            crate::engine::from_config(&config.engine),
            Arc::new(HttpFetcher::new()),
            config.engine.clone(),
        )
    }

    /// Resource fetcher used for pre-fetching
    pub fn fetcher(&self) -> &dyn ResourceFetcher {
        self.fetcher.as_ref()
    }

    /// Read a document, execute it and optionally write the executed copy
    ///
    /// The executed document is written to `output` only when the run succeeded.
    pub async fn run_file(
        &self,
        path: &Path,
        output: Option<&Path>,
        options: &RunOptions,
    ) -> Result<ExecutionResult> {
        let mut document = Document::read(path).await?;

        let mut options = options.clone();
        if options.document_path.is_none() {
            options.document_path = Some(std::path::absolute(path)?);
        }

        let result = self.execute(&mut document, &options).await?;

        if let (Some(output), true) = (output, result.success) {
            let executed = document.clone();
            write_atomically(&executed, output).await?;
            debug!(?output, "executed document written");
        }
        Ok(result)
    }

    /// Execute a document in place
    ///
    /// Blocks receive their new outputs; blocks that were skipped or never
    /// reached keep their previous ones.
    pub async fn execute(
        &self,
        document: &mut Document,
        options: &RunOptions,
    ) -> Result<ExecutionResult> {
        let mut log = ExecutionLog::new(options.log_sink.clone());

        let substitutions = self.prepare_substitutions(options, &mut log).await?;

        let start = self.start_options(options);
        info!(
            engine = self.engine.name(),
            working_dir = ?options.working_dir,
            blocks = document.cells.len(),
            "starting execution"
        );
        let mut session = self.engine.start(&start).await?;

        let progress = self
            .run_blocks(session.as_mut(), document, options, &substitutions, &mut log)
            .await;

        if let Err(e) = session.shutdown().await {
            warn!(error = %e, "engine shutdown failed");
            log.line(format!("engine shutdown failed: {}", e));
        }

        let success = progress.fatal.is_none();
        info!(
            success,
            executed = progress.counters.executed,
            valid = progress.counters.valid,
            "execution finished"
        );
        Ok(ExecutionResult {
            timings: progress.timings,
            counters: progress.counters,
            success,
            captured_log: log.finish(),
            raised_error: progress.fatal,
            stopped_at: progress.stopped_at,
        })
    }

    /// Cached URLs first, then caller substitutions (which win on equal patterns)
    async fn prepare_substitutions(
        &self,
        options: &RunOptions,
        log: &mut ExecutionLog,
    ) -> Result<Vec<(String, String)>> {
        let cache = ResourceCache::new(&options.working_dir);
        let cached = cache.ensure(&options.cache_urls, self.fetcher.as_ref()).await?;
        for (url, local) in &cached {
            log.line(format!("cached {} as {}", url, local));
        }

        let mut substitutions: Vec<(String, String)> = cached
            .into_iter()
            .filter(|(url, _)| !options.replacements.iter().any(|(p, _)| p == url))
            .collect();
        substitutions.extend(options.replacements.iter().cloned());
        Ok(substitutions)
    }

    fn start_options(&self, options: &RunOptions) -> EngineStartOptions {
        let mut variables = Vec::new();
        if let (Some(name), Some(path)) = (&options.document_variable, &options.document_path) {
            variables.push((name.clone(), path.to_string_lossy().replace('\\', "/")));
        }
        EngineStartOptions {
            working_dir: options.working_dir.clone(),
            extra_paths: options.extra_paths.clone(),
            engine_name: self.engine_config.engine_name.clone(),
            log_level: self.engine_config.log_level,
            extra_args: self.engine_config.extra_args.clone(),
            variables,
        }
    }

    async fn run_blocks(
        &self,
        session: &mut dyn EngineSession,
        document: &mut Document,
        options: &RunOptions,
        substitutions: &[(String, String)],
        log: &mut ExecutionLog,
    ) -> Progress {
        let mut progress = Progress {
            timings: Vec::new(),
            counters: ExecutionCounters {
                blocks: document.cells.len(),
                ..Default::default()
            },
            fatal: None,
            stopped_at: None,
        };

        if let Some(preamble) = &options.preamble {
            log.line("running preamble");
            let started = Instant::now();
            let outcome = execute_one(session, preamble, BlockRef::Preamble, options.timeout).await;
            progress.timings.push(BlockTiming {
                block: BlockRef::Preamble,
                elapsed: started.elapsed(),
            });
            let failure = match outcome {
                Ok(EngineReply { error: None, .. }) => None,
                Ok(EngineReply {
                    error: Some(exception),
                    ..
                }) => Some(ExecutionError::Engine {
                    block: BlockRef::Preamble,
                    ename: exception.ename,
                    evalue: exception.evalue,
                    traceback: exception.traceback.concat(),
                }),
                Err(e) => Some(e),
            };
            if let Some(error) = failure {
                log.line(format!("preamble failed: {}", error));
                progress.fatal = Some(error);
                return progress;
            }
        }

        for (index, block) in document.cells.iter_mut().enumerate() {
            if !block.is_code() {
                continue;
            }

            let validity = options
                .valid
                .as_ref()
                .map(|valid| valid(block))
                .unwrap_or(Validity::Execute);
            match validity {
                Validity::Stop => {
                    log.line(format!("block #{}: stop requested, ending run", index));
                    progress.stopped_at = Some(index);
                    break;
                }
                Validity::Skip => {
                    log.line(format!("block #{}: skipped", index));
                    continue;
                }
                Validity::Execute => {}
            }

            let mut source = match &options.sanitize {
                Some(clean) => clean(&block.source),
                None => block.source.clone(),
            };
            for (pattern, replacement) in substitutions {
                if !pattern.is_empty() {
                    source = source.replace(pattern.as_str(), replacement);
                }
            }

            let block_ref = BlockRef::Index(index);
            log.line(format!("block #{}: executing", index));
            let started = Instant::now();
            let outcome = execute_one(session, &source, block_ref, options.timeout).await;
            let elapsed = started.elapsed();
            progress.timings.push(BlockTiming {
                block: block_ref,
                elapsed,
            });
            progress.counters.executed += 1;

            let reply = match outcome {
                Ok(reply) => reply,
                Err(error) => {
                    log.line(format!("block #{}: {}", index, error));
                    progress.fatal = Some(error);
                    break;
                }
            };

            block.outputs = reply.outputs;
            block.execution_count = reply.execution_count;
            for output in &block.outputs {
                if let Some(text) = output.text() {
                    log.line(text.trim_end());
                }
            }

            match reply.error {
                None => {
                    progress.counters.valid += 1;
                    log.line(format!(
                        "block #{}: done in {:.3}s",
                        index,
                        elapsed.as_secs_f64()
                    ));
                }
                Some(exception) => {
                    block.outputs.push(exception.to_output());
                    let error = ExecutionError::Engine {
                        block: block_ref,
                        ename: exception.ename,
                        evalue: exception.evalue,
                        traceback: exception.traceback.concat(),
                    };
                    log.line(format!("block #{}: {}", index, error));
                    if !options.skip_exceptions {
                        progress.fatal = Some(error);
                        break;
                    }
                }
            }
        }
        progress
    }
}

/// Send one block and wait for the reply, bounded by `timeout`
async fn execute_one(
    session: &mut dyn EngineSession,
    source: &str,
    block: BlockRef,
    timeout: Duration,
) -> std::result::Result<EngineReply, ExecutionError> {
    match tokio::time::timeout(timeout, session.execute(source)).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => Err(ExecutionError::EngineCrashed {
            block,
            reason: e.to_string(),
        }),
        Err(_) => Err(ExecutionError::Timeout { block, timeout }),
    }
}

/// Write to a sibling temporary file, then rename over the destination
async fn write_atomically(document: &Document, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut partial = output.as_os_str().to_owned();
    partial.push(".tmp");
    let partial = PathBuf::from(partial);
    document.write(&partial).await?;
    tokio::fs::rename(&partial, output).await?;
    Ok(())
}
