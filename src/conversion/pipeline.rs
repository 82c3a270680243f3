//! Conversion pipeline executor

use super::classify::{Stage, classify};
use super::freshness::{self, FreshnessCheck};
use super::noop::NoOpTool;
use super::postprocess::{self, LinkTargets};
use super::traits::{Compiler, ConvertRequest, Converter, Transcoder};
use super::{CliCompiler, CliConverter, CliTranscoder};
use crate::config::ConversionConfig;
use crate::error::{ConversionError, DocumentError, Error, Result};
use crate::types::{JobState, SecondaryStage, TargetFormat};
use crate::utils::{file_stem, modified};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// One (document, format) unit of work
#[derive(Clone, Debug)]
pub struct ConversionJob {
    /// Source document
    pub source: PathBuf,
    /// Format to produce
    pub format: TargetFormat,
    /// File the primary conversion writes
    pub output: PathBuf,
    /// File the second stage writes (compiled PDF, transcoded document)
    pub secondary_output: Option<PathBuf>,
    /// Template passed to the converter
    pub template: Option<String>,
    /// Source modification time when the job was planned
    pub source_modified: Option<SystemTime>,
    /// Current state
    pub state: JobState,
}

impl ConversionJob {
    /// Plan the conversion of `source` to `format` inside `build_dir`
    pub fn new(source: &Path, format: TargetFormat, build_dir: &Path) -> Self {
        let stem = file_stem(source);
        let output = build_dir.join(format!("{}.{}", stem, format.primary_extension()));
        let secondary_output = format
            .secondary_stage()
            .map(|_| build_dir.join(format!("{}.{}", stem, format.extension())));
        Self {
            source: source.to_path_buf(),
            format,
            output,
            secondary_output,
            template: None,
            source_modified: None,
            state: JobState::Pending,
        }
    }

    fn transition(&mut self, state: JobState) {
        debug!(
            document = %self.source.display(),
            format = %self.format,
            from = ?self.state,
            to = ?state,
            "job state"
        );
        self.state = state;
    }
}

/// Result of one job
#[derive(Debug)]
pub struct JobOutcome {
    /// The job in its final state
    pub job: ConversionJob,
    /// Files to materialize, in production order
    pub artifacts: Vec<PathBuf>,
    /// Whether the primary artifact was reused without conversion
    pub up_to_date: bool,
    /// Time spent on the job
    pub elapsed: Duration,
    /// The first hard error of the job
    pub error: Option<Error>,
}

/// Outcomes of one pipeline run, in job order
#[derive(Debug, Default)]
pub struct ConversionReport {
    /// One entry per job
    pub outcomes: Vec<JobOutcome>,
}

impl ConversionReport {
    /// Failed jobs
    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    /// Artifacts of the successful jobs, without duplicates
    pub fn artifacts(&self) -> Vec<PathBuf> {
        let mut seen = std::collections::HashSet::new();
        self.outcomes
            .iter()
            .filter(|o| o.error.is_none())
            .flat_map(|o| o.artifacts.iter())
            .filter(|p| seen.insert(p.as_path()))
            .cloned()
            .collect()
    }

    /// One line per job: document, format, success flag, elapsed seconds
    pub fn summary(&self) -> String {
        self.outcomes
            .iter()
            .map(|o| {
                format!(
                    "{} {} {} {:.3}s\n",
                    o.job.source.display(),
                    o.job.format,
                    o.error.is_none(),
                    o.elapsed.as_secs_f64()
                )
            })
            .collect()
    }

    /// Print the summary, then return the first error or the artifacts
    pub fn finalize(mut self) -> Result<Vec<PathBuf>> {
        for line in self.summary().lines() {
            info!("{}", line);
        }
        let artifacts = self.artifacts();
        match self.outcomes.iter_mut().find_map(|o| o.error.take()) {
            Some(error) => Err(error),
            None => Ok(artifacts),
        }
    }
}

/// Multi-format conversion driver
///
/// Jobs run one after the other. A failing job never stops the others; its
/// error is stored in its [`JobOutcome`].
pub struct ConversionPipeline {
    converter: Arc<dyn Converter>,
    compiler: Arc<dyn Compiler>,
    transcoder: Arc<dyn Transcoder>,
    freshness: Arc<dyn FreshnessCheck>,
    config: ConversionConfig,
}

impl ConversionPipeline {
    /// Create a pipeline from explicit tools
    pub fn new(
        converter: Arc<dyn Converter>,
        compiler: Arc<dyn Compiler>,
        transcoder: Arc<dyn Transcoder>,
        config: ConversionConfig,
    ) -> Self {
        Self {
            converter,
            compiler,
            transcoder,
            freshness: freshness::from_mode(config.freshness),
            config,
        }
    }

    /// Create a pipeline using the configured or discovered tools
    ///
    /// A tool that cannot be found is replaced by [`NoOpTool`], so only the
    /// formats that need it fail.
    pub fn from_config(config: &ConversionConfig) -> Self {
        let converter: Arc<dyn Converter> = match resolve(&config.converter_path, "jupyter", config.search_path) {
            Some(path) => Arc::new(CliConverter::new(path)),
            None => {
                warn!("jupyter not found, only notebook copies can be produced");
                Arc::new(NoOpTool)
            }
        };
        let compiler: Arc<dyn Compiler> = match resolve(&config.compiler_path, "pdflatex", config.search_path) {
            Some(path) => Arc::new(CliCompiler::new(path)),
            None => {
                warn!("pdflatex not found, PDF documents cannot be produced");
                Arc::new(NoOpTool)
            }
        };
        let transcoder: Arc<dyn Transcoder> = match resolve(&config.transcoder_path, "pandoc", config.search_path) {
            Some(path) => Arc::new(CliTranscoder::new(path)),
            None => {
                warn!("pandoc not found, word documents cannot be produced");
                Arc::new(NoOpTool)
            }
        };
        Self::new(converter, compiler, transcoder, config.clone())
    }

    /// Replace the freshness check
    pub fn with_freshness(mut self, freshness: Arc<dyn FreshnessCheck>) -> Self {
        self.freshness = freshness;
        self
    }

    /// Plan one job per (document, configured format)
    ///
    /// # Errors
    ///
    /// Fails before any job is planned when a document file name contains a space.
    pub async fn jobs(&self, documents: &[PathBuf], build_dir: &Path) -> Result<Vec<ConversionJob>> {
        let mut jobs = Vec::with_capacity(documents.len() * self.config.formats.len());
        for document in documents {
            let name = document
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.contains(' ') {
                return Err(DocumentError::InvalidName {
                    path: document.clone(),
                    reason: "spaces are not allowed in document file names".into(),
                }
                .into());
            }
            let source_modified = modified(document).await?;
            for &format in &self.config.formats {
                let mut job = ConversionJob::new(document, format, build_dir);
                job.template = self.template(format);
                job.source_modified = source_modified;
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Convert every document to every configured format inside `build_dir`
    pub async fn convert(&self, documents: &[PathBuf], build_dir: &Path) -> Result<ConversionReport> {
        tokio::fs::create_dir_all(build_dir).await?;
        let jobs = self.jobs(documents, build_dir).await?;
        info!(
            documents = documents.len(),
            jobs = jobs.len(),
            freshness = self.freshness.name(),
            "starting conversion"
        );

        let mut report = ConversionReport::default();
        for mut job in jobs {
            let started = Instant::now();
            let mut artifacts = Vec::new();
            let mut up_to_date = false;
            let error = match self.run_job(&mut job, build_dir, &mut artifacts, &mut up_to_date).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(
                        document = %job.source.display(),
                        format = %job.format,
                        state = ?job.state,
                        error = %e,
                        "conversion failed"
                    );
                    job.transition(JobState::Error);
                    Some(e)
                }
            };
            report.outcomes.push(JobOutcome {
                job,
                artifacts,
                up_to_date,
                elapsed: started.elapsed(),
                error,
            });
        }
        Ok(report)
    }

    /// Convert, then copy every artifact into `destination`
    ///
    /// Returns the materialized files. Conversion failures are reported after
    /// the artifacts of the successful jobs were copied.
    pub async fn run(
        &self,
        documents: &[PathBuf],
        build_dir: &Path,
        destination: &Path,
    ) -> Result<Vec<PathBuf>> {
        let mut report = self.convert(documents, build_dir).await?;
        let copied = crate::materialize::materialize(&report.artifacts(), build_dir, destination).await?;
        for outcome in report.outcomes.iter_mut().filter(|o| o.error.is_none()) {
            outcome.job.transition(JobState::Materialized);
        }
        report.finalize()?;
        Ok(copied)
    }

    fn template(&self, format: TargetFormat) -> Option<String> {
        match format {
            TargetFormat::Html | TargetFormat::Docx => self.config.html_template.clone(),
            TargetFormat::Latex | TargetFormat::Pdf => self.config.latex_template.clone(),
            _ => None,
        }
    }

    async fn run_job(
        &self,
        job: &mut ConversionJob,
        build_dir: &Path,
        artifacts: &mut Vec<PathBuf>,
        up_to_date: &mut bool,
    ) -> Result<()> {
        *up_to_date = self.freshness.is_fresh(&job.output, &job.source).await?;
        if *up_to_date {
            debug!(
                document = %job.source.display(),
                format = %job.format,
                artifact = %job.output.display(),
                "artifact up to date, skipping conversion"
            );
        } else {
            self.primary(job, build_dir).await?;
            self.freshness.record(&job.output, &job.source).await?;
        }
        artifacts.push(job.output.clone());
        job.transition(JobState::Converted);

        if let (Some(stage), Some(secondary)) = (job.format.secondary_stage(), job.secondary_output.clone()) {
            let fresh = *up_to_date && self.freshness.is_fresh(&secondary, &job.source).await?;
            if fresh {
                debug!(artifact = %secondary.display(), "secondary artifact up to date");
            } else {
                self.secondary(job, stage, &secondary, build_dir).await?;
                self.freshness.record(&secondary, &job.source).await?;
            }
            artifacts.push(secondary);
            job.transition(JobState::SecondaryConverted);
        }

        let links = LinkTargets::from_formats(&self.config.formats);
        artifacts.extend(postprocess::post_process(job.format, &job.output, &job.source, links).await?);
        job.transition(JobState::PostProcessed);
        Ok(())
    }

    async fn primary(&self, job: &ConversionJob, build_dir: &Path) -> Result<()> {
        let Some(target) = job.format.converter_target() else {
            postprocess::copy_sibling(&job.source, build_dir).await?;
            return Ok(());
        };

        let basename = file_stem(&job.source);
        let request = ConvertRequest {
            input: &job.source,
            output_dir: build_dir,
            basename: &basename,
            target,
            template: job.template.as_deref(),
        };
        info!(
            document = %job.source.display(),
            format = %job.format,
            tool = self.converter.name(),
            "converting"
        );
        let output = self.converter.convert(&request).await?;
        let stage = match target {
            "latex" => Stage::Intermediate,
            _ => Stage::Convert,
        };
        classify(self.converter.name(), stage, &output)?;

        if !tokio::fs::try_exists(&job.output).await? {
            return Err(ConversionError::MissingOutput {
                path: job.output.clone(),
                stderr: output.stderr,
            }
            .into());
        }
        if stage == Stage::Intermediate {
            postprocess::normalize_latex_file(&job.output).await?;
        }
        Ok(())
    }

    async fn secondary(
        &self,
        job: &ConversionJob,
        stage: SecondaryStage,
        secondary: &Path,
        build_dir: &Path,
    ) -> Result<()> {
        let (tool, output, stage) = match stage {
            SecondaryStage::Compile => {
                let output = self.compiler.compile(&job.output, build_dir).await?;
                (self.compiler.name(), output, Stage::Compile)
            }
            SecondaryStage::Transcode => {
                let output = self
                    .transcoder
                    .transcode(&job.output, secondary, job.format.extension())
                    .await?;
                (self.transcoder.name(), output, Stage::Transcode)
            }
        };
        info!(
            document = %job.source.display(),
            format = %job.format,
            tool,
            %stage,
            "second stage finished"
        );
        classify(tool, stage, &output)?;

        if !tokio::fs::try_exists(secondary).await? {
            return Err(ConversionError::MissingOutput {
                path: secondary.to_path_buf(),
                stderr: output.stderr,
            }
            .into());
        }
        Ok(())
    }
}

/// Explicit path, or PATH lookup when allowed
fn resolve(explicit: &Option<PathBuf>, binary: &str, search_path: bool) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.clone()),
        None if search_path => which::which(binary).ok(),
        None => None,
    }
}
