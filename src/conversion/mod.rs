//! Multi-format conversion pipeline
//!
//! Each (document, format) job moves through
//! `Pending → Converted → [SecondaryConverted] → PostProcessed → Materialized`,
//! or ends in `Error`:
//!
//! 1. Skip check - reuse the primary artifact when the [`FreshnessCheck`] says so
//! 2. Primary - run the [`Converter`] (or copy the document for `notebook`)
//! 3. Secondary - compile LaTeX to PDF or transcode HTML to docx
//! 4. Post-process - cross-links, LaTeX cleanup, sibling copy of the document
//! 5. Materialize - copy all artifacts to the destination, see [`crate::materialize`]
//!
//! ## Usage
//!
//! ```no_run
//! use nbpress::config::ConversionConfig;
//! use nbpress::conversion::ConversionPipeline;
//! use std::path::{Path, PathBuf};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = ConversionPipeline::from_config(&ConversionConfig::default());
//!     let documents = vec![PathBuf::from("notebooks/intro.ipynb")];
//!     let copied = pipeline
//!         .run(&documents, Path::new("build/notebooks"), Path::new("site/notebooks"))
//!         .await?;
//!     println!("{} files published", copied.len());
//!     Ok(())
//! }
//! ```

mod classify;
mod cli;
mod freshness;
mod noop;
mod pipeline;
mod postprocess;
mod traits;

pub use classify::{Stage, classify};
pub use cli::{CliCompiler, CliConverter, CliTranscoder, nbconvert_args};
pub use freshness::{ContentHashFreshness, FreshnessCheck, MtimeFreshness, from_mode};
pub use noop::NoOpTool;
pub use pipeline::{ConversionJob, ConversionPipeline, ConversionReport, JobOutcome};
pub use postprocess::{
    LinkTargets, add_html_links, add_rst_links, copy_sibling, normalize_latex, post_process,
};
pub use traits::{Compiler, ConvertRequest, Converter, ToolOutput, Transcoder};
