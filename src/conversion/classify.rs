//! Failure classification of tool invocations
//!
//! Converters print plenty of harmless warnings on stderr, so a non-empty
//! stderr is not a failure on its own. What counts as fatal depends on the
//! stage that ran the tool.

use super::traits::ToolOutput;
use crate::error::{ConversionError, Result};
use tracing::warn;

/// Pipeline stage that ran a tool
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Primary conversion to the intermediate LaTeX form
    Intermediate,
    /// Any other primary conversion
    Convert,
    /// LaTeX compilation
    Compile,
    /// HTML transcoding
    Transcode,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Intermediate => "intermediate conversion",
            Stage::Convert => "conversion",
            Stage::Compile => "compilation",
            Stage::Transcode => "transcoding",
        };
        f.write_str(name)
    }
}

const FATAL_WORDS: [&str; 3] = ["error", "critical", "bad config"];

/// Decide whether a finished invocation failed
///
/// - a non-zero (or missing) exit status always fails
/// - intermediate conversion fails only when stderr mentions `raise`, since
///   unescaped LaTeX produces noise that is fixed afterwards
/// - other conversions also fail on `error`, `critical` or `bad config`
///   (case-insensitive)
/// - compilation and transcoding fail on any stderr output
///
/// Tolerated stderr is logged as a warning.
pub fn classify(tool: &str, stage: Stage, output: &ToolOutput) -> Result<()> {
    let fail = |message: String| -> Result<()> {
        Err(ConversionError::Tool {
            tool: tool.to_string(),
            stage: stage.to_string(),
            message,
        }
        .into())
    };

    if !output.exit_ok() {
        return fail(format!(
            "exit status {:?}\nCMD:\n{}\nERR:\n{}",
            output.exit_code, output.command, output.stderr
        ));
    }

    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        return Ok(());
    }

    let fatal = match stage {
        Stage::Intermediate => stderr.contains("raise"),
        Stage::Convert => {
            let lower = stderr.to_lowercase();
            stderr.contains("raise") || FATAL_WORDS.iter().any(|w| lower.contains(w))
        }
        Stage::Compile | Stage::Transcode => true,
    };

    if fatal {
        return fail(format!("CMD:\n{}\nERR:\n{}", output.command, stderr));
    }

    warn!(tool, %stage, stderr, "tool wrote to stderr");
    Ok(())
}
