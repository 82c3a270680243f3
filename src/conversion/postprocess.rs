//! Format-specific fixes applied to converted artifacts
//!
//! Every function here is idempotent: running it on an already processed
//! artifact leaves the file (and its modification time) untouched.

use crate::error::{Error, Result};
use crate::types::TargetFormat;
use crate::utils::{file_stem, is_newer, same_file};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

const HTML_MARKER: &str = "<!-- nbpress-links -->";
const RST_MARKER: &str = ".. nbpress-links";

// pairs are consumed left to right, so a closing `$` never opens the next formula
#[allow(clippy::expect_used)]
static INLINE_MATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^\\$])\$([^$\n]+)\$").expect("inline math pattern"));

/// Which sibling formats a page links to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkTargets {
    /// Link to the compiled PDF
    pub pdf: bool,
    /// Link to the HTML page
    pub html: bool,
    /// Link to the extracted script
    pub python: bool,
}

impl LinkTargets {
    /// Links to every format being produced in the same run
    pub fn from_formats(formats: &[TargetFormat]) -> Self {
        Self {
            pdf: formats.contains(&TargetFormat::Pdf),
            html: formats.contains(&TargetFormat::Html),
            python: formats.contains(&TargetFormat::Python),
        }
    }
}

/// Copy `source` into `dir` unless an up-to-date copy is already there
///
/// Returns the path of the copy.
pub async fn copy_sibling(source: &Path, dir: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .ok_or_else(|| Error::Other(format!("no file name in {}", source.display())))?;
    let target = dir.join(name);
    if same_file(source, &target).await || is_newer(&target, source).await? {
        return Ok(target);
    }
    tokio::fs::copy(source, &target).await?;
    debug!(?source, ?target, "copied document next to artifact");
    Ok(target)
}

/// Fix LaTeX produced from a document before it is compiled
///
/// Inline formulas written as `$ x $` lose their inner padding and
/// typographic quotes become LaTeX quotes.
pub fn normalize_latex(text: &str) -> String {
    let trimmed = INLINE_MATH.replace_all(text, |caps: &regex::Captures<'_>| {
        let lead = caps.get(1).map_or("", |m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str());
        match body.trim() {
            "" => caps[0].to_string(),
            inner => format!("{lead}${inner}$"),
        }
    });
    trimmed
        .replace('\u{201c}', "``")
        .replace('\u{201d}', "''")
        .replace('\u{2018}', "`")
        .replace('\u{2019}', "'")
}

/// Append links to the source document and its sibling formats to an HTML page
pub fn add_html_links(html: &str, stem: &str, links: LinkTargets) -> String {
    if html.contains(HTML_MARKER) {
        return html.to_string();
    }
    let mut anchors = vec![format!("<a href=\"{stem}.ipynb\">notebook</a>")];
    if links.pdf {
        anchors.push(format!("<a href=\"{stem}.pdf\">pdf</a>"));
    }
    if links.python {
        anchors.push(format!("<a href=\"{stem}.py\">python</a>"));
    }
    let block = format!("{HTML_MARKER}\n<p class=\"nbpress-links\">{}</p>\n", anchors.join(" | "));

    match html.rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], block, &html[at..]),
        None => format!("{html}\n{block}"),
    }
}

/// Append links to the source document and its sibling formats to a reST page
pub fn add_rst_links(rst: &str, stem: &str, links: LinkTargets) -> String {
    if rst.contains(RST_MARKER) {
        return rst.to_string();
    }
    let mut refs = vec![format!(":download:`notebook <{stem}.ipynb>`")];
    if links.html {
        refs.push(format!("`html <{stem}.html>`__"));
    }
    if links.pdf {
        refs.push(format!(":download:`pdf <{stem}.pdf>`"));
    }
    if links.python {
        refs.push(format!(":download:`python <{stem}.py>`"));
    }
    format!(
        "{}\n\n{RST_MARKER}\n\n{}\n",
        rst.trim_end(),
        refs.join(", ")
    )
}

async fn rewrite(path: &Path, fix: impl FnOnce(&str) -> String) -> Result<()> {
    let text = tokio::fs::read_to_string(path).await?;
    let fixed = fix(&text);
    if fixed != text {
        tokio::fs::write(path, fixed).await?;
        debug!(?path, "artifact post-processed");
    }
    Ok(())
}

/// Normalize a LaTeX file in place
pub async fn normalize_latex_file(path: &Path) -> Result<()> {
    rewrite(path, normalize_latex).await
}

/// Apply the fixes of `format` to its primary artifact
///
/// Returns the files the fix caused to exist: the artifact itself plus the
/// copy of the source document placed next to it. Formats with no fixes
/// return an empty list.
pub async fn post_process(
    format: TargetFormat,
    artifact: &Path,
    source: &Path,
    links: LinkTargets,
) -> Result<Vec<PathBuf>> {
    let dir = artifact.parent().unwrap_or_else(|| Path::new("."));
    let stem = file_stem(source);

    match format {
        TargetFormat::Notebook => Ok(vec![copy_sibling(source, dir).await?]),
        TargetFormat::Html => {
            rewrite(artifact, |t| add_html_links(t, &stem, LinkTargets { html: false, ..links })).await?;
            Ok(vec![artifact.to_path_buf(), copy_sibling(source, dir).await?])
        }
        TargetFormat::Rst => {
            rewrite(artifact, |t| add_rst_links(t, &stem, links)).await?;
            Ok(vec![artifact.to_path_buf(), copy_sibling(source, dir).await?])
        }
        TargetFormat::Latex | TargetFormat::Pdf => {
            Ok(vec![artifact.to_path_buf(), copy_sibling(source, dir).await?])
        }
        TargetFormat::Python | TargetFormat::Docx => Ok(Vec::new()),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    #[test]
    fn inline_math_padding_is_removed() {
        assert_eq!(
            normalize_latex("where $ x^2 $ grows"),
            "where $x^2$ grows"
        );
        assert_eq!(normalize_latex("$ a $ and $b $"), "$a$ and $b$");
        assert_eq!(normalize_latex("$$ x $$"), "$$ x $$");
        assert_eq!(normalize_latex(r"cost \$ 5 $"), r"cost \$ 5 $");
        assert_eq!(normalize_latex("$x$"), "$x$");
        assert_eq!(
            normalize_latex("$x$ and $ y $"),
            "$x$ and $y$"
        );
    }

    #[test]
    fn typographic_quotes_become_latex_quotes() {
        assert_eq!(
            normalize_latex("\u{201c}quoted\u{201d} and \u{2018}single\u{2019}"),
            "``quoted'' and `single'"
        );
    }

    #[test]
    fn html_links_go_before_body_end_once() {
        let links = LinkTargets {
            pdf: true,
            html: false,
            python: true,
        };
        let page = "<html><body><p>x</p></body></html>";
        let linked = add_html_links(page, "intro", links);

        assert!(linked.contains("<a href=\"intro.ipynb\">notebook</a>"));
        assert!(linked.contains("intro.pdf"));
        assert!(linked.contains("intro.py"));
        assert!(linked.find("nbpress-links").unwrap() < linked.find("</body>").unwrap());
        assert_eq!(add_html_links(&linked, "intro", links), linked);
    }

    #[test]
    fn rst_links_only_name_requested_formats() {
        let linked = add_rst_links("Intro\n=====\n\ntext\n", "intro", LinkTargets {
            html: true,
            ..Default::default()
        });
        assert!(linked.contains(":download:`notebook <intro.ipynb>`"));
        assert!(linked.contains("`html <intro.html>`__"));
        assert!(!linked.contains("intro.pdf"));
        assert!(!linked.contains("intro.py"));
        assert_eq!(add_rst_links(&linked, "intro", LinkTargets::default()), linked);
    }

    #[tokio::test]
    async fn sibling_copy_only_when_missing_or_stale() {
        let docs = TempDir::new().unwrap();
        let build = TempDir::new().unwrap();
        let source = docs.path().join("intro.ipynb");
        std::fs::write(&source, "v1").unwrap();

        let copy = copy_sibling(&source, build.path()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&copy).unwrap(), "v1");

        // a fresher copy is left alone
        std::fs::write(&copy, "kept").unwrap();
        let file = std::fs::File::options().write(true).open(&copy).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
        copy_sibling(&source, build.path()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&copy).unwrap(), "kept");

        // copying a file onto itself is a no-op
        assert_eq!(copy_sibling(&source, docs.path()).await.unwrap(), source);
    }

    #[tokio::test]
    async fn post_process_reports_created_files() {
        let docs = TempDir::new().unwrap();
        let build = TempDir::new().unwrap();
        let source = docs.path().join("intro.ipynb");
        std::fs::write(&source, "{}").unwrap();
        let html = build.path().join("intro.html");
        std::fs::write(&html, "<body></body>").unwrap();

        let files = post_process(TargetFormat::Html, &html, &source, LinkTargets::default())
            .await
            .unwrap();

        assert_eq!(files, vec![html.clone(), build.path().join("intro.ipynb")]);
        assert!(std::fs::read_to_string(&html).unwrap().contains("intro.ipynb"));

        let py = build.path().join("intro.py");
        std::fs::write(&py, "x = 1").unwrap();
        let files = post_process(TargetFormat::Python, &py, &source, LinkTargets::default())
            .await
            .unwrap();
        assert!(files.is_empty());
    }
}
