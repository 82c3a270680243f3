//! Output materialization
//!
//! Copies the artifacts produced by the conversion pipeline into the
//! publication directory and writes the index page listing them.

use crate::error::{ConversionError, Result};
use crate::utils::{file_stem, has_extension, same_file};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions picked up from the build directory even when no job reported them
const SIDE_FILE_EXTENSIONS: [&str; 3] = ["png", "html", "pdf"];

/// Copy one file into `destination`, then check the copy exists
///
/// Copying a file onto itself is a no-op.
async fn copy_into(file: &Path, destination: &Path) -> Result<PathBuf> {
    let name = file.file_name().ok_or_else(|| ConversionError::Materialization {
        path: file.to_path_buf(),
        reason: "path has no file name".into(),
    })?;
    let target = destination.join(name);

    if same_file(file, &target).await {
        debug!(?target, "file already in place");
    } else {
        tokio::fs::copy(file, &target)
            .await
            .map_err(|e| ConversionError::Materialization {
                path: file.to_path_buf(),
                reason: e.to_string(),
            })?;
        debug!(?file, ?target, "copied");
    }

    if !tokio::fs::try_exists(&target).await? {
        return Err(ConversionError::Materialization {
            path: target,
            reason: "destination missing after copy".into(),
        }
        .into());
    }
    Ok(target)
}

/// Copy `artifacts` and the side files left in `build_dir` into `destination`
///
/// LaTeX sources are intermediate files and are not published. After the
/// listed artifacts, every image, page or PDF in `build_dir` that was not
/// listed (images extracted by the converter, for instance) is copied too.
///
/// # Returns
///
/// The destination paths, in copy order.
///
/// # Errors
///
/// `ConversionError::Materialization` when a copy fails or its destination
/// does not exist afterwards.
pub async fn materialize(
    artifacts: &[PathBuf],
    build_dir: &Path,
    destination: &Path,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(destination).await?;

    let mut copied = Vec::new();
    let mut seen = HashSet::new();
    for artifact in artifacts {
        if has_extension(artifact, &["tex"]) {
            continue;
        }
        let target = copy_into(artifact, destination).await?;
        if seen.insert(target.clone()) {
            copied.push(target);
        }
    }

    let mut entries = tokio::fs::read_dir(build_dir).await?;
    let mut side_files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && has_extension(&path, &SIDE_FILE_EXTENSIONS) {
            side_files.push(path);
        }
    }
    side_files.sort();
    for file in side_files {
        let Some(name) = file.file_name() else {
            continue;
        };
        if seen.contains(&destination.join(name)) {
            continue;
        }
        let target = copy_into(&file, destination).await?;
        seen.insert(target.clone());
        copied.push(target);
    }

    info!(
        destination = %destination.display(),
        files = copied.len(),
        "artifacts materialized"
    );
    Ok(copied)
}

/// Write a reST page with a toctree entry per produced page
///
/// Only `.rst` files are listed, sorted by path, as `notebooks/<stem>`.
pub async fn write_index_page(pages: &[PathBuf], fileout: &Path) -> Result<PathBuf> {
    let mut rst: Vec<&PathBuf> = pages.iter().filter(|p| has_extension(p, &["rst"])).collect();
    rst.sort();

    let mut rows = vec![
        String::new(),
        ".. _l-notebooks:".to_string(),
        String::new(),
        String::new(),
        "Notebooks".to_string(),
        "=========".to_string(),
        String::new(),
        String::new(),
        ".. toctree::".to_string(),
        String::new(),
    ];
    rows.extend(rst.iter().map(|p| format!("    notebooks/{}", file_stem(p))));
    rows.push(String::new());

    tokio::fs::write(fileout, rows.join("\n")).await?;
    debug!(?fileout, pages = rst.len(), "index page written");
    Ok(fileout.to_path_buf())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name).unwrap();
        path
    }

    #[tokio::test]
    async fn copies_artifacts_but_not_latex_sources() {
        let build = TempDir::new().unwrap();
        let site = TempDir::new().unwrap();
        let artifacts = vec![
            touch(build.path(), "a.html"),
            touch(build.path(), "a.tex"),
            touch(build.path(), "a.py"),
        ];

        let copied = materialize(&artifacts, build.path(), site.path()).await.unwrap();

        assert_eq!(
            copied,
            vec![site.path().join("a.html"), site.path().join("a.py")]
        );
        assert!(!site.path().join("a.tex").exists());
    }

    #[tokio::test]
    async fn sweeps_unlisted_side_files() {
        let build = TempDir::new().unwrap();
        let site = TempDir::new().unwrap();
        let html = touch(build.path(), "a.html");
        touch(build.path(), "a_2_1.png");
        touch(build.path(), "notes.txt");

        let copied = materialize(&[html], build.path(), site.path()).await.unwrap();

        assert_eq!(
            copied,
            vec![site.path().join("a.html"), site.path().join("a_2_1.png")]
        );
        assert!(!site.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn same_directory_is_a_no_op() {
        let build = TempDir::new().unwrap();
        let html = touch(build.path(), "a.html");

        let copied = materialize(std::slice::from_ref(&html), build.path(), build.path())
            .await
            .unwrap();

        assert_eq!(copied, vec![html.clone()]);
        assert_eq!(std::fs::read_to_string(&html).unwrap(), "a.html");
    }

    #[tokio::test]
    async fn missing_artifact_is_a_materialization_error() {
        let build = TempDir::new().unwrap();
        let site = TempDir::new().unwrap();

        let err = materialize(&[build.path().join("gone.pdf")], build.path(), site.path())
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "materialization_error");
        assert!(err.to_string().contains("gone.pdf"));
    }

    #[tokio::test]
    async fn index_page_lists_rst_pages_sorted() {
        let dir = TempDir::new().unwrap();
        let fileout = dir.path().join("all_notebooks.rst");
        let pages = vec![
            PathBuf::from("build/zeta.rst"),
            PathBuf::from("build/alpha.rst"),
            PathBuf::from("build/alpha.html"),
        ];

        write_index_page(&pages, &fileout).await.unwrap();

        let text = std::fs::read_to_string(&fileout).unwrap();
        assert!(text.starts_with("\n.. _l-notebooks:\n\n\nNotebooks\n=========\n"));
        let entries: Vec<_> = text.lines().filter(|l| l.starts_with("    ")).collect();
        assert_eq!(entries, vec!["    notebooks/alpha", "    notebooks/zeta"]);
    }
}
