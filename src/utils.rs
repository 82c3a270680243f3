//! Utility functions for file timestamps, digests and path manipulation

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Modification time of a file, `None` when it does not exist
pub async fn modified(path: &Path) -> Result<Option<SystemTime>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether `artifact` exists and was modified strictly after `source`
///
/// # Arguments
///
/// * `artifact` - The produced file
/// * `source` - The file it was produced from
///
/// # Returns
///
/// `false` when the artifact is missing. A missing source is an error.
pub async fn is_newer(artifact: &Path, source: &Path) -> Result<bool> {
    let Some(produced) = modified(artifact).await? else {
        return Ok(false);
    };
    let changed = tokio::fs::metadata(source).await?.modified()?;
    Ok(changed < produced)
}

/// Whether two paths name the same existing file
///
/// Both paths are canonicalized, so a symlink and its target compare equal.
/// A missing path never matches.
pub async fn same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Hex SHA-256 digest of a file's content
pub async fn sha256_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// File name without its extension
///
/// # Examples
///
/// ```
/// use nbpress::utils::file_stem;
/// use std::path::Path;
///
/// assert_eq!(file_stem(Path::new("/docs/intro_session1.ipynb")), "intro_session1");
/// assert_eq!(file_stem(Path::new("archive.tar.gz")), "archive.tar");
/// ```
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `path` with `suffix` appended to its full file name
///
/// # Examples
///
/// ```
/// use nbpress::utils::append_suffix;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(
///     append_suffix(Path::new("build/intro.html"), ".sha256"),
///     PathBuf::from("build/intro.html.sha256")
/// );
/// ```
pub fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Whether the file extension is one of `extensions` (case-insensitive)
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| extensions.contains(&e.as_str()))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[tokio::test]
    async fn newer_compares_modification_times() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("doc.ipynb");
        let artifact = dir.path().join("doc.html");
        std::fs::write(&source, "{}").unwrap();

        assert!(!is_newer(&artifact, &source).await.unwrap());

        std::fs::write(&artifact, "<html/>").unwrap();
        let now = SystemTime::now();
        set_mtime(&source, now - Duration::from_secs(60));
        set_mtime(&artifact, now);
        assert!(is_newer(&artifact, &source).await.unwrap());

        set_mtime(&source, now + Duration::from_secs(60));
        assert!(!is_newer(&artifact, &source).await.unwrap());
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("doc.html");
        std::fs::write(&artifact, "").unwrap();

        assert!(is_newer(&artifact, &dir.path().join("gone.ipynb")).await.is_err());
    }

    #[tokio::test]
    async fn same_file_sees_through_relative_paths() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.png");
        std::fs::write(&file, "png").unwrap();
        let detour = dir.path().join(".").join("a.png");

        assert!(same_file(&file, &detour).await);
        assert!(!same_file(&file, &dir.path().join("b.png")).await);
    }

    #[tokio::test]
    async fn digest_changes_with_content() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("doc.ipynb");
        std::fs::write(&file, "one").unwrap();
        let first = sha256_file(&file).await.unwrap();
        std::fs::write(&file, "two").unwrap();
        let second = sha256_file(&file).await.unwrap();

        assert_eq!(first.len(), 64);
        assert_ne!(first, second);
    }

    #[test]
    fn extension_match_ignores_case() {
        assert!(has_extension(Path::new("a/B.PNG"), &["png", "pdf"]));
        assert!(!has_extension(Path::new("a/b.tex"), &["png", "pdf"]));
        assert!(!has_extension(Path::new("a/README"), &["png"]));
    }
}
