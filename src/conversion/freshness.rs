//! Up-to-date checks for produced artifacts

use crate::config::FreshnessMode;
use crate::error::Result;
use crate::utils::{append_suffix, is_newer, sha256_file};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Decides whether an artifact can be reused instead of reconverting
#[async_trait]
pub trait FreshnessCheck: Send + Sync {
    /// Whether `artifact` is up to date with respect to `source`
    async fn is_fresh(&self, artifact: &Path, source: &Path) -> Result<bool>;

    /// Remember that `artifact` was just produced from `source`
    async fn record(&self, artifact: &Path, source: &Path) -> Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Artifact is fresh when it was modified after the source
///
/// Two processes touching the same files can race on modification times.
/// [`ContentHashFreshness`] does not have that problem.
pub struct MtimeFreshness;

#[async_trait]
impl FreshnessCheck for MtimeFreshness {
    async fn is_fresh(&self, artifact: &Path, source: &Path) -> Result<bool> {
        is_newer(artifact, source).await
    }

    async fn record(&self, _artifact: &Path, _source: &Path) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mtime"
    }
}

/// Artifact is fresh when its `.sha256` sidecar holds the source's current digest
pub struct ContentHashFreshness;

impl ContentHashFreshness {
    /// Sidecar file recording the digest an artifact was produced from
    pub fn sidecar(artifact: &Path) -> std::path::PathBuf {
        append_suffix(artifact, ".sha256")
    }
}

#[async_trait]
impl FreshnessCheck for ContentHashFreshness {
    async fn is_fresh(&self, artifact: &Path, source: &Path) -> Result<bool> {
        if !tokio::fs::try_exists(artifact).await? {
            return Ok(false);
        }
        let recorded = match tokio::fs::read_to_string(Self::sidecar(artifact)).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(recorded.trim() == sha256_file(source).await?)
    }

    async fn record(&self, artifact: &Path, source: &Path) -> Result<()> {
        let digest = sha256_file(source).await?;
        tokio::fs::write(Self::sidecar(artifact), digest).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "content_hash"
    }
}

/// Freshness check selected by the configuration
pub fn from_mode(mode: FreshnessMode) -> Arc<dyn FreshnessCheck> {
    match mode {
        FreshnessMode::Mtime => Arc::new(MtimeFreshness),
        FreshnessMode::ContentHash => Arc::new(ContentHashFreshness),
    }
}
