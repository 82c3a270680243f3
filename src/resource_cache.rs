//! URL resource cache
//!
//! Remote resources referenced by a document are downloaded once into the
//! working directory before execution, then every occurrence of the URL in
//! block sources is replaced by the local path. A cached file is never
//! evicted: a later run with the same working directory reuses it.
//!
//! Downloads stream into a `.part` file that is renamed into place only
//! once complete, so a failed download leaves no cache entry and two
//! runners racing on the same URL end with the same file.

use crate::error::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info};

/// Write buffer size for downloads (2 MiB)
pub const FETCH_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Prefix of cached file names
const CACHE_PREFIX: &str = "__cached__";

/// Source of remote resources
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Stream the resource at `url` into `sink`, returning the number of bytes written
    async fn fetch(&self, url: &str, sink: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<u64>;
}

/// HTTP(S) fetcher backed by `reqwest`
#[derive(Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with a default client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetcher sharing an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, sink: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<u64> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}

/// Local file name for a cached URL
///
/// `__cached__<digest>_<last path segment>`, where the digest is the first 12
/// hex characters of the SHA-256 of the whole URL (host and query included)
/// and `:` and `%` are made safe. The segment keeps the file extension.
///
/// # Examples
///
/// ```
/// use nbpress::resource_cache::cache_file_name;
///
/// let one = cache_file_name("http://host/data.csv?id=1");
/// let two = cache_file_name("http://host/data.csv?id=2");
/// assert!(one.starts_with("__cached__") && one.ends_with("_data.csv"));
/// assert_ne!(one, two);
/// ```
pub fn cache_file_name(url: &str) -> String {
    let parsed_last = url::Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|s| !s.is_empty())
    });
    let last = parsed_last
        .unwrap_or_else(|| url.rsplit('/').next().unwrap_or(url).to_string());
    let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
    format!("{}{}_{}", CACHE_PREFIX, &digest[..12], last).replace([':', '%', '?', '&', '='], "_")
}

/// Text substituted for a cached URL: the absolute local path with forward slashes
pub fn replacement_text(local: &Path) -> String {
    local.to_string_lossy().replace('\\', "/")
}

/// Download cache rooted at one working directory
pub struct ResourceCache {
    folder: PathBuf,
}

impl ResourceCache {
    /// Create a cache for `folder` (created on first download)
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    /// Directory holding the cached files
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Absolute path the URL is cached at
    pub fn local_path(&self, url: &str) -> PathBuf {
        let folder = std::path::absolute(&self.folder).unwrap_or_else(|_| self.folder.clone());
        folder.join(cache_file_name(url))
    }

    /// Make sure every URL is cached locally
    ///
    /// Returns `url -> replacement text` for all of them. URLs already on disk
    /// are not fetched again; duplicated URLs are fetched once.
    pub async fn ensure(
        &self,
        urls: &[String],
        fetcher: &dyn ResourceFetcher,
    ) -> Result<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();
        if urls.is_empty() {
            return Ok(resolved);
        }
        tokio::fs::create_dir_all(&self.folder).await?;

        for url in urls {
            if resolved.contains_key(url) {
                continue;
            }
            let local = self.local_path(url);
            if tokio::fs::try_exists(&local).await? {
                debug!(url = %url, ?local, "resource already cached");
            } else {
                self.download(url, &local, fetcher).await?;
            }
            resolved.insert(url.clone(), replacement_text(&local));
        }
        Ok(resolved)
    }

    async fn download(&self, url: &str, local: &Path, fetcher: &dyn ResourceFetcher) -> Result<()> {
        info!(url = %url, ?local, "downloading resource");
        let mut partial = local.as_os_str().to_owned();
        partial.push(format!(".{}.part", std::process::id()));
        let partial = PathBuf::from(partial);

        let outcome = async {
            let file = tokio::fs::File::create(&partial).await?;
            let mut writer = BufWriter::with_capacity(FETCH_CHUNK_SIZE, file);
            let bytes = fetcher.fetch(url, &mut writer).await?;
            writer.flush().await?;
            writer.get_mut().sync_all().await?;
            Ok::<u64, Error>(bytes)
        }
        .await;

        match outcome {
            Ok(bytes) => {
                tokio::fs::rename(&partial, local).await?;
                debug!(url = %url, bytes, "resource cached");
                Ok(())
            }
            Err(e) => {
                tokio::fs::remove_file(&partial).await.ok();
                Err(e)
            }
        }
    }
}
