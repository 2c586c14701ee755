//! Artifact sources and location resolution

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::DistError;
use crate::fingerprint::local_fingerprint;

/// Local content to push to a host
#[derive(Debug, Clone)]
pub enum TransferSource {
    /// A file on the local filesystem
    File(PathBuf),
    /// An in-memory buffer, e.g. a rendered config file
    Bytes(Arc<[u8]>),
}

impl TransferSource {
    /// Size in bytes
    ///
    /// # Errors
    /// Returns an error when the file's metadata cannot be read
    pub async fn size(&self) -> Result<u64, DistError> {
        match self {
            TransferSource::File(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.len())
                .map_err(|e| DistError::io(path.as_path(), &e)),
            TransferSource::Bytes(data) => Ok(data.len() as u64),
        }
    }
}

/// A location resolved to local content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub path: PathBuf,
    /// Content fingerprint; `None` for directories, whose files are
    /// fingerprinted one by one
    pub fingerprint: Option<String>,
}

impl ResolvedArtifact {
    /// Last path component, used as the remote file or directory name
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// Turns a location (path or URL) into local content
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    async fn resolve(&self, location: &str) -> Result<ResolvedArtifact, DistError>;
}

/// Resolves local paths in place and downloads `http(s)` URLs into a cache
#[derive(Debug, Clone)]
pub struct HttpArtifactResolver {
    client: Client,
    cache_dir: PathBuf,
}

impl HttpArtifactResolver {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self::with_client(Client::new(), cache_dir)
    }

    pub fn with_client(client: Client, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            cache_dir: cache_dir.into(),
        }
    }

    async fn resolve_path(&self, path: &Path) -> Result<ResolvedArtifact, DistError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| DistError::io(path, &e))?;

        let fingerprint = if metadata.is_dir() {
            None
        } else {
            Some(local_fingerprint(path).await?)
        };

        Ok(ResolvedArtifact {
            path: path.to_path_buf(),
            fingerprint,
        })
    }

    /// Cache location of `url`: one directory per URL, keeping the file name
    fn cache_path(&self, url: &Url) -> Option<PathBuf> {
        let name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())?;
        let key = hex::encode(&Sha256::digest(url.as_str().as_bytes())[..8]);
        Some(self.cache_dir.join(key).join(name))
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn download(&self, url: &Url) -> Result<ResolvedArtifact, DistError> {
        let download_error = |reason: String| DistError::Download {
            url: url.to_string(),
            reason,
        };

        let target = self
            .cache_path(url)
            .ok_or_else(|| download_error("URL has no file name".to_string()))?;
        let mut partial = target.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DistError::io(dir, &e))?;
        }

        let (fingerprint, total) = match self.fetch(url, &partial).await {
            Ok(fetched) => fetched,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| DistError::io(target.as_path(), &e))?;

        info!(path = %target.display(), bytes = total, "downloaded artifact");
        Ok(ResolvedArtifact {
            path: target,
            fingerprint: Some(fingerprint),
        })
    }

    /// Stream `url` into `path`, returning its fingerprint and size
    async fn fetch(&self, url: &Url, path: &Path) -> Result<(String, u64), DistError> {
        let download_error = |reason: String| DistError::Download {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(download_error(format!("HTTP {}", response.status())));
        }

        let mut file = File::create(path).await.map_err(|e| DistError::io(path, &e))?;
        let mut hasher = Sha256::new();
        let mut total = 0u64;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_error(e.to_string()))?
        {
            hasher.update(&chunk);
            total += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| DistError::io(path, &e))?;
        }
        file.flush().await.map_err(|e| DistError::io(path, &e))?;

        Ok((hex::encode(hasher.finalize()), total))
    }
}

#[async_trait]
impl ArtifactResolver for HttpArtifactResolver {
    async fn resolve(&self, location: &str) -> Result<ResolvedArtifact, DistError> {
        match Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => self.download(&url).await,
            _ => {
                debug!(location = %location, "resolving local artifact");
                self.resolve_path(Path::new(location)).await
            }
        }
    }
}
