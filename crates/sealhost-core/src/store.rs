//! Status persistence keyed by cluster name

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sealhost_infra::InfraStatus;
use tracing::debug;

use crate::error::CoreError;

/// Load and save the status of a cluster between reconciliation passes
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// `None` when the cluster was never saved
    async fn load(&self, cluster: &str) -> Result<Option<InfraStatus>, CoreError>;

    async fn save(&self, cluster: &str, status: &InfraStatus) -> Result<(), CoreError>;

    /// Forget the cluster; removing an unknown cluster is not an error
    async fn remove(&self, cluster: &str) -> Result<(), CoreError>;
}

/// One JSON document per cluster in a directory
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    dir: PathBuf,
}

impl FileStatusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, cluster: &str) -> Result<PathBuf, CoreError> {
        let valid = !cluster.is_empty()
            && cluster
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !cluster.starts_with('.');
        if !valid {
            return Err(CoreError::ConfigError(format!(
                "invalid cluster name: {cluster:?}"
            )));
        }
        Ok(self.dir.join(format!("{cluster}.json")))
    }
}

fn store_error(path: &Path, err: impl std::fmt::Display) -> CoreError {
    CoreError::Store(format!("{}: {err}", path.display()))
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn load(&self, cluster: &str) -> Result<Option<InfraStatus>, CoreError> {
        let path = self.path_for(cluster)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_error(&path, e)),
        };
        let status = serde_json::from_slice(&data).map_err(|e| store_error(&path, e))?;
        debug!(path = %path.display(), "loaded cluster status");
        Ok(Some(status))
    }

    async fn save(&self, cluster: &str, status: &InfraStatus) -> Result<(), CoreError> {
        let path = self.path_for(cluster)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| store_error(&self.dir, e))?;

        let data = serde_json::to_vec_pretty(status).map_err(|e| store_error(&path, e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| store_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| store_error(&path, e))?;

        debug!(path = %path.display(), "saved cluster status");
        Ok(())
    }

    async fn remove(&self, cluster: &str) -> Result<(), CoreError> {
        let path = self.path_for(cluster)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(store_error(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStatusStore::new(dir.path().join("clusters"));

        assert!(store.load("demo").await.unwrap().is_none());

        let mut status = InfraStatus::default();
        status.cluster.network_id = "vpc-000001".to_string();
        store.save("demo", &status).await.unwrap();
        assert_eq!(store.load("demo").await.unwrap(), Some(status));

        store.remove("demo").await.unwrap();
        store.remove("demo").await.unwrap();
        assert!(store.load("demo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let store = FileStatusStore::new("/tmp/sealhost-test");
        assert!(matches!(
            store.load("../etc/passwd").await,
            Err(CoreError::ConfigError(_))
        ));
        assert!(store.load("").await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("demo.json"), b"{not json").unwrap();

        let store = FileStatusStore::new(dir.path());
        assert!(matches!(store.load("demo").await, Err(CoreError::Store(_))));
    }
}
