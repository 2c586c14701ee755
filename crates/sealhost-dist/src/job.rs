//! Transfer plans and per-host jobs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;

use crate::error::DistError;
use crate::fingerprint::{bytes_fingerprint, local_fingerprint};
use crate::source::{ResolvedArtifact, TransferSource};

/// One step of a plan
#[derive(Debug, Clone)]
pub enum PlanEntry {
    /// Create a remote directory
    Dir { remote: String },
    /// Ensure a remote file holds `source` with the given fingerprint
    File {
        source: TransferSource,
        remote: String,
        fingerprint: String,
    },
}

/// Everything one host needs, computed once and shared read-only by every host
///
/// Directories always precede their children.
#[derive(Debug, Clone, Default)]
pub struct TransferPlan {
    pub dest_dir: String,
    pub entries: Vec<PlanEntry>,
}

impl TransferPlan {
    /// Plan for a resolved artifact placed under `dest_dir`
    ///
    /// A file lands at `dest_dir/<name>`; a directory is mirrored at
    /// `dest_dir/<name>` with every file fingerprinted up front.
    ///
    /// # Errors
    /// Returns an error when the artifact cannot be walked or read
    pub async fn for_artifact(
        artifact: &ResolvedArtifact,
        dest_dir: &str,
    ) -> Result<Self, DistError> {
        let name = artifact.file_name().ok_or_else(|| {
            DistError::InvalidRequest(format!(
                "artifact {} has no file name",
                artifact.path.display()
            ))
        })?;
        let remote_root = remote_join(dest_dir, &name);

        let entries = match &artifact.fingerprint {
            Some(fingerprint) => vec![PlanEntry::File {
                source: TransferSource::File(artifact.path.clone()),
                remote: remote_root,
                fingerprint: fingerprint.clone(),
            }],
            None => walk_dir(&artifact.path, &remote_root).await?,
        };

        Ok(Self {
            dest_dir: dest_dir.to_string(),
            entries,
        })
    }

    /// Plan pushing an in-memory buffer to an exact remote path
    ///
    /// # Errors
    /// Returns `DistError::InvalidRequest` for a relative or bare path
    pub fn for_bytes(data: Arc<[u8]>, remote_path: &str) -> Result<Self, DistError> {
        let dest_dir = remote_parent(remote_path).ok_or_else(|| {
            DistError::InvalidRequest(format!("remote path {remote_path} has no parent"))
        })?;
        let fingerprint = bytes_fingerprint(&data);

        Ok(Self {
            dest_dir,
            entries: vec![PlanEntry::File {
                source: TransferSource::Bytes(data),
                remote: remote_path.to_string(),
                fingerprint,
            }],
        })
    }

    /// Number of file entries
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, PlanEntry::File { .. }))
            .count()
    }
}

/// Work for one host within one distribution call
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub host: String,
    pub plan: Arc<TransferPlan>,
    pub before: Option<String>,
    pub after: Option<String>,
}

async fn walk_dir(root: &Path, remote_root: &str) -> Result<Vec<PlanEntry>, DistError> {
    let mut entries = Vec::new();
    let mut stack: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), remote_root.to_string())];

    while let Some((local, remote)) = stack.pop() {
        entries.push(PlanEntry::Dir {
            remote: remote.clone(),
        });

        let mut children = Vec::new();
        let mut dir = fs::read_dir(&local)
            .await
            .map_err(|e| DistError::io(local.as_path(), &e))?;
        while let Some(child) = dir
            .next_entry()
            .await
            .map_err(|e| DistError::io(local.as_path(), &e))?
        {
            children.push(child.path());
        }
        children.sort();

        let mut subdirs = Vec::new();
        for child in children {
            let name = child
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let child_remote = remote_join(&remote, &name);
            let metadata = fs::metadata(&child)
                .await
                .map_err(|e| DistError::io(child.as_path(), &e))?;

            if metadata.is_dir() {
                subdirs.push((child, child_remote));
            } else {
                let fingerprint = local_fingerprint(&child).await?;
                entries.push(PlanEntry::File {
                    source: TransferSource::File(child),
                    remote: child_remote,
                    fingerprint,
                });
            }
        }

        // reversed so subdirectories are visited in name order
        stack.extend(subdirs.into_iter().rev());
    }

    Ok(entries)
}

/// Join remote path components with `/`
#[must_use]
pub fn remote_join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

fn remote_parent(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some(if parent.is_empty() {
        "/".to_string()
    } else {
        parent.to_string()
    })
}
