//! Distribution errors

use std::path::PathBuf;

use sealhost_exec::ExecError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DistError {
    #[error("source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("remote fingerprint of {path} unavailable: {reason}")]
    RemoteFingerprint { path: String, reason: String },

    #[error("integrity mismatch on hosts: {}", .hosts.join(", "))]
    IntegrityMismatch { hosts: Vec<String> },

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl DistError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            return DistError::SourceNotFound(path);
        }
        DistError::Io {
            path,
            reason: err.to_string(),
        }
    }

    /// Whether retrying the same call may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            DistError::Download { .. } | DistError::IntegrityMismatch { .. } => true,
            DistError::Exec(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_source_not_found() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(
            DistError::io("/tmp/missing", &err),
            DistError::SourceNotFound(_)
        ));
    }

    #[test]
    fn test_mismatch_lists_hosts() {
        let err = DistError::IntegrityMismatch {
            hosts: vec!["10.0.0.1".into(), "10.0.0.2".into()],
        };
        assert_eq!(err.to_string(), "integrity mismatch on hosts: 10.0.0.1, 10.0.0.2");
        assert!(err.is_retryable());
    }
}
