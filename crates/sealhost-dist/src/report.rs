//! Per-host distribution outcomes

use serde::Serialize;

/// What happened to one remote file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Remote fingerprint already matched; nothing sent
    AlreadyCurrent,
    /// Sent and verified
    Transferred { bytes: u64 },
    /// Sent, but the remote fingerprint differs afterwards
    Mismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub remote_path: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

/// Result of one host's unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostReport {
    pub host: String,
    pub files: Vec<FileReport>,
    /// Set when the unit was aborted (connection, auth, transfer failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostReport {
    pub(crate) fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            files: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn failed(host: impl Into<String>, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(host)
        }
    }

    /// Whether any file failed verification
    #[must_use]
    pub fn has_mismatch(&self) -> bool {
        self.files
            .iter()
            .any(|f| matches!(f.outcome, FileOutcome::Mismatch { .. }))
    }

    /// Completed with every file verified
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.has_mismatch()
    }

    /// Bytes pushed to this host
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.files
            .iter()
            .map(|f| match f.outcome {
                FileOutcome::Transferred { bytes } => bytes,
                _ => 0,
            })
            .sum()
    }
}

/// Outcome of one distribution call, hosts in request order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    pub hosts: Vec<HostReport>,
}

impl DistributionReport {
    #[must_use]
    pub fn host(&self, host: &str) -> Option<&HostReport> {
        self.hosts.iter().find(|h| h.host == host)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.hosts.iter().all(HostReport::is_success)
    }

    /// Hosts whose unit was aborted
    #[must_use]
    pub fn failed_hosts(&self) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|h| h.error.is_some())
            .map(|h| h.host.as_str())
            .collect()
    }

    /// Hosts with at least one unverified file
    #[must_use]
    pub fn mismatched_hosts(&self) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|h| h.has_mismatch())
            .map(|h| h.host.as_str())
            .collect()
    }

    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.hosts.iter().map(HostReport::bytes_sent).sum()
    }
}
