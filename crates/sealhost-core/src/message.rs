//! Message types for actor communication
//!
//! Message handlers are implemented in the actor module.

use kameo_macros::Reply;
use serde::Serialize;

use sealhost_infra::{InfraSpec, InfraStatus};

use crate::state::ClusterPhase;

/// Run one reconciliation pass towards `spec`
///
/// A spec with a deletion timestamp tears the cluster down instead.
#[derive(Debug, Clone)]
pub struct ApplyInfra {
    pub spec: InfraSpec,
}

/// Outcome of an apply pass
///
/// Step failures do not fail the message; they are listed in `errors` next
/// to the status the pass left behind.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub status: InfraStatus,
    pub errors: Vec<String>,
    pub phase: ClusterPhase,
}

impl ApplyReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Get the current status of the cluster
#[derive(Debug)]
pub struct GetInfraStatus;

/// Point-in-time copy of the cluster status
#[derive(Debug, Clone, Serialize, Reply)]
pub struct StatusSnapshot {
    pub name: String,
    pub phase: ClusterPhase,
    pub status: InfraStatus,
}

/// Distribute an artifact to the ready hosts of the cluster
#[derive(Debug, Clone, Default)]
pub struct InstallArtifact {
    /// Local path or `http(s)` URL
    pub source: String,
    pub dest_dir: String,
    pub before: Option<String>,
    pub after: Option<String>,
    /// Only hosts of groups carrying this role
    pub role: Option<String>,
}
