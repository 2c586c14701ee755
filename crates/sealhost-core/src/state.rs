//! Cluster lifecycle phase

use std::fmt;

use serde::{Deserialize, Serialize};

use sealhost_infra::InfraStatus;

/// Coarse lifecycle phase of a cluster, derived from its status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterPhase {
    /// Nothing provisioned yet
    Empty,
    /// Some resources exist; the last pass did not fully converge
    Provisioning,
    /// Every host group is ready and the last pass had no errors
    Ready,
    /// Teardown requested but some resources are left
    Deleting,
    /// Teardown completed
    Deleted,
}

impl ClusterPhase {
    /// Phase of a freshly loaded status
    #[must_use]
    pub fn observe(status: &InfraStatus) -> Self {
        if *status == InfraStatus::default() {
            ClusterPhase::Empty
        } else if !status.hosts.is_empty() && status.hosts.iter().all(|h| h.ready) {
            ClusterPhase::Ready
        } else {
            ClusterPhase::Provisioning
        }
    }

    /// Phase after a reconciliation pass
    #[must_use]
    pub fn after_apply(deleting: bool, succeeded: bool, status: &InfraStatus) -> Self {
        match (deleting, succeeded) {
            (true, true) => ClusterPhase::Deleted,
            (true, false) => ClusterPhase::Deleting,
            (false, true) if status.hosts.iter().all(|h| h.ready) => ClusterPhase::Ready,
            (false, _) => ClusterPhase::Provisioning,
        }
    }

    /// Whether artifacts can be installed
    #[must_use]
    pub fn accepts_installs(self) -> bool {
        matches!(self, ClusterPhase::Ready | ClusterPhase::Provisioning)
    }
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterPhase::Empty => "empty",
            ClusterPhase::Provisioning => "provisioning",
            ClusterPhase::Ready => "ready",
            ClusterPhase::Deleting => "deleting",
            ClusterPhase::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use sealhost_infra::HostGroupStatus;

    use super::*;

    fn status(ready: bool) -> InfraStatus {
        let mut group = HostGroupStatus::new(vec!["master".to_string()]);
        group.ready = ready;
        InfraStatus {
            hosts: vec![group],
            ..InfraStatus::default()
        }
    }

    #[test]
    fn test_observe() {
        assert_eq!(ClusterPhase::observe(&InfraStatus::default()), ClusterPhase::Empty);
        assert_eq!(ClusterPhase::observe(&status(true)), ClusterPhase::Ready);
        assert_eq!(ClusterPhase::observe(&status(false)), ClusterPhase::Provisioning);
    }

    #[test]
    fn test_after_apply() {
        assert_eq!(
            ClusterPhase::after_apply(false, true, &status(true)),
            ClusterPhase::Ready
        );
        assert_eq!(
            ClusterPhase::after_apply(false, false, &status(true)),
            ClusterPhase::Provisioning
        );
        assert_eq!(
            ClusterPhase::after_apply(true, false, &status(true)),
            ClusterPhase::Deleting
        );
        assert_eq!(
            ClusterPhase::after_apply(true, true, &InfraStatus::default()),
            ClusterPhase::Deleted
        );
    }

    #[test]
    fn test_install_gate() {
        assert!(ClusterPhase::Ready.accepts_installs());
        assert!(!ClusterPhase::Deleting.accepts_installs());
        assert!(!ClusterPhase::Empty.accepts_installs());
    }
}
