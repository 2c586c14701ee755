//! Cluster events broadcast to subscribers

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClusterEvent {
    PhaseChanged {
        cluster: String,
        from: String,
        to: String,
    },
    ApplyFinished {
        cluster: String,
        errors: Vec<String>,
    },
    InstallFinished {
        cluster: String,
        hosts: usize,
        failed: Vec<String>,
    },
}
