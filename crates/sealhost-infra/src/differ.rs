//! Host-group matching between spec and status

use std::collections::BTreeSet;

use crate::types::{HostGroupSpec, HostGroupStatus};

/// Outcome of matching spec groups against status entries by role identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostGroupDiff {
    /// Identities to reconcile, in spec order
    pub to_reconcile: Vec<String>,
    /// Identities present in status but no longer in spec, sorted
    pub to_remove: Vec<String>,
}

/// Compute which groups to reconcile and which to remove
#[must_use]
pub fn diff_host_groups(spec: &[HostGroupSpec], status: &[HostGroupStatus]) -> HostGroupDiff {
    let mut to_reconcile = Vec::with_capacity(spec.len());
    let mut wanted = BTreeSet::new();
    for group in spec {
        let key = group.key();
        if wanted.insert(key.clone()) {
            to_reconcile.push(key);
        }
    }

    let to_remove: BTreeSet<String> = status
        .iter()
        .map(HostGroupStatus::key)
        .filter(|key| !wanted.contains(key))
        .collect();

    HostGroupDiff {
        to_reconcile,
        to_remove: to_remove.into_iter().collect(),
    }
}
