//! Spec validation and status defaulting

use std::collections::HashSet;

use rand::seq::SliceRandom;
use tracing::info;

use crate::cloud::{NO_SPOT, SPOT_AS_PRICE_GO};
use crate::error::InfraError;
use crate::types::{HostGroupStatus, InfraSpec, InfraStatus};

/// Reject specs the reconciler cannot act on
///
/// # Errors
/// Returns `InfraError::Validation` describing the first problem found
pub fn validate(spec: &InfraSpec) -> Result<(), InfraError> {
    if spec.name.trim().is_empty() {
        return Err(InfraError::Validation("cluster name is empty".into()));
    }
    if spec.cluster.region_ids.iter().all(|r| r.trim().is_empty()) {
        return Err(InfraError::Validation("no region ids given".into()));
    }
    if spec.cluster.network.cidr.is_empty() || spec.cluster.network.subnet_cidr.is_empty() {
        return Err(InfraError::Validation("network CIDRs must not be empty".into()));
    }
    if spec.hosts.is_empty() {
        return Err(InfraError::Validation("at least one host group is required".into()));
    }

    let mut seen = HashSet::new();
    for group in &spec.hosts {
        if group.roles.iter().all(|r| r.trim().is_empty()) {
            return Err(InfraError::Validation("host group without roles".into()));
        }
        let key = group.key();
        if !seen.insert(key.clone()) {
            return Err(InfraError::Validation(format!(
                "duplicate host group roles {key}"
            )));
        }
        if group.instance_type.is_empty() || group.image_id.is_empty() {
            return Err(InfraError::Validation(format!(
                "host group {key} needs an instance type and an image"
            )));
        }
    }

    Ok(())
}

/// Fill derived status fields before the first reconciliation
///
/// Picks the spot strategy, settles on one region the first time round and
/// seeds an empty status entry for every spec host group that lacks one.
pub fn default_infra(spec: &InfraSpec, status: &mut InfraStatus) {
    status.cluster.spot_strategy = if spec.cluster.is_seize {
        SPOT_AS_PRICE_GO.to_string()
    } else {
        NO_SPOT.to_string()
    };

    if status.cluster.region_id.is_empty() {
        let candidates: Vec<&String> = spec
            .cluster
            .region_ids
            .iter()
            .filter(|r| !r.trim().is_empty())
            .collect();
        if let Some(region) = candidates.choose(&mut rand::thread_rng()) {
            info!(region = %region, "using region");
            status.cluster.region_id = (*region).clone();
        }
    }

    for group in &spec.hosts {
        if status.find_group(&group.key()).is_none() {
            status.hosts.push(HostGroupStatus::new(group.roles.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClusterSpec, Credential, HostGroupSpec, NetworkSpec};

    fn group(roles: &[&str]) -> HostGroupSpec {
        HostGroupSpec {
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
            count: 1,
            instance_type: "ecs.c7.large".to_string(),
            image_id: "centos_7".to_string(),
            system_disk_gb: 100,
            data_disks_gb: vec![],
        }
    }

    fn spec() -> InfraSpec {
        InfraSpec {
            name: "demo".to_string(),
            deletion_timestamp: None,
            credential: Credential::default(),
            cluster: ClusterSpec {
                region_ids: vec!["cn-hangzhou".to_string(), "cn-shanghai".to_string()],
                network: NetworkSpec::default(),
                is_seize: true,
                ingress: vec![],
            },
            hosts: vec![group(&["master"]), group(&["node"])],
        }
    }

    #[test]
    fn test_validate_accepts_good_spec() {
        assert!(validate(&spec()).is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_roles() {
        let mut spec = spec();
        spec.hosts.push(group(&["node"]));
        assert!(matches!(validate(&spec), Err(InfraError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_missing_regions() {
        let mut spec = spec();
        spec.cluster.region_ids = vec![String::new()];
        assert!(validate(&spec).is_err());
    }

    #[test]
    fn test_default_picks_region_once() {
        let spec = spec();
        let mut status = InfraStatus::default();
        default_infra(&spec, &mut status);

        assert!(spec.cluster.region_ids.contains(&status.cluster.region_id));
        assert_eq!(status.cluster.spot_strategy, SPOT_AS_PRICE_GO);

        status.cluster.region_id = "cn-beijing".to_string();
        default_infra(&spec, &mut status);
        assert_eq!(status.cluster.region_id, "cn-beijing");
    }

    #[test]
    fn test_default_seeds_missing_entries() {
        let spec = spec();
        let mut status = InfraStatus::default();
        status.hosts.push(HostGroupStatus {
            ids: vec!["i-1".to_string()],
            ..HostGroupStatus::new(vec!["master".to_string()])
        });

        default_infra(&spec, &mut status);

        assert_eq!(status.hosts.len(), 2);
        assert_eq!(status.hosts[0].ids, vec!["i-1"]);
        assert_eq!(status.hosts[1].key(), "node");
    }
}
