//! Instance scaling for a single host group

use tracing::{debug, info};

use crate::cloud::{CloudApi, Instance, InstanceFilter, InstanceRequest};
use crate::error::InfraError;
use crate::reconciler::ActionName;
use crate::resource::ResourceName;
use crate::types::{ClusterStatus, HostGroupSpec, HostGroupStatus, InfraStatus};

const REQUIRED: [ResourceName; 3] = [
    ResourceName::ZoneId,
    ResourceName::SubnetId,
    ResourceName::SecurityGroupId,
];

/// Bring the group's instance count to `group.count` and record ids and addresses
///
/// Surplus instances are the highest ids, which assumes the provider hands out
/// ids that sort in creation order (as `MemoryCloud` does). `keep` is never
/// part of the surplus unless the group scales to zero, so the instance
/// holding the floating IP stays first in the group.
pub(crate) async fn reconcile_group(
    api: &dyn CloudApi,
    cluster_name: &str,
    group: &HostGroupSpec,
    cluster: &ClusterStatus,
    entry: &mut HostGroupStatus,
    keep: Option<&str>,
) -> Result<(), InfraError> {
    let key = group.key();
    let filter = InstanceFilter {
        cluster: cluster_name.to_string(),
        roles_key: key.clone(),
    };

    let mut current = api.list_instances(&filter).await?;
    current.sort_by(|a, b| {
        let movable = |i: &Instance| Some(i.id.as_str()) != keep;
        movable(a).cmp(&movable(b)).then_with(|| a.id.cmp(&b.id))
    });
    let desired = group.count as usize;

    debug!(roles = %key, current = current.len(), desired, "reconciling host group");

    if current.len() < desired {
        let missing = desired - current.len();
        let req = InstanceRequest {
            cluster: cluster_name.to_string(),
            roles_key: key.clone(),
            count: u32::try_from(missing).unwrap_or(u32::MAX),
            instance_type: group.instance_type.clone(),
            image_id: group.image_id.clone(),
            system_disk_gb: group.system_disk_gb,
            data_disks_gb: group.data_disks_gb.clone(),
            zone_id: cluster.zone_id.clone(),
            subnet_id: cluster.subnet_id.clone(),
            security_group_id: cluster.security_group_id.clone(),
            spot_strategy: cluster.spot_strategy.clone(),
        };
        let created = api.run_instances(&req).await?;
        info!(roles = %key, created = created.len(), "created instances");
        current.extend(created);
    } else if current.len() > desired {
        let surplus: Vec<String> = current.split_off(desired).into_iter().map(|i| i.id).collect();
        api.delete_instances(&surplus).await?;
        info!(roles = %key, deleted = surplus.len(), "deleted surplus instances");
    }

    entry.ids = current.iter().map(|i| i.id.clone()).collect();
    entry.ips = current.into_iter().map(|i: Instance| i.private_ip).collect();
    Ok(())
}

/// Fail fast when the network resources an instance needs are missing
pub(crate) fn check_dependencies(status: &InfraStatus) -> Result<(), InfraError> {
    for resource in REQUIRED {
        if !resource.is_set(status) {
            return Err(InfraError::MissingDependency {
                resource,
                action: ActionName::ReconcileInstances,
            });
        }
    }
    Ok(())
}
