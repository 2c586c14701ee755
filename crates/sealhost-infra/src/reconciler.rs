//! Idempotent create pipeline and ordered teardown
//!
//! Every step is gated on a witness field of `InfraStatus`: a create step only
//! runs when its witness is empty, a delete step only when it is set. A failed
//! step is logged and recorded, and the pipeline moves on to the next one.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::cloud::{CloudApi, InstanceFilter, NetworkRequest, SecurityGroupRequest, SubnetRequest};
use crate::differ::diff_host_groups;
use crate::error::{InfraError, ReconcileError};
use crate::instances::{check_dependencies, reconcile_group};
use crate::resource::ResourceName;
use crate::types::{HostGroupSpec, InfraSpec, InfraStatus};

/// Pipeline actions, in the vocabulary used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionName {
    GetZoneId,
    CreateNetwork,
    CreateSubnet,
    CreateSecurityGroup,
    ReconcileInstances,
    BindFloatingIp,
    ReleaseFloatingIp,
    ClearInstances,
    DeleteSubnet,
    DeleteSecurityGroup,
    DeleteNetwork,
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionName::GetZoneId => "GetZoneID",
            ActionName::CreateNetwork => "CreateNetwork",
            ActionName::CreateSubnet => "CreateSubnet",
            ActionName::CreateSecurityGroup => "CreateSecurityGroup",
            ActionName::ReconcileInstances => "ReconcileInstances",
            ActionName::BindFloatingIp => "BindFloatingIP",
            ActionName::ReleaseFloatingIp => "ReleaseFloatingIP",
            ActionName::ClearInstances => "ClearInstances",
            ActionName::DeleteSubnet => "DeleteSubnet",
            ActionName::DeleteSecurityGroup => "DeleteSecurityGroup",
            ActionName::DeleteNetwork => "DeleteNetwork",
        };
        f.write_str(name)
    }
}

/// One pipeline entry; `witness` is `None` for steps that always run
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub action: ActionName,
    pub witness: Option<ResourceName>,
}

/// Create order: each step depends only on witnesses set by earlier ones
pub const CREATE_PIPELINE: [Step; 6] = [
    Step {
        action: ActionName::GetZoneId,
        witness: Some(ResourceName::ZoneId),
    },
    Step {
        action: ActionName::CreateNetwork,
        witness: Some(ResourceName::NetworkId),
    },
    Step {
        action: ActionName::CreateSubnet,
        witness: Some(ResourceName::SubnetId),
    },
    Step {
        action: ActionName::CreateSecurityGroup,
        witness: Some(ResourceName::SecurityGroupId),
    },
    Step {
        action: ActionName::ReconcileInstances,
        witness: None,
    },
    Step {
        action: ActionName::BindFloatingIp,
        witness: Some(ResourceName::FloatingIpId),
    },
];

/// Teardown order: dependents before the things they depend on
pub const TEARDOWN_PIPELINE: [Step; 5] = [
    Step {
        action: ActionName::ReleaseFloatingIp,
        witness: Some(ResourceName::FloatingIpId),
    },
    Step {
        action: ActionName::ClearInstances,
        witness: Some(ResourceName::PendingDeletionIds),
    },
    Step {
        action: ActionName::DeleteSubnet,
        witness: Some(ResourceName::SubnetId),
    },
    Step {
        action: ActionName::DeleteSecurityGroup,
        witness: Some(ResourceName::SecurityGroupId),
    },
    Step {
        action: ActionName::DeleteNetwork,
        witness: Some(ResourceName::NetworkId),
    },
];

/// Drives one cluster's infrastructure towards its spec
#[derive(Clone)]
pub struct Reconciler {
    api: Arc<dyn CloudApi>,
}

impl Reconciler {
    #[must_use]
    pub fn new(api: Arc<dyn CloudApi>) -> Self {
        Self { api }
    }

    /// Run one pass: teardown when deletion is requested, create otherwise
    ///
    /// `status` is updated in place as resources come and go, including when
    /// some steps fail.
    ///
    /// # Errors
    /// Returns every step failure of the pass, joined
    #[instrument(skip_all, fields(cluster = %spec.name))]
    pub async fn reconcile(
        &self,
        spec: &InfraSpec,
        status: &mut InfraStatus,
    ) -> Result<(), ReconcileError> {
        if spec.is_deleting() {
            info!("deletion timestamp set, clearing infra");
            return self.teardown(spec, status).await;
        }

        let mut errors = ReconcileError::default();
        for step in CREATE_PIPELINE {
            if let Err(e) = self.run_gated(step, spec, status).await {
                warn!(action = %step.action, error = %e, "action failed, skip it");
                errors.push(InfraError::Action {
                    action: step.action,
                    source: Box::new(e),
                });
            }
        }
        errors.into_result()
    }

    /// Delete every cluster resource in dependency order
    ///
    /// # Errors
    /// Returns every delete failure; later steps are still attempted
    pub async fn teardown(
        &self,
        spec: &InfraSpec,
        status: &mut InfraStatus,
    ) -> Result<(), ReconcileError> {
        let mut errors = ReconcileError::default();
        for step in TEARDOWN_PIPELINE {
            let result = if step.action == ActionName::ClearInstances {
                self.clear_instances(spec, status).await
            } else {
                self.delete_gated(step, status).await
            };
            if let Err(e) = result {
                errors.push(InfraError::Action {
                    action: step.action,
                    source: Box::new(e),
                });
            }
        }
        errors.into_result()
    }

    async fn run_gated(
        &self,
        step: Step,
        spec: &InfraSpec,
        status: &mut InfraStatus,
    ) -> Result<(), InfraError> {
        let Some(witness) = step.witness else {
            return self.create(step.action, spec, status).await;
        };

        if witness.is_set(status) {
            debug!(resource = %witness, value = %witness.value(status), "using resource status value");
            return Ok(());
        }

        if let Err(e) = self.create(step.action, spec, status).await {
            error!(resource = %witness, error = %e, "reconcile resource failed");
            return Err(e);
        }

        if witness.is_set(status) {
            info!(resource = %witness, value = %witness.value(status), "create resource success");
        }
        Ok(())
    }

    async fn create(
        &self,
        action: ActionName,
        spec: &InfraSpec,
        status: &mut InfraStatus,
    ) -> Result<(), InfraError> {
        let api = self.api.as_ref();
        match action {
            ActionName::GetZoneId => {
                let zone = api.available_zone(&spec.instance_types()).await?;
                ResourceName::ZoneId.set(status, zone);
            }
            ActionName::CreateNetwork => {
                let id = api
                    .create_network(&NetworkRequest {
                        cluster: spec.name.clone(),
                        cidr: spec.cluster.network.cidr.clone(),
                    })
                    .await?;
                ResourceName::NetworkId.set(status, id);
            }
            ActionName::CreateSubnet => {
                require(status, ResourceName::NetworkId, action)?;
                require(status, ResourceName::ZoneId, action)?;
                let id = api
                    .create_subnet(&SubnetRequest {
                        cluster: spec.name.clone(),
                        network_id: status.cluster.network_id.clone(),
                        zone_id: status.cluster.zone_id.clone(),
                        cidr: spec.cluster.network.subnet_cidr.clone(),
                    })
                    .await?;
                ResourceName::SubnetId.set(status, id);
            }
            ActionName::CreateSecurityGroup => {
                require(status, ResourceName::NetworkId, action)?;
                let id = api
                    .create_security_group(&SecurityGroupRequest {
                        cluster: spec.name.clone(),
                        network_id: status.cluster.network_id.clone(),
                        ingress: spec.cluster.ingress.clone(),
                    })
                    .await?;
                ResourceName::SecurityGroupId.set(status, id);
            }
            ActionName::ReconcileInstances => self.reconcile_instances(spec, status).await?,
            ActionName::BindFloatingIp => self.bind_floating_ip(status).await?,
            other => {
                return Err(InfraError::Validation(format!(
                    "{other} is not a create action"
                )));
            }
        }
        Ok(())
    }

    async fn reconcile_instances(
        &self,
        spec: &InfraSpec,
        status: &mut InfraStatus,
    ) -> Result<(), InfraError> {
        let diff = diff_host_groups(&spec.hosts, &status.hosts);
        let dependencies = check_dependencies(status);
        let mut bound = bound_instance(status);
        let mut errors = Vec::new();

        for key in &diff.to_reconcile {
            let Some(group) = spec.hosts.iter().find(|g| &g.key() == key) else {
                continue;
            };
            let Some(index) = status.find_group(key) else {
                errors.push(InfraError::StatusEntryMissing(key.clone()));
                continue;
            };

            let result = match &dependencies {
                Ok(()) if group.count == 0 => {
                    let doomed = status.hosts[index].ids.clone();
                    match self.release_floating_ip_from(status, &mut bound, &doomed).await {
                        Ok(()) => self.scale_group(spec, group, index, status, None).await,
                        Err(e) => Err(e),
                    }
                }
                Ok(()) => {
                    self.scale_group(spec, group, index, status, bound.as_deref())
                        .await
                }
                Err(e) => Err(e.clone()),
            };

            let entry = &mut status.hosts[index];
            match result {
                Ok(()) => {
                    entry.ready = true;
                    entry.error = None;
                }
                Err(e) => {
                    entry.ready = false;
                    entry.error = Some(e.to_string());
                    errors.push(InfraError::HostGroup {
                        roles: key.clone(),
                        source: Box::new(e),
                    });
                }
            }
        }

        if !diff.to_remove.is_empty() {
            let ids: Vec<String> = status
                .hosts
                .iter()
                .filter(|h| diff.to_remove.contains(&h.key()))
                .flat_map(|h| h.ids.iter().cloned())
                .collect();

            let removed = if ids.is_empty() {
                Ok(())
            } else {
                match self.release_floating_ip_from(status, &mut bound, &ids).await {
                    Ok(()) => {
                        ResourceName::PendingDeletionIds.set(status, ids.join(","));
                        self.delete_pending_instances(status).await
                    }
                    Err(e) => Err(e),
                }
            };

            match removed {
                Ok(()) => {
                    info!(groups = ?diff.to_remove, "removed host groups");
                    status.hosts.retain(|h| !diff.to_remove.contains(&h.key()));
                }
                Err(e) => errors.push(e),
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(InfraError::Multiple(errors)),
        }
    }

    async fn scale_group(
        &self,
        spec: &InfraSpec,
        group: &HostGroupSpec,
        index: usize,
        status: &mut InfraStatus,
        keep: Option<&str>,
    ) -> Result<(), InfraError> {
        let cluster = status.cluster.clone();
        reconcile_group(
            self.api.as_ref(),
            &spec.name,
            group,
            &cluster,
            &mut status.hosts[index],
            keep,
        )
        .await
    }

    /// Release the floating IP if `bound` is one of `doomed`
    ///
    /// The next BindFloatingIP step then binds a fresh one to the new primary
    /// instance.
    async fn release_floating_ip_from(
        &self,
        status: &mut InfraStatus,
        bound: &mut Option<String>,
        doomed: &[String],
    ) -> Result<(), InfraError> {
        let Some(instance) = bound.as_ref().filter(|id| doomed.contains(*id)) else {
            return Ok(());
        };

        info!(instance = %instance, "instance holding the floating IP is going away");
        self.delete_gated(TEARDOWN_PIPELINE[0], status).await?;
        *bound = None;
        Ok(())
    }

    async fn bind_floating_ip(&self, status: &mut InfraStatus) -> Result<(), InfraError> {
        let instance_id = primary_instance(status).ok_or(InfraError::NoPrimaryHost)?;
        let ip = self.api.allocate_floating_ip().await?;

        if let Err(e) = self.api.associate_floating_ip(&ip.id, &instance_id).await {
            if let Err(release) = self.api.release_floating_ip(&ip.id).await {
                warn!(floating_ip = %ip.id, error = %release, "failed to release unbound floating IP");
            }
            return Err(e);
        }

        info!(floating_ip = %ip.address, instance = %instance_id, "bound floating IP");
        status.cluster.floating_ip = ip.address;
        ResourceName::FloatingIpId.set(status, ip.id);
        Ok(())
    }

    async fn clear_instances(
        &self,
        spec: &InfraSpec,
        status: &mut InfraStatus,
    ) -> Result<(), InfraError> {
        let mut ids = Vec::new();
        let mut list_errors = Vec::new();
        for host in &status.hosts {
            let filter = InstanceFilter {
                cluster: spec.name.clone(),
                roles_key: host.key(),
            };
            match self.api.list_instances(&filter).await {
                Ok(instances) => ids.extend(instances.into_iter().map(|i| i.id)),
                Err(e) => {
                    error!(roles = %host.key(), error = %e, "get instance info failed");
                    list_errors.push(e);
                }
            }
        }

        if !ids.is_empty() {
            ResourceName::PendingDeletionIds.set(status, ids.join(","));
        }

        if ResourceName::PendingDeletionIds.is_set(status) {
            self.delete_pending_instances(status).await?;
        } else {
            warn!(resource = %ResourceName::PendingDeletionIds, "delete resource not exists");
        }

        if !list_errors.is_empty() {
            return Err(if list_errors.len() == 1 {
                list_errors.remove(0)
            } else {
                InfraError::Multiple(list_errors)
            });
        }

        status.hosts.clear();
        Ok(())
    }

    async fn delete_pending_instances(&self, status: &mut InfraStatus) -> Result<(), InfraError> {
        let witness = ResourceName::PendingDeletionIds;
        let value = witness.value(status).to_string();
        let ids: Vec<String> = value
            .split(',')
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();

        if let Err(e) = self.api.delete_instances(&ids).await {
            error!(resource = %witness, error = %e, "delete resource failed");
            return Err(e);
        }
        info!(resource = %witness, value = %value, "delete resource success");
        witness.clear(status);
        Ok(())
    }

    async fn delete_gated(&self, step: Step, status: &mut InfraStatus) -> Result<(), InfraError> {
        let Some(witness) = step.witness else {
            return Ok(());
        };
        let value = witness.value(status).to_string();
        if value.is_empty() {
            warn!(resource = %witness, "delete resource not exists");
            return Ok(());
        }

        let result = match step.action {
            ActionName::ReleaseFloatingIp => self.api.release_floating_ip(&value).await,
            ActionName::DeleteSubnet => self.api.delete_subnet(&value).await,
            ActionName::DeleteSecurityGroup => self.api.delete_security_group(&value).await,
            ActionName::DeleteNetwork => self.api.delete_network(&value).await,
            other => Err(InfraError::Validation(format!(
                "{other} is not a delete action"
            ))),
        };

        match result {
            Ok(()) => {
                info!(resource = %witness, value = %value, "delete resource success");
                witness.clear(status);
                if step.action == ActionName::ReleaseFloatingIp {
                    status.cluster.floating_ip.clear();
                }
                Ok(())
            }
            Err(e) => {
                error!(resource = %witness, error = %e, "delete resource failed");
                Err(e)
            }
        }
    }
}

fn require(status: &InfraStatus, resource: ResourceName, action: ActionName) -> Result<(), InfraError> {
    if resource.is_set(status) {
        Ok(())
    } else {
        Err(InfraError::MissingDependency { resource, action })
    }
}

/// First instance of the first master group, else of the first populated group
#[must_use]
pub fn primary_instance(status: &InfraStatus) -> Option<String> {
    status
        .hosts
        .iter()
        .filter(|h| h.has_role("master"))
        .chain(status.hosts.iter())
        .find_map(|h| h.ids.first().cloned())
}

/// The instance the floating IP is bound to, if one is bound
///
/// Read before any group changes, while the primary is still the one bound.
fn bound_instance(status: &InfraStatus) -> Option<String> {
    if ResourceName::FloatingIpId.is_set(status) {
        primary_instance(status)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HostGroupStatus;

    fn group(roles: &[&str], ids: &[&str]) -> HostGroupStatus {
        HostGroupStatus {
            ids: ids.iter().map(|i| (*i).to_string()).collect(),
            ..HostGroupStatus::new(roles.iter().map(|r| (*r).to_string()).collect())
        }
    }

    #[test]
    fn test_primary_prefers_master() {
        let status = InfraStatus {
            hosts: vec![group(&["node"], &["i-9"]), group(&["master"], &["i-2", "i-3"])],
            ..InfraStatus::default()
        };
        assert_eq!(primary_instance(&status).as_deref(), Some("i-2"));
    }

    #[test]
    fn test_primary_falls_back_to_first_populated_group() {
        let status = InfraStatus {
            hosts: vec![group(&["master"], &[]), group(&["node"], &["i-5"])],
            ..InfraStatus::default()
        };
        assert_eq!(primary_instance(&status).as_deref(), Some("i-5"));
        assert_eq!(primary_instance(&InfraStatus::default()), None);
    }

    #[test]
    fn test_pipelines_are_ordered() {
        let create: Vec<_> = CREATE_PIPELINE.iter().map(|s| s.action).collect();
        assert_eq!(create.first(), Some(&ActionName::GetZoneId));
        assert_eq!(create.last(), Some(&ActionName::BindFloatingIp));

        let teardown: Vec<_> = TEARDOWN_PIPELINE.iter().map(|s| s.action).collect();
        assert_eq!(teardown.first(), Some(&ActionName::ReleaseFloatingIp));
        assert_eq!(teardown.last(), Some(&ActionName::DeleteNetwork));
    }
}
