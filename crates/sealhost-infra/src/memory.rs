//! In-memory cloud provider
//!
//! Keeps the whole resource graph in process memory and enforces the same
//! dependency rules a real provider does (a network with subnets cannot be
//! deleted, an instance holding a floating IP cannot be deleted, ...). Every
//! call is recorded and any operation can be made to fail on demand.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::cloud::{
    CloudApi, CloudConnector, FloatingIp, Instance, InstanceFilter, InstanceRequest,
    NetworkRequest, SecurityGroupRequest, SubnetRequest,
};
use crate::error::InfraError;
use crate::types::Credential;

/// Provider operations, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    AvailableZone,
    CreateNetwork,
    DeleteNetwork,
    CreateSubnet,
    DeleteSubnet,
    CreateSecurityGroup,
    DeleteSecurityGroup,
    ListInstances,
    RunInstances,
    DeleteInstances,
    AllocateFloatingIp,
    AssociateFloatingIp,
    ReleaseFloatingIp,
}

impl Operation {
    /// Whether the operation creates a billable resource
    #[must_use]
    pub fn is_create(self) -> bool {
        matches!(
            self,
            Operation::CreateNetwork
                | Operation::CreateSubnet
                | Operation::CreateSecurityGroup
                | Operation::RunInstances
                | Operation::AllocateFloatingIp
        )
    }

    fn name(self) -> &'static str {
        match self {
            Operation::AvailableZone => "DescribeAvailableResource",
            Operation::CreateNetwork => "CreateVpc",
            Operation::DeleteNetwork => "DeleteVpc",
            Operation::CreateSubnet => "CreateVSwitch",
            Operation::DeleteSubnet => "DeleteVSwitch",
            Operation::CreateSecurityGroup => "CreateSecurityGroup",
            Operation::DeleteSecurityGroup => "DeleteSecurityGroup",
            Operation::ListInstances => "DescribeInstances",
            Operation::RunInstances => "RunInstances",
            Operation::DeleteInstances => "DeleteInstances",
            Operation::AllocateFloatingIp => "AllocateEipAddress",
            Operation::AssociateFloatingIp => "AssociateEipAddress",
            Operation::ReleaseFloatingIp => "ReleaseEipAddress",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredInstance {
    instance: Instance,
    cluster: String,
    roles_key: String,
    subnet_id: String,
    security_group_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct State {
    counter: u64,
    zone: String,
    networks: BTreeMap<String, String>,
    subnets: BTreeMap<String, String>,
    security_groups: BTreeMap<String, String>,
    instances: BTreeMap<String, StoredInstance>,
    floating_ips: BTreeMap<String, (String, Option<String>)>,
    #[serde(skip)]
    calls: Vec<Operation>,
    #[serde(skip)]
    failing: HashSet<Operation>,
}

/// Serializable copy of every resource a [`MemoryCloud`] holds
///
/// Recorded calls and injected failures are not part of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemorySnapshot(State);

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{prefix}-{:06}", self.counter)
    }

    fn record(&mut self, op: Operation) -> Result<(), InfraError> {
        self.calls.push(op);
        if self.failing.contains(&op) {
            return Err(InfraError::api(op.name(), "injected failure"));
        }
        Ok(())
    }
}

/// Shared in-memory provider; clones see the same state
#[derive(Debug, Clone)]
pub struct MemoryCloud {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCloud {
    #[must_use]
    pub fn new() -> Self {
        let state = State {
            zone: "zone-a".to_string(),
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Provider holding the resources of an earlier snapshot
    #[must_use]
    pub fn restore(snapshot: MemorySnapshot) -> Self {
        Self {
            state: Arc::new(Mutex::new(snapshot.0)),
        }
    }

    /// Copy of the current resources, for persisting between processes
    pub async fn snapshot(&self) -> MemorySnapshot {
        let mut state = self.state.lock().await.clone();
        state.calls.clear();
        state.failing.clear();
        MemorySnapshot(state)
    }

    /// Make every later call to `op` fail
    pub async fn fail_on(&self, op: Operation) {
        self.state.lock().await.failing.insert(op);
    }

    /// Stop injecting failures
    pub async fn clear_failures(&self) {
        self.state.lock().await.failing.clear();
    }

    /// Calls made so far, in order
    pub async fn calls(&self) -> Vec<Operation> {
        self.state.lock().await.calls.clone()
    }

    /// Forget the recorded calls
    pub async fn reset_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Number of recorded calls to `op`
    pub async fn call_count(&self, op: Operation) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| **c == op)
            .count()
    }

    /// Number of live instances
    pub async fn instance_count(&self) -> usize {
        self.state.lock().await.instances.len()
    }

    /// Whether any resource is still allocated
    pub async fn is_empty(&self) -> bool {
        let state = self.state.lock().await;
        state.networks.is_empty()
            && state.subnets.is_empty()
            && state.security_groups.is_empty()
            && state.instances.is_empty()
            && state.floating_ips.is_empty()
    }
}

#[async_trait]
impl CloudApi for MemoryCloud {
    async fn available_zone(&self, instance_types: &[String]) -> Result<String, InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::AvailableZone)?;
        debug!(types = ?instance_types, zone = %state.zone, "resolved zone");
        Ok(state.zone.clone())
    }

    async fn create_network(&self, req: &NetworkRequest) -> Result<String, InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::CreateNetwork)?;
        let id = state.next_id("vpc");
        state.networks.insert(id.clone(), req.cluster.clone());
        Ok(id)
    }

    async fn delete_network(&self, network_id: &str) -> Result<(), InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::DeleteNetwork)?;
        let in_use = state.subnets.values().any(|n| n == network_id)
            || state.security_groups.values().any(|n| n == network_id);
        if in_use {
            return Err(InfraError::api(
                Operation::DeleteNetwork.name(),
                format!("dependency violation: {network_id} still has members"),
            ));
        }
        state.networks.remove(network_id);
        Ok(())
    }

    async fn create_subnet(&self, req: &SubnetRequest) -> Result<String, InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::CreateSubnet)?;
        if !state.networks.contains_key(&req.network_id) {
            return Err(InfraError::api(
                Operation::CreateSubnet.name(),
                format!("network {} not found", req.network_id),
            ));
        }
        let id = state.next_id("vsw");
        state.subnets.insert(id.clone(), req.network_id.clone());
        Ok(id)
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<(), InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::DeleteSubnet)?;
        if state.instances.values().any(|i| i.subnet_id == subnet_id) {
            return Err(InfraError::api(
                Operation::DeleteSubnet.name(),
                format!("dependency violation: {subnet_id} has instances"),
            ));
        }
        state.subnets.remove(subnet_id);
        Ok(())
    }

    async fn create_security_group(
        &self,
        req: &SecurityGroupRequest,
    ) -> Result<String, InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::CreateSecurityGroup)?;
        let id = state.next_id("sg");
        state.security_groups.insert(id.clone(), req.network_id.clone());
        Ok(id)
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::DeleteSecurityGroup)?;
        if state
            .instances
            .values()
            .any(|i| i.security_group_id == group_id)
        {
            return Err(InfraError::api(
                Operation::DeleteSecurityGroup.name(),
                format!("dependency violation: {group_id} is in use"),
            ));
        }
        state.security_groups.remove(group_id);
        Ok(())
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::ListInstances)?;
        Ok(state
            .instances
            .values()
            .filter(|i| i.cluster == filter.cluster && i.roles_key == filter.roles_key)
            .map(|i| i.instance.clone())
            .collect())
    }

    async fn run_instances(&self, req: &InstanceRequest) -> Result<Vec<Instance>, InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::RunInstances)?;
        if !state.subnets.contains_key(&req.subnet_id) {
            return Err(InfraError::api(
                Operation::RunInstances.name(),
                format!("subnet {} not found", req.subnet_id),
            ));
        }

        let mut created = Vec::new();
        for _ in 0..req.count {
            let id = state.next_id("i");
            let octet = state.counter % 250 + 2;
            let instance = Instance {
                id: id.clone(),
                private_ip: format!("172.16.0.{octet}"),
            };
            state.instances.insert(
                id,
                StoredInstance {
                    instance: instance.clone(),
                    cluster: req.cluster.clone(),
                    roles_key: req.roles_key.clone(),
                    subnet_id: req.subnet_id.clone(),
                    security_group_id: req.security_group_id.clone(),
                },
            );
            created.push(instance);
        }
        Ok(created)
    }

    async fn delete_instances(&self, ids: &[String]) -> Result<(), InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::DeleteInstances)?;
        let bound = state
            .floating_ips
            .values()
            .filter_map(|(_, instance)| instance.as_ref())
            .find(|instance| ids.contains(*instance));
        if let Some(instance) = bound {
            return Err(InfraError::api(
                Operation::DeleteInstances.name(),
                format!("instance {instance} still holds a floating IP"),
            ));
        }
        for id in ids {
            state.instances.remove(id);
        }
        Ok(())
    }

    async fn allocate_floating_ip(&self) -> Result<FloatingIp, InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::AllocateFloatingIp)?;
        let id = state.next_id("eip");
        let address = format!("47.96.0.{}", state.counter % 250 + 2);
        state.floating_ips.insert(id.clone(), (address.clone(), None));
        Ok(FloatingIp { id, address })
    }

    async fn associate_floating_ip(
        &self,
        floating_ip_id: &str,
        instance_id: &str,
    ) -> Result<(), InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::AssociateFloatingIp)?;
        if !state.instances.contains_key(instance_id) {
            return Err(InfraError::api(
                Operation::AssociateFloatingIp.name(),
                format!("instance {instance_id} not found"),
            ));
        }
        match state.floating_ips.get_mut(floating_ip_id) {
            Some((_, bound)) => {
                *bound = Some(instance_id.to_string());
                Ok(())
            }
            None => Err(InfraError::api(
                Operation::AssociateFloatingIp.name(),
                format!("floating IP {floating_ip_id} not found"),
            )),
        }
    }

    async fn release_floating_ip(&self, floating_ip_id: &str) -> Result<(), InfraError> {
        let mut state = self.state.lock().await;
        state.record(Operation::ReleaseFloatingIp)?;
        state.floating_ips.remove(floating_ip_id);
        Ok(())
    }
}

#[async_trait]
impl CloudConnector for MemoryCloud {
    async fn connect(
        &self,
        credential: &Credential,
        region: &str,
    ) -> Result<Arc<dyn CloudApi>, InfraError> {
        if region.is_empty() {
            return Err(InfraError::Connect {
                region: region.to_string(),
                message: "region is empty".to_string(),
            });
        }
        debug!(region = %region, access_key = %credential.access_key, "connected to in-memory cloud");
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(cluster: &str) -> NetworkRequest {
        NetworkRequest {
            cluster: cluster.to_string(),
            cidr: "172.16.0.0/12".to_string(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_restores_resources_and_ids() {
        let cloud = MemoryCloud::new();
        let first = cloud.create_network(&network("demo")).await.unwrap();
        cloud.fail_on(Operation::DeleteNetwork).await;

        let json = serde_json::to_string(&cloud.snapshot().await).unwrap();
        let restored = MemoryCloud::restore(serde_json::from_str(&json).unwrap());

        assert!(!restored.is_empty().await);
        assert!(restored.calls().await.is_empty());

        // injected failures are not carried over
        restored.delete_network(&first).await.unwrap();
        assert!(restored.is_empty().await);

        // ids keep counting from where the snapshot left off
        let second = restored.create_network(&network("demo")).await.unwrap();
        assert_ne!(first, second);
    }
}
