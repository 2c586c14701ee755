//! Cloud provider abstraction
//!
//! The reconciler only talks to the provider through these traits, so a real
//! SDK binding and the in-memory provider are interchangeable.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InfraError;
use crate::types::{Credential, IngressRule};

/// Spot pricing strategy requested from the provider
pub const SPOT_AS_PRICE_GO: &str = "SpotAsPriceGo";
/// On-demand pricing
pub const NO_SPOT: &str = "NoSpot";

/// Network (VPC) tagged with the cluster name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub cluster: String,
    pub cidr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRequest {
    pub cluster: String,
    pub network_id: String,
    pub zone_id: String,
    pub cidr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupRequest {
    pub cluster: String,
    pub network_id: String,
    pub ingress: Vec<IngressRule>,
}

/// Selects the instances of one host group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFilter {
    pub cluster: String,
    pub roles_key: String,
}

/// Launch `count` identical instances into a host group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRequest {
    pub cluster: String,
    pub roles_key: String,
    pub count: u32,
    pub instance_type: String,
    pub image_id: String,
    pub system_disk_gb: u32,
    pub data_disks_gb: Vec<u32>,
    pub zone_id: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub spot_strategy: String,
}

/// A running instance as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub private_ip: String,
}

/// An allocated public address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIp {
    pub id: String,
    pub address: String,
}

/// Provider operations scoped to one region
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Zone offering every requested instance type
    async fn available_zone(&self, instance_types: &[String]) -> Result<String, InfraError>;

    async fn create_network(&self, req: &NetworkRequest) -> Result<String, InfraError>;
    async fn delete_network(&self, network_id: &str) -> Result<(), InfraError>;

    async fn create_subnet(&self, req: &SubnetRequest) -> Result<String, InfraError>;
    async fn delete_subnet(&self, subnet_id: &str) -> Result<(), InfraError>;

    async fn create_security_group(
        &self,
        req: &SecurityGroupRequest,
    ) -> Result<String, InfraError>;
    async fn delete_security_group(&self, group_id: &str) -> Result<(), InfraError>;

    /// Instances of one host group, in any order
    ///
    /// Ids must sort in creation order; scale-downs remove the highest ones.
    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, InfraError>;
    async fn run_instances(&self, req: &InstanceRequest) -> Result<Vec<Instance>, InfraError>;
    /// Delete every instance in `ids` in a single call
    async fn delete_instances(&self, ids: &[String]) -> Result<(), InfraError>;

    async fn allocate_floating_ip(&self) -> Result<FloatingIp, InfraError>;
    async fn associate_floating_ip(
        &self,
        floating_ip_id: &str,
        instance_id: &str,
    ) -> Result<(), InfraError>;
    /// Release the address, detaching it first if needed
    async fn release_floating_ip(&self, floating_ip_id: &str) -> Result<(), InfraError>;
}

/// Builds a region-scoped `CloudApi` from a credential
#[async_trait]
pub trait CloudConnector: Send + Sync {
    async fn connect(
        &self,
        credential: &Credential,
        region: &str,
    ) -> Result<Arc<dyn CloudApi>, InfraError>;
}
