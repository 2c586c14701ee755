//! Desired (`InfraSpec`) and observed (`InfraStatus`) infrastructure state

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Desired infrastructure for one cluster in one cloud account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraSpec {
    /// Cluster name, also the key its status is persisted under
    pub name: String,
    /// Set when the whole resource graph should be torn down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Account credential
    pub credential: Credential,
    /// Region, network and pricing settings
    pub cluster: ClusterSpec,
    /// Host groups to provision
    #[serde(default)]
    pub hosts: Vec<HostGroupSpec>,
}

impl InfraSpec {
    /// Whether teardown was requested
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Request teardown, keeping an existing timestamp
    pub fn mark_for_deletion(&mut self) {
        self.deletion_timestamp.get_or_insert_with(Utc::now);
    }

    /// Instance types of every host group, deduplicated in spec order
    #[must_use]
    pub fn instance_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for group in &self.hosts {
            if !types.contains(&group.instance_type) {
                types.push(group.instance_type.clone());
            }
        }
        types
    }
}

/// Cloud account access key pair
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credential {
    pub access_key: String,
    pub access_secret: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key", &self.access_key)
            .field("access_secret", &"***")
            .finish()
    }
}

/// Cluster-wide provisioning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Candidate regions; one is picked on first apply
    pub region_ids: Vec<String>,
    /// Network layout
    #[serde(default)]
    pub network: NetworkSpec,
    /// Bid for spot instances instead of on-demand ones
    #[serde(default)]
    pub is_seize: bool,
    /// Inbound rules for the cluster security group
    #[serde(default = "default_ingress")]
    pub ingress: Vec<IngressRule>,
}

/// CIDR choices for the cluster network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(default = "default_network_cidr")]
    pub cidr: String,
    #[serde(default = "default_subnet_cidr")]
    pub subnet_cidr: String,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            cidr: default_network_cidr(),
            subnet_cidr: default_subnet_cidr(),
        }
    }
}

fn default_network_cidr() -> String {
    "172.16.0.0/12".to_string()
}

fn default_subnet_cidr() -> String {
    "172.16.0.0/24".to_string()
}

/// One inbound security group rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub protocol: String,
    /// `from/to`, e.g. `22/22`
    pub port_range: String,
    #[serde(default = "default_source_cidr")]
    pub source_cidr: String,
}

impl IngressRule {
    /// TCP rule for a single port from anywhere
    #[must_use]
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: "tcp".to_string(),
            port_range: format!("{port}/{port}"),
            source_cidr: default_source_cidr(),
        }
    }
}

fn default_source_cidr() -> String {
    "0.0.0.0/0".to_string()
}

fn default_ingress() -> Vec<IngressRule> {
    vec![IngressRule::tcp(22), IngressRule::tcp(6443)]
}

/// Machines sharing one role set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroupSpec {
    /// Role set, e.g. `["master"]` or `["node"]`; order is irrelevant
    pub roles: Vec<String>,
    /// Desired number of instances
    pub count: u32,
    pub instance_type: String,
    pub image_id: String,
    #[serde(default = "default_system_disk")]
    pub system_disk_gb: u32,
    #[serde(default)]
    pub data_disks_gb: Vec<u32>,
}

fn default_system_disk() -> u32 {
    100
}

impl HostGroupSpec {
    /// Identity used to match this group against status
    #[must_use]
    pub fn key(&self) -> String {
        roles_key(&self.roles)
    }
}

/// Identity of a role set: sorted and comma-joined
#[must_use]
pub fn roles_key(roles: &[String]) -> String {
    let mut sorted: Vec<&str> = roles.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(",")
}

/// Observed infrastructure, persisted by the caller between passes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraStatus {
    #[serde(default)]
    pub cluster: ClusterStatus,
    #[serde(default)]
    pub hosts: Vec<HostGroupStatus>,
}

/// Identifiers of cluster-wide resources; empty means "not created"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(default)]
    pub region_id: String,
    #[serde(default)]
    pub zone_id: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub subnet_id: String,
    #[serde(default)]
    pub security_group_id: String,
    #[serde(default)]
    pub floating_ip_id: String,
    /// Public address behind `floating_ip_id`
    #[serde(default)]
    pub floating_ip: String,
    #[serde(default)]
    pub spot_strategy: String,
    /// Comma-joined instance ids awaiting deletion
    #[serde(default)]
    pub pending_deletion_ids: String,
}

/// Observed state of one host group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroupStatus {
    pub roles: Vec<String>,
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub ready: bool,
    /// Last reconciliation error for this group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostGroupStatus {
    /// Empty entry for a role set
    #[must_use]
    pub fn new(roles: Vec<String>) -> Self {
        Self {
            roles,
            ..Self::default()
        }
    }

    /// Identity used to match this entry against spec
    #[must_use]
    pub fn key(&self) -> String {
        roles_key(&self.roles)
    }

    /// Whether the group carries `role`
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl InfraStatus {
    /// Index of the entry whose identity is `key`
    #[must_use]
    pub fn find_group(&self, key: &str) -> Option<usize> {
        self.hosts.iter().position(|h| h.key() == key)
    }

    /// Addresses of ready groups, optionally restricted to groups carrying `role`
    #[must_use]
    pub fn ready_ips(&self, role: Option<&str>) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|h| h.ready)
            .filter(|h| role.is_none_or(|r| h.has_role(r)))
            .flat_map(|h| h.ips.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(list: &[&str]) -> Vec<String> {
        list.iter().map(|r| (*r).to_string()).collect()
    }

    #[test]
    fn test_roles_key_ignores_order() {
        assert_eq!(roles_key(&roles(&["node", "master"])), "master,node");
        assert_eq!(roles_key(&roles(&["master", "node"])), "master,node");
        assert_eq!(roles_key(&roles(&["node", "node"])), "node");
    }

    #[test]
    fn test_find_group_by_identity() {
        let status = InfraStatus {
            hosts: vec![
                HostGroupStatus::new(roles(&["node"])),
                HostGroupStatus::new(roles(&["etcd", "master"])),
            ],
            ..InfraStatus::default()
        };

        assert_eq!(status.find_group("etcd,master"), Some(1));
        assert_eq!(status.find_group("master"), None);
    }

    #[test]
    fn test_ready_ips_filters_by_role() {
        let mut master = HostGroupStatus::new(roles(&["master"]));
        master.ready = true;
        master.ips = vec!["172.16.0.2".to_string()];
        let mut node = HostGroupStatus::new(roles(&["node"]));
        node.ready = true;
        node.ips = vec!["172.16.0.3".to_string()];
        let mut broken = HostGroupStatus::new(roles(&["worker"]));
        broken.ips = vec!["172.16.0.9".to_string()];

        let status = InfraStatus {
            hosts: vec![master, node, broken],
            ..InfraStatus::default()
        };

        assert_eq!(status.ready_ips(None), vec!["172.16.0.2", "172.16.0.3"]);
        assert_eq!(status.ready_ips(Some("node")), vec!["172.16.0.3"]);
    }

    #[test]
    fn test_spec_from_toml_applies_defaults() {
        let spec: InfraSpec = toml::from_str(
            r#"
            name = "demo"

            [credential]
            access_key = "ak"
            access_secret = "sk"

            [cluster]
            region_ids = ["cn-hangzhou"]

            [[hosts]]
            roles = ["master"]
            count = 1
            instance_type = "ecs.c7.large"
            image_id = "centos_7"
            "#,
        )
        .unwrap();

        assert!(!spec.is_deleting());
        assert_eq!(spec.cluster.network.subnet_cidr, "172.16.0.0/24");
        assert_eq!(spec.cluster.ingress.len(), 2);
        assert_eq!(spec.hosts[0].system_disk_gb, 100);
        assert!(!format!("{:?}", spec.credential).contains("sk"));
    }

    #[test]
    fn test_status_roundtrips_through_json() {
        let mut status = InfraStatus::default();
        status.cluster.network_id = "vpc-1".to_string();
        status.hosts.push(HostGroupStatus::new(roles(&["master"])));

        let json = serde_json::to_string(&status).unwrap();
        let back: InfraStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
