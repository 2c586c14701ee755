//! Named identifier fields of `InfraStatus`
//!
//! Each create/delete action is gated on one of these fields: empty means the
//! resource does not exist yet, non-empty means it does.

use std::fmt;

use crate::types::InfraStatus;

/// A witness field in `InfraStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceName {
    ZoneId,
    NetworkId,
    SubnetId,
    SecurityGroupId,
    FloatingIpId,
    PendingDeletionIds,
}

impl ResourceName {
    /// Every witness field
    pub const ALL: [ResourceName; 6] = [
        ResourceName::ZoneId,
        ResourceName::NetworkId,
        ResourceName::SubnetId,
        ResourceName::SecurityGroupId,
        ResourceName::FloatingIpId,
        ResourceName::PendingDeletionIds,
    ];

    /// Stable name used in logs and errors
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceName::ZoneId => "zone_id",
            ResourceName::NetworkId => "network_id",
            ResourceName::SubnetId => "subnet_id",
            ResourceName::SecurityGroupId => "security_group_id",
            ResourceName::FloatingIpId => "floating_ip_id",
            ResourceName::PendingDeletionIds => "pending_deletion_ids",
        }
    }

    /// Current value of the field
    #[must_use]
    pub fn value(self, status: &InfraStatus) -> &str {
        let cluster = &status.cluster;
        match self {
            ResourceName::ZoneId => &cluster.zone_id,
            ResourceName::NetworkId => &cluster.network_id,
            ResourceName::SubnetId => &cluster.subnet_id,
            ResourceName::SecurityGroupId => &cluster.security_group_id,
            ResourceName::FloatingIpId => &cluster.floating_ip_id,
            ResourceName::PendingDeletionIds => &cluster.pending_deletion_ids,
        }
    }

    /// Whether the field holds an identifier
    #[must_use]
    pub fn is_set(self, status: &InfraStatus) -> bool {
        !self.value(status).is_empty()
    }

    /// Overwrite the field
    pub fn set(self, status: &mut InfraStatus, value: impl Into<String>) {
        *self.slot(status) = value.into();
    }

    /// Reset the field to "absent"
    pub fn clear(self, status: &mut InfraStatus) {
        self.slot(status).clear();
    }

    fn slot(self, status: &mut InfraStatus) -> &mut String {
        let cluster = &mut status.cluster;
        match self {
            ResourceName::ZoneId => &mut cluster.zone_id,
            ResourceName::NetworkId => &mut cluster.network_id,
            ResourceName::SubnetId => &mut cluster.subnet_id,
            ResourceName::SecurityGroupId => &mut cluster.security_group_id,
            ResourceName::FloatingIpId => &mut cluster.floating_ip_id,
            ResourceName::PendingDeletionIds => &mut cluster.pending_deletion_ids,
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_are_independent() {
        let mut status = InfraStatus::default();
        for (i, name) in ResourceName::ALL.iter().enumerate() {
            name.set(&mut status, format!("id-{i}"));
        }

        for (i, name) in ResourceName::ALL.iter().enumerate() {
            assert_eq!(name.value(&status), format!("id-{i}"));
        }

        ResourceName::SubnetId.clear(&mut status);
        assert!(!ResourceName::SubnetId.is_set(&status));
        assert!(ResourceName::NetworkId.is_set(&status));
    }
}
