//! sealhost-infra: declarative cloud infrastructure for a cluster
//!
//! Converges an account towards an [`InfraSpec`] (network, subnet, security
//! group, host groups and a floating IP on the primary host) and tears it
//! all down again once a deletion timestamp is set. Progress is recorded in
//! an [`InfraStatus`] the caller persists between passes.

pub mod cloud;
pub mod defaults;
pub mod differ;
pub mod error;
pub mod instances;
pub mod memory;
pub mod reconciler;
pub mod resource;
pub mod types;

pub use cloud::{CloudApi, CloudConnector, FloatingIp, Instance};
pub use defaults::{default_infra, validate};
pub use differ::{HostGroupDiff, diff_host_groups};
pub use error::{InfraError, ReconcileError};
pub use memory::{MemoryCloud, MemorySnapshot, Operation};
pub use reconciler::{ActionName, Reconciler, primary_instance};
pub use resource::ResourceName;
pub use types::{
    ClusterSpec, ClusterStatus, Credential, HostGroupSpec, HostGroupStatus, IngressRule,
    InfraSpec, InfraStatus, NetworkSpec, roles_key,
};

use tracing::{info, instrument};

/// Validate, default, connect and run one reconciliation pass
///
/// # Errors
/// Returns validation and connection failures on their own, or every step
/// failure of the pass
#[instrument(skip_all, fields(cluster = %spec.name))]
pub async fn apply(
    connector: &dyn CloudConnector,
    spec: &InfraSpec,
    status: &mut InfraStatus,
) -> Result<(), ReconcileError> {
    if spec.is_deleting() {
        if status.cluster.region_id.is_empty() {
            info!("nothing was provisioned, skipping teardown");
            status.hosts.clear();
            return Ok(());
        }
    } else {
        validate(spec)?;
        default_infra(spec, status);
    }

    let api = connector
        .connect(&spec.credential, &status.cluster.region_id)
        .await?;

    Reconciler::new(api).reconcile(spec, status).await
}
