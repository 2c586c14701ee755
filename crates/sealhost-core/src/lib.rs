//! sealhost-core: cluster actor built on kameo
//!
//! A `ClusterActor` owns the persisted status of one cluster, runs apply
//! passes against the cloud and installs artifacts on the hosts it
//! provisioned.

pub mod actor;
pub mod error;
pub mod event;
pub mod message;
pub mod state;
pub mod store;

pub use actor::cluster::{ClusterActor, ClusterActorArgs};
pub use error::CoreError;
pub use event::ClusterEvent;
pub use message::{ApplyInfra, ApplyReport, GetInfraStatus, InstallArtifact, StatusSnapshot};
pub use state::ClusterPhase;
pub use store::{FileStatusStore, StatusStore};
