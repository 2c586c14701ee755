//! sealhost-dist: integrity-verified artifact distribution
//!
//! Pushes a file, a directory tree or an in-memory buffer to many hosts at
//! once. A host whose copy already carries the right fingerprint receives
//! nothing; every transferred file is verified afterwards.

pub mod distributor;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod progress;
pub mod report;
pub mod source;

pub use distributor::{
    DEFAULT_CHUNK_SIZE, DistributeOptions, DistributionRequest, Distributor, MismatchPolicy,
};
pub use error::DistError;
pub use fingerprint::{bytes_fingerprint, local_fingerprint, remote_fingerprint};
pub use job::{PlanEntry, TransferJob, TransferPlan};
pub use progress::human_size;
pub use report::{DistributionReport, FileOutcome, FileReport, HostReport};
pub use source::{ArtifactResolver, HttpArtifactResolver, ResolvedArtifact, TransferSource};
