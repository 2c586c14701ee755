//! Core error types for sealhost-core

use thiserror::Error;

/// Errors that can occur in cluster actor operations
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Message addressed to a different cluster
    #[error("cluster mismatch: actor manages {expected}, got {got}")]
    ClusterMismatch {
        /// Cluster the actor owns
        expected: String,
        /// Cluster named in the message
        got: String,
    },

    /// Status could not be loaded or saved
    #[error("status store error: {0}")]
    Store(String),

    /// No ready host matches the install target
    #[error("no ready hosts in cluster {0}")]
    NoReadyHosts(String),

    /// Artifact distribution failed as a whole
    #[error("distribution failed: {0}")]
    Distribution(String),

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl CoreError {
    /// Whether resending the same message may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Store(_) | CoreError::Distribution(_) | CoreError::ActorError(_)
        )
    }
}

impl From<sealhost_dist::DistError> for CoreError {
    fn from(err: sealhost_dist::DistError) -> Self {
        CoreError::Distribution(err.to_string())
    }
}
