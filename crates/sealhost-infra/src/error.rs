//! Infrastructure reconciliation errors

use std::fmt;

use thiserror::Error;

use crate::reconciler::ActionName;
use crate::resource::ResourceName;

/// A single failure during reconciliation
#[derive(Debug, Clone, Error)]
pub enum InfraError {
    #[error("invalid infra spec: {0}")]
    Validation(String),

    #[error("failed to connect to region {region}: {message}")]
    Connect { region: String, message: String },

    #[error("cloud call {operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    #[error("{resource} is required before {action}")]
    MissingDependency {
        resource: ResourceName,
        action: ActionName,
    },

    #[error("infra status not found for host group {0}")]
    StatusEntryMissing(String),

    #[error("host group {roles}: {source}")]
    HostGroup {
        roles: String,
        #[source]
        source: Box<InfraError>,
    },

    #[error("{}", join_errors(.0))]
    Multiple(Vec<InfraError>),

    #[error("no instance available to bind the floating IP")]
    NoPrimaryHost,

    #[error("{action} failed: {source}")]
    Action {
        action: ActionName,
        #[source]
        source: Box<InfraError>,
    },
}

impl InfraError {
    /// Cloud API failure
    pub fn api(operation: &'static str, message: impl Into<String>) -> Self {
        InfraError::Api {
            operation,
            message: message.into(),
        }
    }

    /// Whether a later pass may succeed without changing the spec
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            InfraError::Validation(_) | InfraError::StatusEntryMissing(_) => false,
            InfraError::HostGroup { source, .. } | InfraError::Action { source, .. } => {
                source.is_retryable()
            }
            InfraError::Multiple(errors) => errors.iter().any(InfraError::is_retryable),
            _ => true,
        }
    }
}

fn join_errors(errors: &[InfraError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" && ")
}

/// Every error collected during one reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct ReconcileError {
    errors: Vec<InfraError>,
}

impl ReconcileError {
    pub(crate) fn push(&mut self, error: InfraError) {
        self.errors.push(error);
    }

    /// `Ok` when nothing failed
    pub(crate) fn into_result(self) -> Result<(), ReconcileError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Individual failures, in the order they happened
    #[must_use]
    pub fn errors(&self) -> &[InfraError] {
        &self.errors
    }

    /// Whether the pass failed at `action`
    #[must_use]
    pub fn failed_at(&self, action: ActionName) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, InfraError::Action { action: a, .. } if *a == action))
    }
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_errors(&self.errors))
    }
}

impl std::error::Error for ReconcileError {}

impl From<InfraError> for ReconcileError {
    fn from(error: InfraError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}
