// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! The flat error taxonomy exposed at the system boundary.

use thiserror::Error;

use cloudflow_domain::DomainError;
use cloudflow_providers::{ConfigError, ProviderError};
use cloudflow_state::StateStoreError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// The ten error kinds the engine surfaces at its public boundary.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Unknown provider type, duplicate name, missing required field.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Backend unreachable or unauthenticated; retryable by the caller.
    #[error("connection error: {0}")]
    Connection(String),

    /// Requested workflow/deployment/resource absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Blueprint or template failed a structural check.
    #[error("validation error: {0}")]
    Validation(String),

    /// Backend refused a create/update.
    #[error("deployment error: {0}")]
    Deployment(String),

    /// An operation name is unknown or failed to complete.
    #[error("operation error: {0}")]
    Operation(String),

    /// A step raised during `execute`.
    #[error("execution error in step '{step_id}': {message}")]
    Execution { step_id: String, message: String },

    /// Workflow exceeded `max_workflow_timeout`.
    #[error("workflow timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Workflow was explicitly cancelled.
    #[error("workflow was cancelled")]
    Cancelled,

    /// State-store I/O or invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Governs which errors the retry executor re-attempts: Connection,
    /// Operation, and Execution errors are transient and worth a retry;
    /// everything else requires caller or operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Operation(_) | Self::Execution { .. }
        )
    }
}

impl From<DomainError> for OrchestratorError {
    fn from(err: DomainError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Connection(msg) => Self::Connection(msg),
            ProviderError::NotFound(id) => Self::NotFound(id),
            ProviderError::Deployment(msg) => Self::Deployment(msg),
            ProviderError::Operation(msg) => Self::Operation(msg),
            ProviderError::Cloud(msg) => Self::Connection(msg),
        }
    }
}

impl From<ConfigError> for OrchestratorError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<StateStoreError> for OrchestratorError {
    fn from(err: StateStoreError) -> Self {
        match err {
            StateStoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_spec() {
        assert!(OrchestratorError::Connection("x".into()).is_retryable());
        assert!(OrchestratorError::Operation("x".into()).is_retryable());
        assert!(OrchestratorError::Execution {
            step_id: "s1".into(),
            message: "x".into()
        }
        .is_retryable());

        assert!(!OrchestratorError::Validation("x".into()).is_retryable());
        assert!(!OrchestratorError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
        assert!(!OrchestratorError::Cancelled.is_retryable());
    }

    #[test]
    fn not_found_propagates_through_state_store_conversion() {
        let err: OrchestratorError = StateStoreError::NotFound("wf-1".into()).into();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }
}
