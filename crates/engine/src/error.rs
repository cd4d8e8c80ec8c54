//! Engine error taxonomy.
//!
//! Recoverable kinds (transient step failures, store conflicts) never
//! escape the engine; they are absorbed into state transitions. Only
//! administrative and validation errors reach callers.

use common::SagaId;
use domain::{DomainError, SagaStatus, StepType};
use saga_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Severity attached to errors for dashboards and the API error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The saga does not exist.
    #[error("saga not found: {0}")]
    SagaNotFound(SagaId),

    /// The saga is in the wrong state for the requested operation.
    #[error("invalid saga state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: String,
        actual: SagaStatus,
    },

    /// Invalid input at the facade.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The caller exceeded its rate envelope.
    #[error("rate limit exceeded for client {0}")]
    RateLimited(String),

    /// The circuit breaker rejected a call to a failing service.
    #[error("circuit breaker is open for service: {0}")]
    CircuitOpen(String),

    /// No executor is registered for the step's type.
    #[error("unsupported step type: {0}")]
    UnsupportedStepType(StepType),

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Aggregate validation failure.
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Machine-readable code for the API error body.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SagaNotFound(_) => "NOT_FOUND",
            EngineError::InvalidState { .. } => "INVALID_STATE",
            EngineError::Validation(_) => "VALIDATION",
            EngineError::RateLimited(_) => "RATE_LIMITED",
            EngineError::CircuitOpen(_) => "CIRCUIT_OPEN",
            EngineError::UnsupportedStepType(_) => "UNSUPPORTED_STEP_TYPE",
            EngineError::Store(StoreError::Conflict { .. }) => "STALE_VERSION",
            EngineError::Store(StoreError::NotFound(_)) => "NOT_FOUND",
            EngineError::Store(_) => "STORE_ERROR",
            EngineError::Domain(_) => "VALIDATION",
            EngineError::Serialization(_) => "STORE_ERROR",
        }
    }

    /// Dashboard severity for this error kind.
    pub fn severity(&self) -> Severity {
        match self {
            EngineError::SagaNotFound(_) | EngineError::Validation(_) | EngineError::Domain(_) => {
                Severity::Low
            }
            EngineError::InvalidState { .. }
            | EngineError::RateLimited(_)
            | EngineError::CircuitOpen(_)
            | EngineError::UnsupportedStepType(_) => Severity::Medium,
            EngineError::Store(StoreError::Conflict { .. }) => Severity::Medium,
            EngineError::Store(_) | EngineError::Serialization(_) => Severity::Critical,
        }
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_version_code() {
        let err = EngineError::Store(StoreError::Conflict {
            saga_id: SagaId::new(),
            expected: common::Version::new(1),
            actual: common::Version::new(2),
        });
        assert_eq!(err.code(), "STALE_VERSION");
        assert_eq!(err.severity(), Severity::Medium);
    }

    #[test]
    fn store_error_is_critical() {
        let err = EngineError::Store(StoreError::NotFound(SagaId::new()));
        assert_eq!(err.code(), "NOT_FOUND");
        let err = EngineError::Serialization(serde_json::Error::io(std::io::Error::other("x")));
        assert_eq!(err.severity(), Severity::Critical);
    }

    #[test]
    fn severity_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&Severity::High).unwrap(),
            "\"HIGH\""
        );
    }
}
