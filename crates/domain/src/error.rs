//! Domain error types.

use thiserror::Error;

/// Errors raised by the saga aggregate and builder.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Invalid input when constructing or mutating a saga.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A structural invariant does not hold.
    #[error("invariant violated: {0}")]
    Invariant(String),
}
