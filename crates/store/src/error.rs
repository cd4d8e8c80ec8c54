use common::{SagaId, Version};
use thiserror::Error;

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The save carried a stale version; the record changed underneath.
    #[error("version conflict for saga {saga_id}: expected {expected}, found {actual}")]
    Conflict {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// An update targeted a saga that does not exist.
    #[error("saga not found: {0}")]
    NotFound(SagaId),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for the optimistic-concurrency conflict case.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
