use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;
use domain::{Saga, SagaStatus};

use crate::query::{Page, PageRequest};
use crate::Result;

/// Core trait for saga store implementations.
///
/// A single `save` is atomic; there is no cross-saga transaction. All
/// implementations must be thread-safe (`Send + Sync`). Callers never
/// observe a partially written saga.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts or updates a saga.
    ///
    /// An insert requires `version` 0; an update requires the stored
    /// version to match exactly. On success the returned record carries
    /// the incremented version. Fails with [`crate::StoreError::Conflict`]
    /// on a version mismatch and [`crate::StoreError::NotFound`] when
    /// updating a missing id.
    async fn save(&self, saga: Saga) -> Result<Saga>;

    /// Fetches a saga by id.
    async fn find(&self, saga_id: SagaId) -> Result<Option<Saga>>;

    /// Lists sagas in the given status, newest first, one page at a time.
    async fn find_by_status(&self, status: SagaStatus, page: PageRequest) -> Result<Page<Saga>>;

    /// Lists sagas sharing a correlation id.
    async fn find_by_correlation(&self, correlation_id: &str) -> Result<Vec<Saga>>;

    /// Lists sagas of a workflow type.
    async fn find_by_name(&self, name: &str) -> Result<Vec<Saga>>;

    /// Lists active sagas whose wall-clock budget expired before `now`.
    async fn find_timed_out(&self, now: DateTime<Utc>) -> Result<Vec<Saga>>;

    /// Lists failed sagas with retry budget remaining.
    async fn find_retryable(&self) -> Result<Vec<Saga>>;

    /// Counts sagas in the given status.
    async fn count_by_status(&self, status: SagaStatus) -> Result<u64>;

    /// Best-effort mass status update; returns the number touched.
    ///
    /// Not part of the transaction semantics: versions are bumped but no
    /// per-record CAS is performed.
    async fn bulk_update_status(&self, ids: &[SagaId], status: SagaStatus) -> Result<u64>;

    /// Best-effort deletion of terminal sagas created before `cutoff`;
    /// returns the number deleted.
    async fn bulk_delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
