use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;
use domain::{Saga, SagaStatus};
use tokio::sync::RwLock;

use crate::query::{Page, PageRequest};
use crate::store::SagaStore;
use crate::{Result, StoreError};

/// In-memory saga store for testing and single-process deployments.
///
/// Provides the same optimistic-concurrency contract as the PostgreSQL
/// implementation.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<SagaId, Saga>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of sagas stored.
    pub async fn len(&self) -> usize {
        self.sagas.read().await.len()
    }

    /// Returns true if the store holds no sagas.
    pub async fn is_empty(&self) -> bool {
        self.sagas.read().await.is_empty()
    }

    /// Clears all sagas.
    pub async fn clear(&self) {
        self.sagas.write().await.clear();
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn save(&self, mut saga: Saga) -> Result<Saga> {
        let mut sagas = self.sagas.write().await;

        match sagas.get(&saga.saga_id) {
            None => {
                if saga.version.as_i64() != 0 {
                    return Err(StoreError::NotFound(saga.saga_id));
                }
            }
            Some(existing) => {
                if existing.version != saga.version {
                    return Err(StoreError::Conflict {
                        saga_id: saga.saga_id,
                        expected: saga.version,
                        actual: existing.version,
                    });
                }
            }
        }

        saga.version = saga.version.next();
        saga.updated_at = Utc::now();
        sagas.insert(saga.saga_id, saga.clone());
        Ok(saga)
    }

    async fn find(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        Ok(self.sagas.read().await.get(&saga_id).cloned())
    }

    async fn find_by_status(&self, status: SagaStatus, page: PageRequest) -> Result<Page<Saga>> {
        let sagas = self.sagas.read().await;
        let mut matching: Vec<Saga> = sagas
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Page::from_sorted(matching, page))
    }

    async fn find_by_correlation(&self, correlation_id: &str) -> Result<Vec<Saga>> {
        let sagas = self.sagas.read().await;
        let mut matching: Vec<Saga> = sagas
            .values()
            .filter(|s| s.correlation_id.as_deref() == Some(correlation_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<Saga>> {
        let sagas = self.sagas.read().await;
        let mut matching: Vec<Saga> = sagas
            .values()
            .filter(|s| s.name == name)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn find_timed_out(&self, now: DateTime<Utc>) -> Result<Vec<Saga>> {
        let sagas = self.sagas.read().await;
        Ok(sagas
            .values()
            .filter(|s| {
                matches!(s.status, SagaStatus::Running | SagaStatus::Retrying)
                    && s.timed_out(now)
            })
            .cloned()
            .collect())
    }

    async fn find_retryable(&self) -> Result<Vec<Saga>> {
        let sagas = self.sagas.read().await;
        let mut matching: Vec<Saga> = sagas
            .values()
            .filter(|s| s.status == SagaStatus::Failed && s.retry_count < s.max_retries)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(matching)
    }

    async fn count_by_status(&self, status: SagaStatus) -> Result<u64> {
        let sagas = self.sagas.read().await;
        Ok(sagas.values().filter(|s| s.status == status).count() as u64)
    }

    async fn bulk_update_status(&self, ids: &[SagaId], status: SagaStatus) -> Result<u64> {
        let mut sagas = self.sagas.write().await;
        let mut touched = 0;
        for id in ids {
            if let Some(saga) = sagas.get_mut(id) {
                saga.status = status;
                saga.version = saga.version.next();
                saga.updated_at = Utc::now();
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn bulk_delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut sagas = self.sagas.write().await;
        let before = sagas.len();
        sagas.retain(|_, s| !(s.status.is_terminal() && s.created_at < cutoff));
        Ok((before - sagas.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::Version;
    use domain::{SagaBuilder, Step};

    fn make_saga(name: &str) -> Saga {
        SagaBuilder::new(name)
            .step(Step::wait("pause", 1))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn save_new_saga_bumps_version() {
        let store = InMemorySagaStore::new();
        let saga = make_saga("checkout");
        let id = saga.saga_id;

        let stored = store.save(saga).await.unwrap();
        assert_eq!(stored.version, Version::new(1));

        let found = store.find(id).await.unwrap().unwrap();
        assert_eq!(found.version, Version::new(1));
    }

    #[tokio::test]
    async fn save_with_stale_version_conflicts() {
        let store = InMemorySagaStore::new();
        let saga = make_saga("checkout");

        let stored = store.save(saga.clone()).await.unwrap();
        // Second writer still holds version 0.
        let result = store.save(saga).await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));

        // The first writer's copy can keep going.
        let result = store.save(stored).await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap().version, Version::new(2));
    }

    #[tokio::test]
    async fn update_of_missing_saga_is_not_found() {
        let store = InMemorySagaStore::new();
        let mut saga = make_saga("checkout");
        saga.version = Version::new(3);
        let result = store.save(saga).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn save_find_roundtrip_preserves_contents() {
        let store = InMemorySagaStore::new();
        let mut saga = make_saga("checkout");
        saga.input_data
            .insert("amount".into(), serde_json::json!(1299));

        let stored = store.save(saga).await.unwrap();
        let found = store.find(stored.saga_id).await.unwrap().unwrap();

        assert_eq!(found.name, stored.name);
        assert_eq!(found.input_data, stored.input_data);
        assert_eq!(found.steps.len(), 1);
        assert_eq!(found.version, stored.version);
    }

    #[tokio::test]
    async fn find_by_status_pages_newest_first() {
        let store = InMemorySagaStore::new();
        for i in 0..5 {
            let mut saga = make_saga("checkout");
            saga.created_at = Utc::now() + Duration::seconds(i);
            store.save(saga).await.unwrap();
        }

        let page = store
            .find_by_status(SagaStatus::Created, PageRequest::new(0, 3))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 3);
        assert!(page.items[0].created_at >= page.items[1].created_at);

        let page2 = store
            .find_by_status(SagaStatus::Created, PageRequest::new(1, 3))
            .await
            .unwrap();
        assert_eq!(page2.items.len(), 2);
    }

    #[tokio::test]
    async fn find_by_correlation() {
        let store = InMemorySagaStore::new();
        let mut saga = make_saga("checkout");
        saga.correlation_id = Some("order-42".into());
        store.save(saga).await.unwrap();
        store.save(make_saga("checkout")).await.unwrap();

        let found = store.find_by_correlation("order-42").await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(store.find_by_correlation("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_timed_out_checks_budget_and_status() {
        let store = InMemorySagaStore::new();
        let now = Utc::now();

        let mut expired = make_saga("checkout");
        expired.status = SagaStatus::Running;
        expired.timeout_ms = 1_000;
        expired.started_at = Some(now - Duration::seconds(5));
        let expired_id = expired.saga_id;
        store.save(expired).await.unwrap();

        let mut unbounded = make_saga("checkout");
        unbounded.status = SagaStatus::Running;
        unbounded.timeout_ms = 0;
        unbounded.started_at = Some(now - Duration::seconds(500));
        store.save(unbounded).await.unwrap();

        let mut fresh = make_saga("checkout");
        fresh.status = SagaStatus::Running;
        fresh.timeout_ms = 60_000;
        fresh.started_at = Some(now);
        store.save(fresh).await.unwrap();

        let timed_out = store.find_timed_out(now).await.unwrap();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].saga_id, expired_id);
    }

    #[tokio::test]
    async fn find_retryable_orders_by_priority() {
        let store = InMemorySagaStore::new();

        let mut low = make_saga("checkout");
        low.status = SagaStatus::Failed;
        low.completed_at = Some(Utc::now());
        low.priority = 1;
        store.save(low).await.unwrap();

        let mut high = make_saga("checkout");
        high.status = SagaStatus::Failed;
        high.completed_at = Some(Utc::now());
        high.priority = 9;
        let high_id = high.saga_id;
        store.save(high).await.unwrap();

        let mut exhausted = make_saga("checkout");
        exhausted.status = SagaStatus::Failed;
        exhausted.completed_at = Some(Utc::now());
        exhausted.retry_count = exhausted.max_retries;
        store.save(exhausted).await.unwrap();

        let retryable = store.find_retryable().await.unwrap();
        assert_eq!(retryable.len(), 2);
        assert_eq!(retryable[0].saga_id, high_id);
    }

    #[tokio::test]
    async fn bulk_delete_only_touches_old_terminal_sagas() {
        let store = InMemorySagaStore::new();
        let now = Utc::now();

        let mut old_done = make_saga("checkout");
        old_done.status = SagaStatus::Completed;
        old_done.completed_at = Some(now);
        old_done.created_at = now - Duration::hours(48);
        store.save(old_done).await.unwrap();

        let mut old_running = make_saga("checkout");
        old_running.status = SagaStatus::Running;
        old_running.started_at = Some(now);
        old_running.created_at = now - Duration::hours(48);
        store.save(old_running).await.unwrap();

        let deleted = store
            .bulk_delete_older_than(now - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn bulk_update_status() {
        let store = InMemorySagaStore::new();
        let a = store.save(make_saga("checkout")).await.unwrap();
        let b = store.save(make_saga("checkout")).await.unwrap();

        let touched = store
            .bulk_update_status(&[a.saga_id, b.saga_id, SagaId::new()], SagaStatus::Paused)
            .await
            .unwrap();
        assert_eq!(touched, 2);
        assert_eq!(
            store.count_by_status(SagaStatus::Paused).await.unwrap(),
            2
        );
    }
}
