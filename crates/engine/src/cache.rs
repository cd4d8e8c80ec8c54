//! Bounded TTL cache for recently fetched sagas.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::SagaId;
use domain::Saga;
use tokio::sync::RwLock;

use crate::config::CacheConfig;

struct CacheEntry {
    saga: Saga,
    inserted_at: DateTime<Utc>,
}

/// Read-through cache in front of the store's `find`.
///
/// Every engine persist refreshes the entry, so cached reads never trail
/// the store by more than the TTL.
pub struct SagaCache {
    entries: RwLock<HashMap<SagaId, CacheEntry>>,
    max_size: usize,
    ttl: chrono::Duration,
}

impl SagaCache {
    /// Creates a cache with the configured bounds.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size: config.max_size.max(1),
            ttl: chrono::Duration::from_std(config.ttl).unwrap_or(chrono::Duration::seconds(60)),
        }
    }

    /// Creates a cache with explicit bounds (test helper).
    pub fn with_bounds(max_size: usize, ttl: Duration) -> Self {
        Self::new(&CacheConfig { max_size, ttl })
    }

    /// Returns the cached saga if present and fresh.
    pub async fn get(&self, saga_id: SagaId) -> Option<Saga> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.get(&saga_id) {
                Some(entry) if now - entry.inserted_at < self.ttl => {
                    return Some(entry.saga.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop the stale entry.
        self.entries.write().await.remove(&saga_id);
        None
    }

    /// Inserts or refreshes an entry, evicting the oldest when full.
    pub async fn put(&self, saga: Saga) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_size && !entries.contains_key(&saga.saga_id) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(id, _)| *id)
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            saga.saga_id,
            CacheEntry {
                saga,
                inserted_at: Utc::now(),
            },
        );
    }

    /// Drops one entry.
    pub async fn invalidate(&self, saga_id: SagaId) {
        self.entries.write().await.remove(&saga_id);
    }

    /// Drops everything.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of cached entries, fresh or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true when nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::SagaBuilder;

    fn make_saga() -> Saga {
        SagaBuilder::new("checkout").build().unwrap()
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let cache = SagaCache::with_bounds(10, Duration::from_secs(60));
        let saga = make_saga();
        let id = saga.saga_id;
        cache.put(saga).await;

        let cached = cache.get(id).await.unwrap();
        assert_eq!(cached.saga_id, id);
        assert!(cache.get(SagaId::new()).await.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = SagaCache::with_bounds(10, Duration::from_millis(30));
        let saga = make_saga();
        let id = saga.saga_id;
        cache.put(saga).await;
        assert!(cache.get(id).await.is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get(id).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn eviction_keeps_the_cache_bounded() {
        let cache = SagaCache::with_bounds(2, Duration::from_secs(60));
        let first = make_saga();
        let first_id = first.saga_id;
        cache.put(first).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.put(make_saga()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.put(make_saga()).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get(first_id).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = SagaCache::with_bounds(10, Duration::from_secs(60));
        let saga = make_saga();
        let id = saga.saga_id;
        cache.put(saga).await;
        cache.invalidate(id).await;
        assert!(cache.get(id).await.is_none());
    }
}
