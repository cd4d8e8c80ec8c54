//! The orchestrator facade: create, execute, retry, compensate, query.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::SagaId;
use domain::{Saga, SagaStatus};
use saga_store::{Page, PageRequest, SagaStore};
use serde::Serialize;

use crate::breaker::{BreakerStatus, CircuitBreakerRegistry};
use crate::cache::SagaCache;
use crate::config::{EngineConfig, ExecutionDefaults};
use crate::engine::ExecutionEngine;
use crate::events::{EventBus, SagaEvent};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::pool::WorkerPools;
use crate::ratelimit::{RateLimitStatus, RateLimiter};
use crate::registry::StepExecutorRegistry;
use crate::{EngineError, Result};

/// Options for [`Orchestrator::create`].
#[derive(Debug, Clone)]
pub struct CreateSagaOptions {
    /// Start executing in the background right after persisting.
    pub auto_start: bool,
}

impl Default for CreateSagaOptions {
    fn default() -> Self {
        Self { auto_start: true }
    }
}

/// Dashboard overview payload: metrics, per-status counts, breaker states.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardOverview {
    pub metrics: MetricsSnapshot,
    pub status_counts: HashMap<String, u64>,
    pub circuit_breakers: Vec<BreakerStatus>,
}

/// Bridges the store and the execution engine behind a small operation
/// surface. One instance per process, shared across API handlers and the
/// scheduler.
pub struct Orchestrator<S> {
    store: S,
    engine: Arc<ExecutionEngine<S>>,
    cache: Arc<SagaCache>,
    bus: Arc<EventBus>,
    metrics: Arc<MetricsRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    rate_limiter: Arc<RateLimiter>,
    pools: Arc<WorkerPools>,
    defaults: ExecutionDefaults,
}

impl<S: SagaStore + Clone + Send + Sync + 'static> Orchestrator<S> {
    /// Wires the facade over shared state built at startup.
    ///
    /// The metrics registry is subscribed to the event bus so counters
    /// track persisted transitions.
    pub async fn new(
        store: S,
        registry: StepExecutorRegistry,
        breakers: Arc<CircuitBreakerRegistry>,
        rate_limiter: Arc<RateLimiter>,
        metrics: Arc<MetricsRegistry>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let registry = Arc::new(registry);
        let bus = Arc::new(EventBus::new());
        bus.register(Arc::clone(&metrics) as Arc<dyn crate::EventObserver>)
            .await;
        let cache = Arc::new(SagaCache::new(&config.cache));
        let pools = Arc::new(WorkerPools::new(&config.pools));
        let engine = Arc::new(ExecutionEngine::new(
            store.clone(),
            registry,
            Arc::clone(&bus),
            Arc::clone(&pools),
            Arc::clone(&cache),
            config.execution.clone(),
        ));

        Arc::new(Self {
            store,
            engine,
            cache,
            bus,
            metrics,
            breakers,
            rate_limiter,
            pools,
            defaults: config.execution,
        })
    }

    /// The event bus, for registering additional observers.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Execution defaults applied to steps that do not override them.
    pub fn execution_defaults(&self) -> &ExecutionDefaults {
        &self.defaults
    }

    /// Validates and persists a new saga, optionally starting execution
    /// in the background.
    pub async fn create(&self, saga: Saga, options: CreateSagaOptions) -> Result<Saga> {
        if saga.status != SagaStatus::Created {
            return Err(EngineError::Validation(format!(
                "a new saga must be in CREATED, got {}",
                saga.status
            )));
        }
        if saga.version.as_i64() != 0 {
            return Err(EngineError::Validation(
                "a new saga must carry version 0".to_string(),
            ));
        }
        saga.validate().map_err(EngineError::Domain)?;

        let stored = self.store.save(saga).await?;
        self.cache.put(stored.clone()).await;
        tracing::info!(saga_id = %stored.saga_id, name = %stored.name, "saga created");

        if options.auto_start {
            self.execute_async(stored.saga_id).await;
        }
        Ok(stored)
    }

    /// Synchronously drives one saga until it parks or terminates.
    pub async fn execute(&self, saga_id: SagaId) -> Result<Saga> {
        self.engine.execute(saga_id).await
    }

    /// Enqueues a saga for background execution and returns immediately.
    pub async fn execute_async(&self, saga_id: SagaId) {
        let engine = Arc::clone(&self.engine);
        self.pools
            .saga_exec
            .submit(async move {
                if let Err(err) = engine.execute(saga_id).await {
                    tracing::error!(%saga_id, error = %err, "background execution failed");
                }
            })
            .await;
    }

    /// Administrative retry of a failed saga.
    ///
    /// Requires `FAILED` with retry budget remaining; resumes from the
    /// current step with retry counters reset and errors cleared.
    pub async fn retry(&self, saga_id: SagaId) -> Result<Saga> {
        let mut saga = self.load(saga_id).await?;
        if !saga.status.can_retry() {
            return Err(EngineError::InvalidState {
                expected: "FAILED".to_string(),
                actual: saga.status,
            });
        }
        if saga.retry_count >= saga.max_retries {
            return Err(EngineError::Validation(format!(
                "saga {saga_id} has exhausted its retry budget"
            )));
        }

        saga.reset_for_retry();
        let stored = self.store.save(saga).await?;
        self.cache.put(stored.clone()).await;
        tracing::info!(%saga_id, "administrative retry accepted");

        self.execute_async(saga_id).await;
        Ok(stored)
    }

    /// Administrative compensation of a failed or running saga.
    ///
    /// Transitions to `COMPENSATING` and drives the rollback to its
    /// terminal state before returning.
    pub async fn compensate(&self, saga_id: SagaId) -> Result<Saga> {
        let mut saga = self.load(saga_id).await?;
        if saga.status == SagaStatus::Compensated {
            // Idempotent no-op.
            return Ok(saga);
        }
        if !saga.status.can_compensate() {
            return Err(EngineError::InvalidState {
                expected: "FAILED or RUNNING".to_string(),
                actual: saga.status,
            });
        }

        saga.status = SagaStatus::Compensating;
        saga.completed_at = None;
        let stored = self.store.save(saga).await?;
        self.cache.put(stored.clone()).await;
        tracing::info!(%saga_id, "administrative compensation accepted");

        self.engine.compensate(stored).await
    }

    /// Fetches one saga, trying the cache first.
    pub async fn get(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        if let Some(saga) = self.cache.get(saga_id).await {
            return Ok(Some(saga));
        }
        let saga = self.store.find(saga_id).await?;
        if let Some(ref saga) = saga {
            self.cache.put(saga.clone()).await;
        }
        Ok(saga)
    }

    /// Lists sagas by status, newest first.
    pub async fn list_by_status(
        &self,
        status: SagaStatus,
        page: PageRequest,
    ) -> Result<Page<Saga>> {
        Ok(self.store.find_by_status(status, page).await?)
    }

    /// Lists sagas sharing a correlation id.
    pub async fn list_by_correlation(&self, correlation_id: &str) -> Result<Vec<Saga>> {
        Ok(self.store.find_by_correlation(correlation_id).await?)
    }

    /// Admits or rejects one API request for `client_id`.
    pub fn check_rate_limit(&self, client_id: &str) -> Result<()> {
        self.rate_limiter.check(client_id)
    }

    /// Rate-limit counters for one client.
    pub fn rate_limit_status(&self, client_id: &str) -> RateLimitStatus {
        self.rate_limiter.status(client_id)
    }

    /// Breaker status for one service.
    pub fn breaker_status(&self, service: &str) -> BreakerStatus {
        self.breakers.status(service)
    }

    /// Forces a breaker closed.
    pub fn reset_breaker(&self, service: &str) {
        self.breakers.reset(service);
    }

    /// Point-in-time metrics.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Aggregated dashboard payload.
    pub async fn dashboard_overview(&self) -> Result<DashboardOverview> {
        let mut status_counts = HashMap::new();
        for status in [
            SagaStatus::Created,
            SagaStatus::Running,
            SagaStatus::Retrying,
            SagaStatus::Compensating,
            SagaStatus::Completed,
            SagaStatus::Failed,
            SagaStatus::Compensated,
            SagaStatus::Timeout,
        ] {
            let count = self.store.count_by_status(status).await?;
            status_counts.insert(status.as_str().to_string(), count);
        }
        Ok(DashboardOverview {
            metrics: self.metrics.snapshot(),
            status_counts,
            circuit_breakers: self.breakers.all_statuses(),
        })
    }

    /// Sweeps active sagas past their wall-clock budget into `TIMEOUT`.
    /// Returns how many were transitioned.
    pub async fn sweep_timed_out(&self) -> Result<u64> {
        let expired = self.store.find_timed_out(Utc::now()).await?;
        let mut transitioned = 0;
        for saga in expired {
            let saga_id = saga.saga_id;
            match self.engine.mark_timed_out(saga).await {
                Ok(_) => transitioned += 1,
                Err(err) => {
                    tracing::warn!(%saga_id, error = %err, "timeout sweep failed for saga");
                }
            }
        }
        Ok(transitioned)
    }

    /// Re-enqueues failed sagas with retry budget left, highest priority
    /// first. Returns how many were enqueued.
    pub async fn sweep_retryable(&self) -> Result<u64> {
        let retryable = self.store.find_retryable().await?;
        let mut enqueued = 0;
        for saga in retryable {
            let saga_id = saga.saga_id;
            match self.retry(saga_id).await {
                Ok(_) => enqueued += 1,
                Err(err) => {
                    tracing::debug!(%saga_id, error = %err, "retry sweep skipped saga");
                }
            }
        }
        Ok(enqueued)
    }

    /// Deletes terminal sagas created before `cutoff`.
    pub async fn cleanup_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let deleted = self.store.bulk_delete_older_than(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, "purged old terminal sagas");
        }
        Ok(deleted)
    }

    /// Pushes a metrics snapshot onto the event bus for observers.
    pub async fn publish_metrics_snapshot(&self) {
        self.bus
            .publish(SagaEvent::MetricsPublished(self.metrics.snapshot()))
            .await;
    }

    async fn load(&self, saga_id: SagaId) -> Result<Saga> {
        self.store
            .find(saga_id)
            .await?
            .ok_or(EngineError::SagaNotFound(saga_id))
    }
}
