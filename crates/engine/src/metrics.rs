//! Lock-free counters and averages for sagas, steps, breakers, and
//! rate-limit hits.
//!
//! The hot path is atomic increments; the per-step-type and per-service
//! maps take a write lock only on first touch. The registry doubles as an
//! event-bus observer so counters follow persisted transitions, and key
//! counts are mirrored to the `metrics` facade for Prometheus export.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use domain::StepType;
use serde::Serialize;

use crate::events::{EventObserver, SagaEvent};

#[derive(Default)]
struct StepTypeStats {
    executions: AtomicU64,
    failures: AtomicU64,
    /// EMA of execution time in milliseconds: `avg ← (avg + observed) / 2`.
    /// Lossy, acceptable for dashboards.
    avg_duration_ms: AtomicU64,
}

#[derive(Default)]
struct ServiceStats {
    breaker_trips: AtomicU64,
    breaker_resets: AtomicU64,
}

/// Process-wide metrics registry.
#[derive(Default)]
pub struct MetricsRegistry {
    total_sagas: AtomicU64,
    successful_sagas: AtomicU64,
    failed_sagas: AtomicU64,
    compensated_sagas: AtomicU64,
    timed_out_sagas: AtomicU64,

    total_steps: AtomicU64,
    successful_steps: AtomicU64,
    failed_steps: AtomicU64,
    retried_steps: AtomicU64,

    rate_limit_exceeded: AtomicU64,
    total_requests: AtomicU64,

    step_types: RwLock<HashMap<StepType, Arc<StepTypeStats>>>,
    services: RwLock<HashMap<String, Arc<ServiceStats>>>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn step_type_stats(&self, step_type: StepType) -> Arc<StepTypeStats> {
        if let Some(stats) = self.step_types.read().unwrap().get(&step_type) {
            return Arc::clone(stats);
        }
        let mut map = self.step_types.write().unwrap();
        Arc::clone(map.entry(step_type).or_default())
    }

    fn service_stats(&self, service: &str) -> Arc<ServiceStats> {
        if let Some(stats) = self.services.read().unwrap().get(service) {
            return Arc::clone(stats);
        }
        let mut map = self.services.write().unwrap();
        Arc::clone(map.entry(service.to_string()).or_default())
    }

    /// Records a terminal saga outcome.
    pub fn record_saga(&self, outcome: SagaOutcome) {
        self.total_sagas.fetch_add(1, Ordering::Relaxed);
        match outcome {
            SagaOutcome::Completed => {
                self.successful_sagas.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("saga_completed_total").increment(1);
            }
            SagaOutcome::Failed => {
                self.failed_sagas.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("saga_failed_total").increment(1);
            }
            SagaOutcome::Compensated => {
                self.compensated_sagas.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("saga_compensated_total").increment(1);
            }
            SagaOutcome::TimedOut => {
                self.timed_out_sagas.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("saga_timeout_total").increment(1);
            }
        }
    }

    /// Records one step execution with its outcome and duration.
    pub fn record_step(&self, step_type: StepType, success: bool, duration_ms: u64) {
        self.total_steps.fetch_add(1, Ordering::Relaxed);
        let stats = self.step_type_stats(step_type);
        stats.executions.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_steps.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_steps.fetch_add(1, Ordering::Relaxed);
            stats.failures.fetch_add(1, Ordering::Relaxed);
        }
        let prev = stats.avg_duration_ms.load(Ordering::Relaxed);
        stats
            .avg_duration_ms
            .store((prev + duration_ms) / 2, Ordering::Relaxed);
        metrics::histogram!("step_duration_ms", "step_type" => step_type.as_str())
            .record(duration_ms as f64);
    }

    /// Records a step retry.
    pub fn record_step_retry(&self, _step_type: StepType) {
        self.retried_steps.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("step_retries_total").increment(1);
    }

    /// Records a breaker trip for `service`.
    pub fn record_breaker_trip(&self, service: &str) {
        self.service_stats(service)
            .breaker_trips
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("circuit_breaker_trips_total").increment(1);
    }

    /// Records a breaker reset (manual or recovered) for `service`.
    pub fn record_breaker_reset(&self, service: &str) {
        self.service_stats(service)
            .breaker_resets
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("circuit_breaker_resets_total").increment(1);
    }

    /// Records a rejected request.
    pub fn record_rate_limit_exceeded(&self) {
        self.rate_limit_exceeded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rate_limit_exceeded_total").increment(1);
    }

    /// Records an accepted request.
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy with derived success rates.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_sagas = self.total_sagas.load(Ordering::Relaxed);
        let successful_sagas = self.successful_sagas.load(Ordering::Relaxed);
        let total_steps = self.total_steps.load(Ordering::Relaxed);
        let successful_steps = self.successful_steps.load(Ordering::Relaxed);

        let step_types = self
            .step_types
            .read()
            .unwrap()
            .iter()
            .map(|(step_type, stats)| {
                (
                    step_type.as_str().to_string(),
                    StepTypeSnapshot {
                        executions: stats.executions.load(Ordering::Relaxed),
                        failures: stats.failures.load(Ordering::Relaxed),
                        avg_duration_ms: stats.avg_duration_ms.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        let services = self
            .services
            .read()
            .unwrap()
            .iter()
            .map(|(service, stats)| {
                (
                    service.clone(),
                    ServiceSnapshot {
                        breaker_trips: stats.breaker_trips.load(Ordering::Relaxed),
                        breaker_resets: stats.breaker_resets.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            total_sagas,
            successful_sagas,
            failed_sagas: self.failed_sagas.load(Ordering::Relaxed),
            compensated_sagas: self.compensated_sagas.load(Ordering::Relaxed),
            timed_out_sagas: self.timed_out_sagas.load(Ordering::Relaxed),
            saga_success_rate: rate(successful_sagas, total_sagas),
            total_steps,
            successful_steps,
            failed_steps: self.failed_steps.load(Ordering::Relaxed),
            retried_steps: self.retried_steps.load(Ordering::Relaxed),
            step_success_rate: rate(successful_steps, total_steps),
            rate_limit_exceeded: self.rate_limit_exceeded.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            step_types,
            services,
        }
    }
}

fn rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64) * 100.0
}

/// Terminal saga outcomes tracked by the registry.
#[derive(Debug, Clone, Copy)]
pub enum SagaOutcome {
    Completed,
    Failed,
    Compensated,
    TimedOut,
}

/// Per-step-type metrics in a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StepTypeSnapshot {
    pub executions: u64,
    pub failures: u64,
    pub avg_duration_ms: u64,
}

/// Per-service breaker metrics in a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub breaker_trips: u64,
    pub breaker_resets: u64,
}

/// Point-in-time metrics copy with derived rates (%).
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_sagas: u64,
    pub successful_sagas: u64,
    pub failed_sagas: u64,
    pub compensated_sagas: u64,
    pub timed_out_sagas: u64,
    pub saga_success_rate: f64,

    pub total_steps: u64,
    pub successful_steps: u64,
    pub failed_steps: u64,
    pub retried_steps: u64,
    pub step_success_rate: f64,

    pub rate_limit_exceeded: u64,
    pub total_requests: u64,

    pub step_types: HashMap<String, StepTypeSnapshot>,
    pub services: HashMap<String, ServiceSnapshot>,
}

#[async_trait]
impl EventObserver for MetricsRegistry {
    async fn on_event(&self, event: &SagaEvent) {
        match event {
            SagaEvent::SagaCompleted(_) => self.record_saga(SagaOutcome::Completed),
            SagaEvent::SagaFailed(_) => self.record_saga(SagaOutcome::Failed),
            SagaEvent::SagaCompensated(_) => self.record_saga(SagaOutcome::Compensated),
            SagaEvent::SagaTimedOut(_) => self.record_saga(SagaOutcome::TimedOut),
            SagaEvent::StepCompleted(data) => {
                self.record_step(data.step_type, true, data.duration_ms.unwrap_or(0));
            }
            SagaEvent::StepFailed(data) => {
                self.record_step(data.step_type, false, data.duration_ms.unwrap_or(0));
            }
            SagaEvent::StepRetrying(data) => self.record_step_retry(data.step_type),
            SagaEvent::SagaStarted(_) | SagaEvent::StepStarted(_) | SagaEvent::MetricsPublished(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saga_counters_and_rate() {
        let registry = MetricsRegistry::new();
        registry.record_saga(SagaOutcome::Completed);
        registry.record_saga(SagaOutcome::Completed);
        registry.record_saga(SagaOutcome::Failed);
        registry.record_saga(SagaOutcome::Compensated);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.total_sagas, 4);
        assert_eq!(snapshot.successful_sagas, 2);
        assert_eq!(snapshot.failed_sagas, 1);
        assert_eq!(snapshot.compensated_sagas, 1);
        assert!((snapshot.saga_success_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_registry_has_zero_rates() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.saga_success_rate, 0.0);
        assert_eq!(snapshot.step_success_rate, 0.0);
    }

    #[test]
    fn step_ema_halves_toward_observation() {
        let registry = MetricsRegistry::new();
        registry.record_step(StepType::HttpCall, true, 100);
        registry.record_step(StepType::HttpCall, true, 200);

        let snapshot = registry.snapshot();
        let http = &snapshot.step_types["HTTP_CALL"];
        assert_eq!(http.executions, 2);
        assert_eq!(http.failures, 0);
        // (0 + 100) / 2 = 50, then (50 + 200) / 2 = 125
        assert_eq!(http.avg_duration_ms, 125);
    }

    #[test]
    fn step_failures_tracked_per_type() {
        let registry = MetricsRegistry::new();
        registry.record_step(StepType::Wait, false, 10);
        registry.record_step_retry(StepType::Wait);
        registry.record_step_retry(StepType::Wait);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.failed_steps, 1);
        assert_eq!(snapshot.retried_steps, 2);
        assert_eq!(snapshot.step_types["WAIT"].failures, 1);
    }

    #[test]
    fn breaker_and_rate_limit_counters() {
        let registry = MetricsRegistry::new();
        registry.record_breaker_trip("payments.svc");
        registry.record_breaker_trip("payments.svc");
        registry.record_breaker_reset("payments.svc");
        registry.record_rate_limit_exceeded();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.services["payments.svc"].breaker_trips, 2);
        assert_eq!(snapshot.services["payments.svc"].breaker_resets, 1);
        assert_eq!(snapshot.rate_limit_exceeded, 1);
    }

    #[tokio::test]
    async fn observer_maps_events_to_counters() {
        use crate::events::SagaEvent;
        use common::SagaId;

        let registry = MetricsRegistry::new();
        let saga_id = SagaId::new();
        registry
            .on_event(&SagaEvent::saga_completed(saga_id, Some(42)))
            .await;
        registry
            .on_event(&SagaEvent::step_retrying(
                saga_id,
                common::StepId::new(),
                "b",
                StepType::HttpCall,
                1,
            ))
            .await;

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.successful_sagas, 1);
        assert_eq!(snapshot.retried_steps, 1);
    }
}
