//! Per-service circuit breakers.
//!
//! One breaker per external service identity (URL host, database label, or
//! caller-supplied name). State transitions are compare-and-set on an
//! atomic state cell; counters are atomics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;

use crate::config::BreakerConfig;
use crate::metrics::MetricsRegistry;

/// Breaker state for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Failing; calls are rejected until the cooldown elapses.
    Open,
    /// Probing; limited confidence, successes close the breaker.
    HalfOpen,
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

impl CircuitState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            OPEN => CircuitState::Open,
            HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time breaker status for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
}

struct BreakerState {
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure_ms: AtomicI64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_ms: AtomicI64::new(0),
        }
    }
}

/// Registry of per-service circuit breakers.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<BreakerState>>>,
    config: BreakerConfig,
    metrics: Arc<MetricsRegistry>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry with the given thresholds.
    pub fn new(config: BreakerConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
            metrics,
        }
    }

    fn breaker(&self, service: &str) -> Arc<BreakerState> {
        if let Some(existing) = self.breakers.read().unwrap().get(service) {
            return Arc::clone(existing);
        }
        let mut breakers = self.breakers.write().unwrap();
        Arc::clone(
            breakers
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(BreakerState::new())),
        )
    }

    /// Checks whether a call to `service` is currently allowed.
    ///
    /// An open breaker past its cooldown atomically transitions to
    /// HALF_OPEN and lets the probing call through.
    pub fn check(&self, service: &str) -> Result<(), crate::EngineError> {
        let breaker = self.breaker(service);

        if breaker.state.load(Ordering::Acquire) == OPEN {
            let last_failure = breaker.last_failure_ms.load(Ordering::Acquire);
            let now = Utc::now().timestamp_millis();
            if now - last_failure >= self.config.cooldown.as_millis() as i64 {
                if breaker
                    .state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::info!(service, "circuit breaker transitioning from OPEN to HALF_OPEN");
                    breaker.success_count.store(0, Ordering::Release);
                }
            }
        }

        if breaker.state.load(Ordering::Acquire) == OPEN {
            tracing::warn!(service, "circuit breaker is OPEN, rejecting call");
            return Err(crate::EngineError::CircuitOpen(service.to_string()));
        }
        Ok(())
    }

    /// Records a successful call to `service`.
    pub fn record_success(&self, service: &str) {
        let breaker = self.breaker(service);
        match breaker.state.load(Ordering::Acquire) {
            HALF_OPEN => {
                let successes = breaker.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold
                    && breaker
                        .state
                        .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    tracing::info!(service, "circuit breaker transitioning from HALF_OPEN to CLOSED");
                    breaker.failure_count.store(0, Ordering::Release);
                    breaker.success_count.store(0, Ordering::Release);
                    self.metrics.record_breaker_reset(service);
                }
            }
            CLOSED => {
                breaker.failure_count.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    /// Records a failed call to `service`.
    pub fn record_failure(&self, service: &str) {
        let breaker = self.breaker(service);
        let now = Utc::now().timestamp_millis();
        match breaker.state.load(Ordering::Acquire) {
            CLOSED => {
                let failures = breaker.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                breaker.last_failure_ms.store(now, Ordering::Release);
                if failures >= self.config.failure_threshold
                    && breaker
                        .state
                        .compare_exchange(CLOSED, OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    tracing::warn!(
                        service,
                        failures,
                        "circuit breaker transitioning from CLOSED to OPEN"
                    );
                    self.metrics.record_breaker_trip(service);
                }
            }
            HALF_OPEN => {
                if breaker
                    .state
                    .compare_exchange(HALF_OPEN, OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    tracing::warn!(service, "circuit breaker transitioning from HALF_OPEN to OPEN");
                    breaker.last_failure_ms.store(now, Ordering::Release);
                    self.metrics.record_breaker_trip(service);
                }
            }
            _ => {}
        }
    }

    /// Forces the breaker for `service` to CLOSED and zeroes counters.
    pub fn reset(&self, service: &str) {
        if let Some(breaker) = self.breakers.read().unwrap().get(service) {
            breaker.state.store(CLOSED, Ordering::Release);
            breaker.failure_count.store(0, Ordering::Release);
            breaker.success_count.store(0, Ordering::Release);
            breaker.last_failure_ms.store(0, Ordering::Release);
            tracing::info!(service, "circuit breaker manually reset");
            self.metrics.record_breaker_reset(service);
        }
    }

    /// Returns the status for one service (CLOSED if never used).
    pub fn status(&self, service: &str) -> BreakerStatus {
        let breakers = self.breakers.read().unwrap();
        match breakers.get(service) {
            Some(breaker) => BreakerStatus {
                service: service.to_string(),
                state: CircuitState::from_raw(breaker.state.load(Ordering::Acquire)),
                failure_count: breaker.failure_count.load(Ordering::Acquire),
                success_count: breaker.success_count.load(Ordering::Acquire),
                failure_threshold: self.config.failure_threshold,
                success_threshold: self.config.success_threshold,
            },
            None => BreakerStatus {
                service: service.to_string(),
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                failure_threshold: self.config.failure_threshold,
                success_threshold: self.config.success_threshold,
            },
        }
    }

    /// Returns the status of every breaker touched so far.
    pub fn all_statuses(&self) -> Vec<BreakerStatus> {
        let breakers = self.breakers.read().unwrap();
        let mut statuses: Vec<BreakerStatus> = breakers
            .iter()
            .map(|(service, breaker)| BreakerStatus {
                service: service.clone(),
                state: CircuitState::from_raw(breaker.state.load(Ordering::Acquire)),
                failure_count: breaker.failure_count.load(Ordering::Acquire),
                success_count: breaker.success_count.load(Ordering::Acquire),
                failure_threshold: self.config.failure_threshold,
                success_threshold: self.config.success_threshold,
            })
            .collect();
        statuses.sort_by(|a, b| a.service.cmp(&b.service));
        statuses
    }
}
