//! Saga lifecycle events and the in-process event bus.
//!
//! Events are published after the corresponding state transition is
//! persisted, so observers always see read-your-writes state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{SagaId, StepId};
use domain::{Saga, StepType};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::metrics::MetricsSnapshot;

/// Events emitted by the engine and compensation driver.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga left CREATED and began executing.
    SagaStarted(SagaStartedData),

    /// Saga reached COMPLETED.
    SagaCompleted(SagaCompletedData),

    /// Saga reached FAILED.
    SagaFailed(SagaFailedData),

    /// Saga reached COMPENSATED.
    SagaCompensated(SagaCompensatedData),

    /// Saga exceeded its wall-clock budget.
    SagaTimedOut(SagaTimedOutData),

    /// A step attempt started.
    StepStarted(StepEventData),

    /// A step completed successfully.
    StepCompleted(StepEventData),

    /// A step failed terminally.
    StepFailed(StepEventData),

    /// A step failed and will be re-attempted.
    StepRetrying(StepEventData),

    /// Periodic metrics snapshot pushed by the scheduler.
    MetricsPublished(MetricsSnapshot),
}

impl SagaEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SAGA_STARTED",
            SagaEvent::SagaCompleted(_) => "SAGA_COMPLETED",
            SagaEvent::SagaFailed(_) => "SAGA_FAILED",
            SagaEvent::SagaCompensated(_) => "SAGA_COMPENSATED",
            SagaEvent::SagaTimedOut(_) => "SAGA_TIMEOUT",
            SagaEvent::StepStarted(_) => "STEP_STARTED",
            SagaEvent::StepCompleted(_) => "STEP_COMPLETED",
            SagaEvent::StepFailed(_) => "STEP_FAILED",
            SagaEvent::StepRetrying(_) => "STEP_RETRYING",
            SagaEvent::MetricsPublished(_) => "METRICS_PUBLISHED",
        }
    }

    /// Builds a SagaStarted event from the saga.
    pub fn saga_started(saga: &Saga) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_id: saga.saga_id,
            name: saga.name.clone(),
            correlation_id: saga.correlation_id.clone(),
            at: Utc::now(),
        })
    }

    /// Builds a SagaCompleted event.
    pub fn saga_completed(saga_id: SagaId, duration_ms: Option<i64>) -> Self {
        SagaEvent::SagaCompleted(SagaCompletedData {
            saga_id,
            duration_ms,
            at: Utc::now(),
        })
    }

    /// Builds a SagaFailed event.
    pub fn saga_failed(saga_id: SagaId, reason: impl Into<String>) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            saga_id,
            reason: reason.into(),
            at: Utc::now(),
        })
    }

    /// Builds a SagaCompensated event.
    pub fn saga_compensated(saga_id: SagaId) -> Self {
        SagaEvent::SagaCompensated(SagaCompensatedData {
            saga_id,
            at: Utc::now(),
        })
    }

    /// Builds a SagaTimedOut event.
    pub fn saga_timed_out(saga_id: SagaId) -> Self {
        SagaEvent::SagaTimedOut(SagaTimedOutData {
            saga_id,
            at: Utc::now(),
        })
    }

    /// Builds a StepStarted event.
    pub fn step_started(
        saga_id: SagaId,
        step_id: StepId,
        name: impl Into<String>,
        step_type: StepType,
    ) -> Self {
        SagaEvent::StepStarted(StepEventData {
            saga_id,
            step_id,
            name: name.into(),
            step_type,
            duration_ms: None,
            error: None,
            retry_count: 0,
            at: Utc::now(),
        })
    }

    /// Builds a StepCompleted event.
    pub fn step_completed(
        saga_id: SagaId,
        step_id: StepId,
        name: impl Into<String>,
        step_type: StepType,
        duration_ms: Option<i64>,
    ) -> Self {
        SagaEvent::StepCompleted(StepEventData {
            saga_id,
            step_id,
            name: name.into(),
            step_type,
            duration_ms: duration_ms.map(|d| d.max(0) as u64),
            error: None,
            retry_count: 0,
            at: Utc::now(),
        })
    }

    /// Builds a StepFailed event.
    pub fn step_failed(
        saga_id: SagaId,
        step_id: StepId,
        name: impl Into<String>,
        step_type: StepType,
        error: impl Into<String>,
        duration_ms: Option<i64>,
    ) -> Self {
        SagaEvent::StepFailed(StepEventData {
            saga_id,
            step_id,
            name: name.into(),
            step_type,
            duration_ms: duration_ms.map(|d| d.max(0) as u64),
            error: Some(error.into()),
            retry_count: 0,
            at: Utc::now(),
        })
    }

    /// Builds a StepRetrying event.
    pub fn step_retrying(
        saga_id: SagaId,
        step_id: StepId,
        name: impl Into<String>,
        step_type: StepType,
        retry_count: u32,
    ) -> Self {
        SagaEvent::StepRetrying(StepEventData {
            saga_id,
            step_id,
            name: name.into(),
            step_type,
            duration_ms: None,
            error: None,
            retry_count,
            at: Utc::now(),
        })
    }
}

/// Data for SagaStarted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_id: SagaId,
    pub name: String,
    pub correlation_id: Option<String>,
    pub at: DateTime<Utc>,
}

/// Data for SagaCompleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCompletedData {
    pub saga_id: SagaId,
    pub duration_ms: Option<i64>,
    pub at: DateTime<Utc>,
}

/// Data for SagaFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub saga_id: SagaId,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Data for SagaCompensated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCompensatedData {
    pub saga_id: SagaId,
    pub at: DateTime<Utc>,
}

/// Data for SagaTimedOut.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaTimedOutData {
    pub saga_id: SagaId,
    pub at: DateTime<Utc>,
}

/// Data shared by step-level events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEventData {
    pub saga_id: SagaId,
    pub step_id: StepId,
    pub name: String,
    pub step_type: StepType,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub at: DateTime<Utc>,
}

/// Observer of saga lifecycle events.
#[async_trait]
pub trait EventObserver: Send + Sync {
    /// Handles one event. Observers must not block for long; publication
    /// happens on the engine's task.
    async fn on_event(&self, event: &SagaEvent);
}

/// In-process fan-out of state transitions to registered observers.
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<std::sync::Arc<dyn EventObserver>>>,
}

impl EventBus {
    /// Creates a bus with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer.
    pub async fn register(&self, observer: std::sync::Arc<dyn EventObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Returns the number of registered observers.
    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// Delivers an event to every registered observer, in registration order.
    pub async fn publish(&self, event: SagaEvent) {
        tracing::debug!(event_type = event.event_type(), "publishing saga event");
        let observers = self.observers.read().await;
        for observer in observers.iter() {
            observer.on_event(&event).await;
        }
    }
}
