//! The compensation driver: walks completed steps in reverse execution
//! order and dispatches their compensating actions.
//!
//! Compensation is explicitly non-transactional across steps: every
//! settlement is its own persisted transition, so a crash mid-rollback
//! resumes from the last compensated step.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domain::{CompensationConfig, DataMap, Saga, SagaStatus, Step, StepStatus};
use saga_store::SagaStore;

use crate::cache::SagaCache;
use crate::config::ExecutionDefaults;
use crate::engine::{persist_saga, PersistOutcome};
use crate::events::{EventBus, SagaEvent};
use crate::executor::StepOutcome;
use crate::registry::StepExecutorRegistry;
use crate::Result;

enum RollbackOutcome {
    /// Every candidate step settled; none of the required ones failed.
    Complete,
    /// A required compensation exhausted its retries; carries the step name.
    RequiredFailed(String),
    /// Another writer changed the saga's status mid-rollback.
    Superseded,
}

/// Drives rollback for a saga whose forward execution stopped.
pub struct CompensationDriver<S> {
    store: S,
    registry: Arc<StepExecutorRegistry>,
    bus: Arc<EventBus>,
    cache: Arc<SagaCache>,
    defaults: ExecutionDefaults,
}

impl<S: SagaStore + Clone + Send + Sync> CompensationDriver<S> {
    /// Creates a driver over the shared state.
    pub fn new(
        store: S,
        registry: Arc<StepExecutorRegistry>,
        bus: Arc<EventBus>,
        cache: Arc<SagaCache>,
        defaults: ExecutionDefaults,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            cache,
            defaults,
        }
    }

    async fn persist(&self, saga: &mut Saga) -> Result<bool> {
        let outcome = persist_saga(&self.store, &self.cache, saga, &self.defaults).await?;
        Ok(matches!(outcome, PersistOutcome::Saved))
    }

    /// Rolls back a saga in `COMPENSATING` to `COMPENSATED`, or to
    /// `FAILED` when a required compensation cannot be completed.
    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.saga_id))]
    pub async fn run(&self, mut saga: Saga) -> Result<Saga> {
        tracing::info!("starting compensation");
        match self
            .compensate_completed(&mut saga, SagaStatus::Compensating)
            .await?
        {
            RollbackOutcome::Complete => {
                saga.status = SagaStatus::Compensated;
                saga.completed_at = Some(Utc::now());
                if self.persist(&mut saga).await? {
                    tracing::info!("compensation finished");
                    self.bus
                        .publish(SagaEvent::saga_compensated(saga.saga_id))
                        .await;
                }
                Ok(saga)
            }
            RollbackOutcome::RequiredFailed(step_name) => {
                saga.status = SagaStatus::Failed;
                saga.error_message = Some(format!("compensation failed: {step_name}"));
                saga.completed_at = Some(Utc::now());
                if self.persist(&mut saga).await? {
                    tracing::error!(step = %step_name, "required compensation failed");
                    self.bus
                        .publish(SagaEvent::saga_failed(
                            saga.saga_id,
                            format!("compensation failed: {step_name}"),
                        ))
                        .await;
                }
                Ok(saga)
            }
            RollbackOutcome::Superseded => Ok(saga),
        }
    }

    /// Rolls back the completed prefix of a saga that already settled in
    /// `TIMEOUT`. Step statuses update; the saga status does not change.
    /// A required compensation failure is appended to the error message.
    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.saga_id))]
    pub async fn rollback_completed_steps(&self, mut saga: Saga) -> Result<Saga> {
        let expected = saga.status;
        match self.compensate_completed(&mut saga, expected).await? {
            RollbackOutcome::Complete | RollbackOutcome::Superseded => Ok(saga),
            RollbackOutcome::RequiredFailed(step_name) => {
                let note = format!("compensation failed: {step_name}");
                saga.error_message = Some(match saga.error_message.take() {
                    Some(existing) => format!("{existing}; {note}"),
                    None => note,
                });
                let _ = self.persist(&mut saga).await?;
                Ok(saga)
            }
        }
    }

    /// Compensates completed compensatable steps in strictly descending
    /// order, persisting each settlement.
    async fn compensate_completed(
        &self,
        saga: &mut Saga,
        expected_status: SagaStatus,
    ) -> Result<RollbackOutcome> {
        loop {
            if saga.status != expected_status {
                tracing::warn!(
                    status = %saga.status,
                    "saga changed status mid-rollback, yielding"
                );
                return Ok(RollbackOutcome::Superseded);
            }

            let candidate = saga
                .steps
                .iter()
                .enumerate()
                .filter(|(_, step)| {
                    // COMPENSATING steps are picked back up so an
                    // interrupted rollback resumes where it stopped.
                    matches!(
                        step.status,
                        StepStatus::Completed | StepStatus::Compensating
                    ) && step.compensatable
                })
                .filter_map(|(idx, step)| {
                    step.compensation_config.clone().map(|config| (idx, config))
                })
                .max_by_key(|(idx, _)| *idx);
            let Some((idx, compensation)) = candidate else {
                return Ok(RollbackOutcome::Complete);
            };

            if compensation.compensation_type.as_step_type().is_none() {
                // Nothing to undo; settle the step directly.
                saga.steps[idx].status = StepStatus::Compensated;
                let _ = self.persist(saga).await?;
                continue;
            }

            saga.steps[idx].status = StepStatus::Compensating;
            if !self.persist(saga).await? {
                continue;
            }

            let outcome = self.attempt_with_retries(saga, idx, &compensation).await;

            if outcome.success {
                saga.steps[idx].status = StepStatus::Compensated;
                tracing::info!(step = %saga.steps[idx].name, "step compensated");
                let _ = self.persist(saga).await?;
                continue;
            }

            let message = outcome
                .error_message
                .unwrap_or_else(|| "compensation failed".to_string());
            {
                let step = &mut saga.steps[idx];
                step.status = StepStatus::Failed;
                step.error_message = Some(format!("compensation failed: {message}"));
                step.error_trace = outcome.error_trace;
            }

            if compensation.required {
                // Persisted by the caller together with the saga-level
                // failure state.
                return Ok(RollbackOutcome::RequiredFailed(
                    saga.steps[idx].name.clone(),
                ));
            }

            tracing::warn!(
                step = %saga.steps[idx].name,
                error = %message,
                "optional compensation failed, continuing rollback"
            );
            let _ = self.persist(saga).await?;
        }
    }

    /// Attempts one compensation up to `max_retries + 1` times.
    async fn attempt_with_retries(
        &self,
        saga: &Saga,
        idx: usize,
        compensation: &CompensationConfig,
    ) -> StepOutcome {
        let mut outcome = StepOutcome::failure("compensation not attempted");
        for attempt in 0..=compensation.max_retries {
            outcome = self.dispatch(saga, idx, compensation).await;
            if outcome.success {
                break;
            }
            if attempt < compensation.max_retries {
                tracing::debug!(
                    step = %saga.steps[idx].name,
                    attempt = attempt + 1,
                    "compensation attempt failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(compensation.retry_delay_ms)).await;
            }
        }
        outcome
    }

    /// Dispatches one compensation attempt through the executor registry.
    ///
    /// The substitution context is the saga input overlaid with the step's
    /// own output (the output wins on collision).
    async fn dispatch(
        &self,
        saga: &Saga,
        idx: usize,
        compensation: &CompensationConfig,
    ) -> StepOutcome {
        let step = &saga.steps[idx];
        let Some(step_type) = compensation.compensation_type.as_step_type() else {
            return StepOutcome::ok(DataMap::new());
        };
        let executor = match self.registry.get(step_type) {
            Ok(executor) => executor,
            Err(err) => return StepOutcome::failure(err.to_string()),
        };

        let mut comp_step = Step::new(
            format!("{}:compensation", step.name),
            step_type,
            compensation.config.clone(),
        );
        comp_step.input_data = step.output_data.clone();
        comp_step.timeout_ms = compensation.timeout_ms;

        let attempt = executor.execute(&comp_step, &saga.input_data);
        if compensation.timeout_ms > 0 {
            match tokio::time::timeout(Duration::from_millis(compensation.timeout_ms), attempt)
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => StepOutcome::failure("compensation timed out"),
            }
        } else {
            attempt.await
        }
    }
}
