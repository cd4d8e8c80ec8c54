//! The saga execution engine: advance, retry, timeout, fail, compensate,
//! complete.
//!
//! Each saga is driven by one engine task at a time. Every state
//! transition is persisted through the store's version CAS before its
//! event is published; a conflicting write reloads the saga and
//! re-evaluates instead of clobbering a concurrent engine's progress.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::SagaId;
use domain::{Saga, SagaStatus, StepStatus};
use saga_store::{SagaStore, StoreError};

use crate::cache::SagaCache;
use crate::compensation::CompensationDriver;
use crate::config::ExecutionDefaults;
use crate::events::{EventBus, SagaEvent};
use crate::executor::StepOutcome;
use crate::pool::WorkerPools;
use crate::registry::StepExecutorRegistry;
use crate::{EngineError, Result};

/// Outcome of one persist attempt.
pub(crate) enum PersistOutcome {
    /// The write landed; the in-memory copy carries the new version.
    Saved,
    /// A concurrent writer won; the in-memory copy was replaced with the
    /// freshly loaded record and the caller must re-evaluate.
    Conflicted,
}

/// Saves a saga through the version CAS, retrying transient store errors
/// with linear backoff. On conflict the fresh record replaces `saga`.
pub(crate) async fn persist_saga<S: SagaStore>(
    store: &S,
    cache: &SagaCache,
    saga: &mut Saga,
    defaults: &ExecutionDefaults,
) -> Result<PersistOutcome> {
    let mut attempt: u32 = 0;
    loop {
        match store.save(saga.clone()).await {
            Ok(stored) => {
                *saga = stored;
                cache.put(saga.clone()).await;
                return Ok(PersistOutcome::Saved);
            }
            Err(StoreError::Conflict { .. }) => {
                tracing::debug!(saga_id = %saga.saga_id, "stale version, reloading saga");
                let fresh = store
                    .find(saga.saga_id)
                    .await?
                    .ok_or(EngineError::SagaNotFound(saga.saga_id))?;
                *saga = fresh;
                cache.put(saga.clone()).await;
                return Ok(PersistOutcome::Conflicted);
            }
            Err(StoreError::Database(err)) if attempt + 1 < defaults.store_retry_attempts => {
                attempt += 1;
                tracing::warn!(
                    saga_id = %saga.saga_id,
                    attempt,
                    error = %err,
                    "store write failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(
                    defaults.store_retry_delay_ms * attempt as u64,
                ))
                .await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// The saga state machine driver.
pub struct ExecutionEngine<S> {
    store: S,
    registry: Arc<StepExecutorRegistry>,
    bus: Arc<EventBus>,
    pools: Arc<WorkerPools>,
    cache: Arc<SagaCache>,
    compensation: CompensationDriver<S>,
    defaults: ExecutionDefaults,
}

impl<S: SagaStore + Clone + Send + Sync + 'static> ExecutionEngine<S> {
    /// Creates an engine over shared state built at startup.
    pub fn new(
        store: S,
        registry: Arc<StepExecutorRegistry>,
        bus: Arc<EventBus>,
        pools: Arc<WorkerPools>,
        cache: Arc<SagaCache>,
        defaults: ExecutionDefaults,
    ) -> Self {
        let compensation = CompensationDriver::new(
            store.clone(),
            Arc::clone(&registry),
            Arc::clone(&bus),
            Arc::clone(&cache),
            defaults.clone(),
        );
        Self {
            store,
            registry,
            bus,
            pools,
            cache,
            compensation,
            defaults,
        }
    }

    /// Drives one saga to its next stable state.
    ///
    /// Idempotent on terminal sagas: returns the stored state untouched
    /// and emits nothing.
    #[tracing::instrument(skip(self), fields(saga_id = %saga_id))]
    pub async fn execute(&self, saga_id: SagaId) -> Result<Saga> {
        let saga = self
            .store
            .find(saga_id)
            .await?
            .ok_or(EngineError::SagaNotFound(saga_id))?;

        if saga.status.is_terminal() {
            return Ok(saga);
        }
        match saga.status {
            SagaStatus::Compensating => {
                self.pools
                    .compensation
                    .throttle(self.compensation.run(saga))
                    .await
            }
            SagaStatus::Paused => Ok(saga),
            _ => self.drive(saga).await,
        }
    }

    /// Moves a saga past its wall-clock budget into `TIMEOUT` and rolls
    /// back its completed prefix. No-op unless the saga is active and
    /// actually expired.
    pub async fn mark_timed_out(&self, saga: Saga) -> Result<Saga> {
        if !saga.status.is_active() || !saga.timed_out(Utc::now()) {
            return Ok(saga);
        }
        self.finalize_timeout(saga).await
    }

    /// Transitions a saga into `COMPENSATING` rollback and drives it to a
    /// terminal state. The caller has already persisted the
    /// `COMPENSATING` status.
    pub async fn compensate(&self, saga: Saga) -> Result<Saga> {
        self.pools
            .compensation
            .throttle(self.compensation.run(saga))
            .await
    }

    async fn persist(&self, saga: &mut Saga) -> Result<bool> {
        let outcome = persist_saga(&self.store, &self.cache, saga, &self.defaults).await?;
        Ok(matches!(outcome, PersistOutcome::Saved))
    }

    async fn drive(&self, mut saga: Saga) -> Result<Saga> {
        if saga.status == SagaStatus::Created {
            saga.status = SagaStatus::Running;
            saga.started_at = Some(Utc::now());
            if self.persist(&mut saga).await? {
                tracing::info!(name = %saga.name, "saga started");
                self.bus.publish(SagaEvent::saga_started(&saga)).await;
            }
        }

        loop {
            match saga.status {
                SagaStatus::Running | SagaStatus::Retrying => {}
                SagaStatus::Compensating => {
                    return self
                        .pools
                        .compensation
                        .throttle(self.compensation.run(saga))
                        .await;
                }
                _ => return Ok(saga),
            }

            if saga.timed_out(Utc::now()) {
                return self.finalize_timeout(saga).await;
            }

            if !saga.has_more_steps() {
                return self.finalize_completed(saga).await;
            }

            saga = self.attempt_current_step(saga).await?;
        }
    }

    async fn attempt_current_step(&self, mut saga: Saga) -> Result<Saga> {
        let idx = saga.current_step_index;
        let step_type = saga.steps[idx].step_type;

        let executor = match self.registry.get(step_type) {
            Ok(executor) => executor,
            Err(EngineError::UnsupportedStepType(step_type)) => {
                // Non-retryable by definition: no adapter will appear
                // between attempts.
                return self
                    .handle_step_failure(
                        saga,
                        idx,
                        format!("unsupported step type: {step_type}"),
                        None,
                        true,
                    )
                    .await;
            }
            Err(err) => return Err(err),
        };

        {
            let step = &mut saga.steps[idx];
            step.status = StepStatus::Running;
            if step.started_at.is_none() {
                step.started_at = Some(Utc::now());
            }
            saga.status = SagaStatus::Running;
        }
        if !self.persist(&mut saga).await? {
            return Ok(saga);
        }
        {
            let step = &saga.steps[idx];
            self.bus
                .publish(SagaEvent::step_started(
                    saga.saga_id,
                    step.step_id,
                    &step.name,
                    step.step_type,
                ))
                .await;
            tracing::debug!(step = %step.name, index = idx, "step attempt started");
        }

        let step_snapshot = saga.steps[idx].clone();
        let input = saga.input_data.clone();

        let now = Utc::now();
        let saga_remaining = saga
            .deadline()
            .map(|deadline| (deadline - now).to_std().unwrap_or(Duration::ZERO));
        let step_budget = (step_snapshot.timeout_ms > 0)
            .then(|| Duration::from_millis(step_snapshot.timeout_ms));
        let attempt_deadline = match (saga_remaining, step_budget) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };

        let attempt = self
            .pools
            .step_exec
            .throttle(async { executor.execute(&step_snapshot, &input).await });
        let outcome = match attempt_deadline {
            Some(deadline) => match tokio::time::timeout(deadline, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    if saga.timed_out(Utc::now()) {
                        // The saga budget expired mid-step: abandon the
                        // attempt and time the whole saga out.
                        return self.finalize_timeout(saga).await;
                    }
                    StepOutcome::failure("step timed out")
                }
            },
            None => attempt.await,
        };

        if outcome.success {
            self.handle_step_success(saga, idx, outcome).await
        } else {
            let message = outcome
                .error_message
                .unwrap_or_else(|| "step failed".to_string());
            self.handle_step_failure(saga, idx, message, outcome.error_trace, false)
                .await
        }
    }

    async fn handle_step_success(
        &self,
        mut saga: Saga,
        idx: usize,
        outcome: StepOutcome,
    ) -> Result<Saga> {
        // A conflicting write reloads and RE-APPLIES this transition onto
        // the fresh copy rather than re-running the side effect, unless a
        // concurrent driver already moved the saga past this step.
        loop {
            let now = Utc::now();
            {
                let step = &mut saga.steps[idx];
                step.status = StepStatus::Completed;
                step.output_data = outcome.output.clone();
                step.error_message = None;
                step.error_trace = None;
                step.settle(now);
            }
            saga.merge_output(&outcome.output);
            saga.current_step_index = idx + 1;
            saga.retry_count = 0;
            saga.status = SagaStatus::Running;

            // The last step's success and the saga's completion are one
            // write, so no persisted state shows RUNNING with the cursor
            // past the end.
            let finished = !saga.has_more_steps();
            if finished {
                saga.status = SagaStatus::Completed;
                saga.completed_at = Some(now);
            }

            if self.persist(&mut saga).await? {
                let step = &saga.steps[idx];
                tracing::info!(step = %step.name, "step completed");
                self.bus
                    .publish(SagaEvent::step_completed(
                        saga.saga_id,
                        step.step_id,
                        &step.name,
                        step.step_type,
                        step.duration_ms,
                    ))
                    .await;
                if finished {
                    let duration_ms = saga.started_at.map(|s| (now - s).num_milliseconds());
                    tracing::info!(saga_id = %saga.saga_id, ?duration_ms, "saga completed");
                    self.bus
                        .publish(SagaEvent::saga_completed(saga.saga_id, duration_ms))
                        .await;
                }
                return Ok(saga);
            }

            // Only re-apply while the fresh copy still shows this step
            // in flight under a forward-driving saga.
            let still_ours = matches!(saga.status, SagaStatus::Running | SagaStatus::Retrying)
                && saga.current_step_index == idx
                && matches!(
                    saga.steps[idx].status,
                    StepStatus::Created | StepStatus::Running | StepStatus::Retrying
                );
            if !still_ours {
                return Ok(saga);
            }
        }
    }

    async fn handle_step_failure(
        &self,
        mut saga: Saga,
        idx: usize,
        message: String,
        trace: Option<String>,
        non_retryable: bool,
    ) -> Result<Saga> {
        let now = Utc::now();
        {
            let step = &mut saga.steps[idx];
            step.error_message = Some(message.clone());
            step.error_trace = trace;
            step.settle(now);
        }

        let can_retry = !non_retryable && saga.steps[idx].can_retry();
        if can_retry {
            let retry_delay_ms;
            let retry_count;
            {
                let step = &mut saga.steps[idx];
                step.retry_count += 1;
                step.status = StepStatus::Retrying;
                retry_delay_ms = step.retry_delay_ms;
                retry_count = step.retry_count;
            }
            // The saga-level counter is clamped to its own budget; it
            // resets to zero on the next step success.
            saga.retry_count = (saga.retry_count + 1).min(saga.max_retries);
            saga.status = SagaStatus::Retrying;

            if self.persist(&mut saga).await? {
                let step = &saga.steps[idx];
                tracing::info!(
                    step = %step.name,
                    retry_count,
                    error = %message,
                    "step failed, retrying"
                );
                self.bus
                    .publish(SagaEvent::step_retrying(
                        saga.saga_id,
                        step.step_id,
                        &step.name,
                        step.step_type,
                        retry_count,
                    ))
                    .await;
                tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
            }
            return Ok(saga);
        }

        if !saga.steps[idx].required {
            saga.steps[idx].status = StepStatus::Skipped;
            saga.advance();
            saga.status = SagaStatus::Running;
            let finished = !saga.has_more_steps();
            if finished {
                saga.status = SagaStatus::Completed;
                saga.completed_at = Some(now);
            }
            if self.persist(&mut saga).await? {
                let step = &saga.steps[idx];
                tracing::warn!(step = %step.name, error = %message, "optional step failed, skipping");
                self.bus
                    .publish(SagaEvent::step_failed(
                        saga.saga_id,
                        step.step_id,
                        &step.name,
                        step.step_type,
                        message,
                        step.duration_ms,
                    ))
                    .await;
                if finished {
                    let duration_ms = saga.started_at.map(|s| (now - s).num_milliseconds());
                    self.bus
                        .publish(SagaEvent::saga_completed(saga.saga_id, duration_ms))
                        .await;
                }
            }
            return Ok(saga);
        }

        saga.steps[idx].status = StepStatus::Failed;
        saga.status = SagaStatus::Compensating;
        if !self.persist(&mut saga).await? {
            return Ok(saga);
        }
        {
            let step = &saga.steps[idx];
            tracing::error!(step = %step.name, error = %message, "required step failed, compensating");
            self.bus
                .publish(SagaEvent::step_failed(
                    saga.saga_id,
                    step.step_id,
                    &step.name,
                    step.step_type,
                    message,
                    step.duration_ms,
                ))
                .await;
        }
        self.pools
            .compensation
            .throttle(self.compensation.run(saga))
            .await
    }

    async fn finalize_completed(&self, mut saga: Saga) -> Result<Saga> {
        let now = Utc::now();
        saga.status = SagaStatus::Completed;
        saga.completed_at = Some(now);
        if self.persist(&mut saga).await? {
            let duration_ms = saga.started_at.map(|s| (now - s).num_milliseconds());
            tracing::info!(saga_id = %saga.saga_id, ?duration_ms, "saga completed");
            self.bus
                .publish(SagaEvent::saga_completed(saga.saga_id, duration_ms))
                .await;
        }
        Ok(saga)
    }

    async fn finalize_timeout(&self, mut saga: Saga) -> Result<Saga> {
        let now = Utc::now();
        if let Some(step) = saga.current_step_mut() {
            if matches!(step.status, StepStatus::Running | StepStatus::Retrying) {
                step.status = StepStatus::Timeout;
                if step.error_message.is_none() {
                    step.error_message = Some("saga timeout exceeded".to_string());
                }
                step.settle(now);
            }
        }
        saga.status = SagaStatus::Timeout;
        saga.error_message = Some("saga timeout exceeded".to_string());
        saga.completed_at = Some(now);

        if !self.persist(&mut saga).await? {
            return Ok(saga);
        }
        tracing::warn!(saga_id = %saga.saga_id, "saga exceeded its wall-clock budget");
        self.bus.publish(SagaEvent::saga_timed_out(saga.saga_id)).await;

        // Roll back whatever completed; the saga itself stays TIMEOUT.
        self.pools
            .compensation
            .throttle(self.compensation.rollback_completed_steps(saga))
            .await
    }
}
