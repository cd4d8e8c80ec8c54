//! The saga aggregate.

use chrono::{DateTime, Duration, Utc};
use common::{SagaId, Version};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::status::{SagaStatus, StepStatus};
use crate::step::Step;
use crate::DEFAULT_MAX_RETRIES;

/// Opaque key/value payload carried by sagas and steps.
///
/// Kept loose at the engine boundary; adapters validate and parse the
/// entries they understand.
pub type DataMap = serde_json::Map<String, serde_json::Value>;

/// A multi-step distributed transaction with compensating rollback.
///
/// The saga is mutated only by the execution engine and the compensation
/// driver; every mutation is persisted through the store's version CAS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saga {
    /// Opaque unique identifier assigned at creation.
    pub saga_id: SagaId,

    /// Workflow type label, used for metrics tagging and policy lookup.
    pub name: String,

    /// Optional external business key; multiple sagas may share one.
    pub correlation_id: Option<String>,

    /// Current lifecycle status.
    pub status: SagaStatus,

    /// Ordered steps; insertion order is execution order.
    pub steps: Vec<Step>,

    /// 0-based cursor into `steps`; meaningful only while active.
    pub current_step_index: usize,

    /// Input payload shared with every step.
    pub input_data: DataMap,

    /// Union of completed steps' outputs; later steps overwrite earlier
    /// entries on key collision.
    pub output_data: DataMap,

    /// Saga-level retries already spent.
    pub retry_count: u32,

    /// Saga-level retry budget, distinct from the per-step budgets.
    pub max_retries: u32,

    /// Wall-clock budget from `started_at` in milliseconds; 0 = unbounded.
    pub timeout_ms: u64,

    /// Higher runs sooner when the scheduler chooses between ready sagas.
    pub priority: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency version, incremented by the store on write.
    pub version: Version,

    /// Populated only in FAILED/TIMEOUT.
    pub error_message: Option<String>,

    /// Diagnostic detail for FAILED/TIMEOUT.
    pub error_trace: Option<String>,

    /// Opaque annotations, not interpreted by the engine.
    pub metadata: DataMap,

    /// Opaque labels, not interpreted by the engine.
    pub tags: Vec<String>,
}

impl Saga {
    /// Creates a saga in `CREATED` with no steps.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            saga_id: SagaId::new(),
            name: name.into(),
            correlation_id: None,
            status: SagaStatus::Created,
            steps: Vec::new(),
            current_step_index: 0,
            input_data: DataMap::new(),
            output_data: DataMap::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_ms: 0,
            priority: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            version: Version::initial(),
            error_message: None,
            error_trace: None,
            metadata: DataMap::new(),
            tags: Vec::new(),
        }
    }

    /// Returns the step under the cursor, if any remain.
    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current_step_index)
    }

    /// Returns the step under the cursor mutably.
    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.get_mut(self.current_step_index)
    }

    /// Returns true if steps remain past the cursor.
    pub fn has_more_steps(&self) -> bool {
        self.current_step_index < self.steps.len()
    }

    /// Advances the cursor past the current step.
    pub fn advance(&mut self) {
        self.current_step_index += 1;
    }

    /// Returns true if a saga-level retry is still within budget.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Returns the wall-clock deadline, if the saga has a budget and started.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        if self.timeout_ms == 0 {
            return None;
        }
        self.started_at
            .map(|started| started + Duration::milliseconds(self.timeout_ms as i64))
    }

    /// Returns true if the wall-clock budget is exhausted at `now`.
    pub fn timed_out(&self, now: DateTime<Utc>) -> bool {
        matches!(self.deadline(), Some(deadline) if now >= deadline)
    }

    /// Merges a step's output into the saga output, later keys winning.
    pub fn merge_output(&mut self, output: &DataMap) {
        for (key, value) in output {
            self.output_data.insert(key.clone(), value.clone());
        }
    }

    /// Resets the saga for an administrative retry.
    ///
    /// Execution resumes from the current cursor; step retry budgets from
    /// the cursor onward are restored.
    pub fn reset_for_retry(&mut self) {
        self.status = SagaStatus::Running;
        self.retry_count = 0;
        self.error_message = None;
        self.error_trace = None;
        self.completed_at = None;
        let cursor = self.current_step_index;
        for step in self.steps.iter_mut().skip(cursor) {
            step.status = StepStatus::Created;
            step.retry_count = 0;
            step.error_message = None;
            step.error_trace = None;
            step.started_at = None;
            step.completed_at = None;
            step.duration_ms = None;
        }
    }

    /// Checks the structural invariants that must hold after every
    /// persisted write.
    pub fn validate(&self) -> Result<(), DomainError> {
        for (i, step) in self.steps.iter().enumerate() {
            if step.order != i {
                return Err(DomainError::Invariant(format!(
                    "step '{}' has order {} at index {}",
                    step.name, step.order, i
                )));
            }
            if step.retry_count > step.max_retries {
                return Err(DomainError::Invariant(format!(
                    "step '{}' retry_count {} exceeds budget {}",
                    step.name, step.retry_count, step.max_retries
                )));
            }
        }

        if self.retry_count > self.max_retries {
            return Err(DomainError::Invariant(format!(
                "saga retry_count {} exceeds budget {}",
                self.retry_count, self.max_retries
            )));
        }

        if self.status.is_active() && self.current_step_index > self.steps.len() {
            return Err(DomainError::Invariant(format!(
                "cursor {} out of range for {} steps",
                self.current_step_index,
                self.steps.len()
            )));
        }

        if matches!(self.status, SagaStatus::Running | SagaStatus::Retrying) {
            for step in self.steps.iter().take(self.current_step_index) {
                if !matches!(step.status, StepStatus::Completed | StepStatus::Skipped) {
                    return Err(DomainError::Invariant(format!(
                        "step '{}' before the cursor is {}",
                        step.name, step.status
                    )));
                }
            }
        }

        if self.status == SagaStatus::Completed {
            for step in &self.steps {
                if step.required && step.status != StepStatus::Completed {
                    return Err(DomainError::Invariant(format!(
                        "completed saga has required step '{}' in {}",
                        step.name, step.status
                    )));
                }
            }
        }

        let completed_at_expected = self.status.is_terminal();
        if completed_at_expected != self.completed_at.is_some() {
            return Err(DomainError::Invariant(format!(
                "completed_at set = {} in status {}",
                self.completed_at.is_some(),
                self.status
            )));
        }

        Ok(())
    }
}
