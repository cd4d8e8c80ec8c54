//! A single unit of forward work within a saga.

use chrono::{DateTime, Utc};
use common::StepId;
use serde::{Deserialize, Serialize};

use crate::config::{CompensationConfig, StepConfig};
use crate::saga::DataMap;
use crate::status::{StepStatus, StepType};
use crate::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, DEFAULT_STEP_TIMEOUT_MS};

/// One step of a saga: forward work plus an optional compensating action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the owning saga.
    pub step_id: StepId,

    /// Human-readable step name.
    pub name: String,

    /// Position in the execution order; always equals the step's index.
    pub order: usize,

    /// The kind of work this step performs.
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Current step status.
    pub status: StepStatus,

    /// Type-specific execution configuration.
    pub config: StepConfig,

    /// Optional rollback configuration.
    pub compensation_config: Option<CompensationConfig>,

    /// Step-scoped input, merged over the saga input when executing.
    pub input_data: DataMap,

    /// Output produced by the last successful attempt.
    pub output_data: DataMap,

    /// Error from the last failed attempt.
    pub error_message: Option<String>,

    /// Diagnostic detail for the last failed attempt.
    pub error_trace: Option<String>,

    /// Attempts already spent beyond the first.
    pub retry_count: u32,

    /// Retry budget for this step.
    pub max_retries: u32,

    /// Per-attempt deadline in milliseconds; 0 = no per-attempt deadline.
    pub timeout_ms: u64,

    /// Delay between attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// If false, a terminal failure skips the step instead of failing the saga.
    pub required: bool,

    /// If false, the compensation driver passes this step over.
    pub compensatable: bool,

    /// When the first attempt of the current run started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the step settled.
    pub completed_at: Option<DateTime<Utc>>,

    /// Wall-clock duration from start to settlement, in milliseconds.
    pub duration_ms: Option<i64>,
}

impl Step {
    /// Creates a step of the given type with default budgets.
    pub fn new(name: impl Into<String>, step_type: StepType, config: StepConfig) -> Self {
        Self {
            step_id: StepId::new(),
            name: name.into(),
            order: 0,
            step_type,
            status: StepStatus::Created,
            config,
            compensation_config: None,
            input_data: DataMap::new(),
            output_data: DataMap::new(),
            error_message: None,
            error_trace: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            required: true,
            compensatable: true,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Creates an HTTP call step.
    pub fn http(
        name: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self::new(name, StepType::HttpCall, StepConfig::http(method, url))
    }

    /// Creates a database operation step.
    pub fn database(
        name: impl Into<String>,
        query: impl Into<String>,
        parameters: Vec<serde_json::Value>,
    ) -> Self {
        Self::new(name, StepType::DatabaseOp, StepConfig::database(query, parameters))
    }

    /// Creates a business logic step bound to a registered handler.
    pub fn business(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::new(name, StepType::BusinessLogic, StepConfig::business(handler))
    }

    /// Creates a wait step.
    pub fn wait(name: impl Into<String>, delay_ms: u64) -> Self {
        Self::new(name, StepType::Wait, StepConfig::wait(delay_ms))
    }

    /// Attaches a compensation action.
    pub fn with_compensation(mut self, compensation: CompensationConfig) -> Self {
        self.compensation_config = Some(compensation);
        self
    }

    /// Overrides the retry budget.
    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Overrides the per-attempt deadline; 0 disables it.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Marks the step as optional: a terminal failure is skipped over.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Marks the step as having no rollback action.
    pub fn non_compensatable(mut self) -> Self {
        self.compensatable = false;
        self
    }

    /// Sets step-scoped input data.
    pub fn with_input(mut self, input: DataMap) -> Self {
        self.input_data = input;
        self
    }

    /// Returns true if another attempt is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Records the settlement timestamp and duration for the current attempt run.
    pub fn settle(&mut self, at: DateTime<Utc>) {
        self.completed_at = Some(at);
        if let Some(started) = self.started_at {
            self.duration_ms = Some((at - started).num_milliseconds());
        }
    }
}
