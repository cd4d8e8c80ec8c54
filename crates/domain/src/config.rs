//! Step execution and compensation configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::status::StepType;

/// Type-specific execution configuration for a step.
///
/// Only the fields relevant to the step's type are consulted by its
/// executor; the rest stay at their defaults. Unknown payload shapes are
/// deliberately loose here and validated inside the adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StepConfig {
    /// For HTTP calls: the URL to call.
    pub url: Option<String>,

    /// For HTTP calls: the HTTP method (GET, POST, PUT, DELETE).
    pub http_method: Option<String>,

    /// For HTTP calls: request headers.
    pub headers: HashMap<String, String>,

    /// For HTTP calls: request body template with `{{key}}` placeholders.
    pub request_body_template: Option<String>,

    /// For HTTP calls: accepted response status codes. Empty means any 2xx.
    pub expected_status_codes: Vec<u16>,

    /// For database operations: the statement to execute, `$n` placeholders.
    pub query: Option<String>,

    /// For database operations: positional parameters for the statement.
    pub query_parameters: Vec<serde_json::Value>,

    /// For business logic: the registered handler key.
    pub handler: Option<String>,

    /// For business logic: an optional method discriminator passed to the handler.
    pub method: Option<String>,

    /// For wait operations: delay in milliseconds.
    pub delay_ms: Option<u64>,

    /// For conditional steps: condition expression (reserved).
    pub condition: Option<String>,

    /// For parallel steps: step IDs to fan out to (reserved).
    pub parallel_step_ids: Vec<String>,

    /// For sub-saga steps: the saga name to launch (reserved).
    pub sub_saga_name: Option<String>,

    /// Free-form adapter properties.
    pub properties: HashMap<String, serde_json::Value>,
}

impl StepConfig {
    /// Creates an HTTP call configuration.
    pub fn http(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            http_method: Some(method.into()),
            ..Default::default()
        }
    }

    /// Creates a database operation configuration.
    pub fn database(query: impl Into<String>, parameters: Vec<serde_json::Value>) -> Self {
        Self {
            query: Some(query.into()),
            query_parameters: parameters,
            ..Default::default()
        }
    }

    /// Creates a business logic configuration for a registered handler.
    pub fn business(handler: impl Into<String>) -> Self {
        Self {
            handler: Some(handler.into()),
            ..Default::default()
        }
    }

    /// Creates a wait configuration.
    pub fn wait(delay_ms: u64) -> Self {
        Self {
            delay_ms: Some(delay_ms),
            ..Default::default()
        }
    }
}

/// The kind of action that undoes a completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationType {
    HttpCall,
    DatabaseOp,
    BusinessLogic,
    MessageQueue,
    FileOp,
    /// The step needs no undo action; compensation succeeds trivially.
    #[default]
    None,
}

impl CompensationType {
    /// Maps the compensation kind onto the step type whose executor runs it.
    ///
    /// `None` has no executor; the driver settles it without dispatching.
    pub fn as_step_type(&self) -> Option<StepType> {
        match self {
            CompensationType::HttpCall => Some(StepType::HttpCall),
            CompensationType::DatabaseOp => Some(StepType::DatabaseOp),
            CompensationType::BusinessLogic => Some(StepType::BusinessLogic),
            CompensationType::MessageQueue => Some(StepType::MessageQueue),
            CompensationType::FileOp => Some(StepType::FileOp),
            CompensationType::None => None,
        }
    }
}

/// Configuration for compensating (rolling back) a completed step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompensationConfig {
    /// Kind of compensation action.
    pub compensation_type: CompensationType,

    /// Execution configuration for the compensating action, same shape as
    /// the forward config.
    pub config: StepConfig,

    /// Timeout for a single compensation attempt in milliseconds; 0 = none.
    pub timeout_ms: u64,

    /// Maximum number of retries for the compensation.
    pub max_retries: u32,

    /// Delay between compensation attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Whether a terminal compensation failure fails the whole rollback.
    pub required: bool,
}

impl CompensationConfig {
    /// Creates a business logic compensation for a registered handler.
    pub fn business(handler: impl Into<String>) -> Self {
        Self {
            compensation_type: CompensationType::BusinessLogic,
            config: StepConfig::business(handler),
            ..Default::default()
        }
    }

    /// Creates an HTTP compensation.
    pub fn http(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            compensation_type: CompensationType::HttpCall,
            config: StepConfig::http(method, url),
            ..Default::default()
        }
    }

    /// Marks the compensation as required for saga consistency.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the compensation retry budget.
    pub fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }
}
