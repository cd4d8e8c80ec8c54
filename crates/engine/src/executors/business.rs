//! Business logic step executor.
//!
//! Dispatches to in-process handlers registered by the host program,
//! keyed by the step config's `handler` name.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use domain::{DataMap, Step, StepType};

use crate::executor::{attempt_context, StepExecutor, StepOutcome};

/// An in-process handler invoked for `BUSINESS_LOGIC` steps.
///
/// `method` carries the config's optional method discriminator; `input`
/// is the saga input overlaid with the step's own input.
#[async_trait]
pub trait BusinessHandler: Send + Sync {
    async fn run(&self, method: Option<&str>, input: &DataMap) -> Result<DataMap, String>;
}

/// Executor routing business steps to registered handlers by name.
#[derive(Default)]
pub struct BusinessLogicExecutor {
    handlers: RwLock<HashMap<String, Arc<dyn BusinessHandler>>>,
}

impl BusinessLogicExecutor {
    /// Creates an executor with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn BusinessHandler>) {
        self.handlers.write().unwrap().insert(name.into(), handler);
    }

    /// Returns true if a handler is registered under `name`.
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.read().unwrap().contains_key(name)
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn BusinessHandler>> {
        self.handlers.read().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl StepExecutor for BusinessLogicExecutor {
    async fn execute(&self, step: &Step, saga_input: &DataMap) -> StepOutcome {
        let Some(name) = step.config.handler.as_deref() else {
            return StepOutcome::failure(format!(
                "business step '{}' has no handler configured",
                step.name
            ));
        };
        let Some(handler) = self.handler(name) else {
            return StepOutcome::failure(format!("no business handler registered for '{name}'"));
        };

        let input = attempt_context(step, saga_input);
        let started = Utc::now();
        let result = handler.run(step.config.method.as_deref(), &input).await;
        let duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;

        match result {
            Ok(output) => StepOutcome::ok(output).with_duration_ms(duration_ms),
            Err(message) => {
                tracing::warn!(step = %step.name, handler = name, error = %message, "business handler failed");
                StepOutcome::failure(message).with_duration_ms(duration_ms)
            }
        }
    }

    fn step_type(&self) -> StepType {
        StepType::BusinessLogic
    }
}
