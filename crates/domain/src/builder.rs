//! Fluent construction of sagas.

use crate::error::DomainError;
use crate::saga::{DataMap, Saga};
use crate::step::Step;

/// Builds a saga from steps and options, assigning step order on build.
///
/// ```
/// use domain::{SagaBuilder, Step, CompensationConfig};
///
/// let saga = SagaBuilder::new("order-fulfillment")
///     .correlation_id("order-42")
///     .step(
///         Step::business("reserve-inventory", "inventory.reserve")
///             .with_compensation(CompensationConfig::business("inventory.release")),
///     )
///     .step(Step::http("charge", "POST", "http://payments.svc/charge"))
///     .build()
///     .unwrap();
///
/// assert_eq!(saga.steps.len(), 2);
/// assert_eq!(saga.steps[1].order, 1);
/// ```
#[derive(Debug)]
pub struct SagaBuilder {
    saga: Saga,
}

impl SagaBuilder {
    /// Starts a builder for a saga with the given workflow name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            saga: Saga::new(name),
        }
    }

    /// Sets the external business key.
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.saga.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the saga input payload.
    pub fn input(mut self, input: DataMap) -> Self {
        self.saga.input_data = input;
        self
    }

    /// Sets the saga-level retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.saga.max_retries = max_retries;
        self
    }

    /// Sets the saga wall-clock budget in milliseconds; 0 = unbounded.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.saga.timeout_ms = timeout_ms;
        self
    }

    /// Sets the scheduling priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.saga.priority = priority;
        self
    }

    /// Attaches an opaque metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.saga.metadata.insert(key.into(), value);
        self
    }

    /// Attaches an opaque tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.saga.tags.push(tag.into());
        self
    }

    /// Appends a step; execution order is append order.
    pub fn step(mut self, step: Step) -> Self {
        self.saga.steps.push(step);
        self
    }

    /// Appends several steps at once.
    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.saga.steps.extend(steps);
        self
    }

    /// Finalizes the saga, assigning step order and validating structure.
    pub fn build(mut self) -> Result<Saga, DomainError> {
        if self.saga.name.trim().is_empty() {
            return Err(DomainError::Validation("saga name must not be empty".into()));
        }
        for (i, step) in self.saga.steps.iter_mut().enumerate() {
            step.order = i;
            if step.name.trim().is_empty() {
                return Err(DomainError::Validation(format!(
                    "step at index {i} has an empty name"
                )));
            }
        }
        self.saga.validate()?;
        Ok(self.saga)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{SagaStatus, StepType};

    #[test]
    fn build_assigns_sequential_order() {
        let saga = SagaBuilder::new("checkout")
            .step(Step::wait("a", 1))
            .step(Step::wait("b", 1))
            .step(Step::wait("c", 1))
            .build()
            .unwrap();
        let orders: Vec<usize> = saga.steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(saga.status, SagaStatus::Created);
    }

    #[test]
    fn build_rejects_empty_saga_name() {
        assert!(SagaBuilder::new("  ").build().is_err());
    }

    #[test]
    fn build_rejects_empty_step_name() {
        let result = SagaBuilder::new("checkout").step(Step::wait("", 1)).build();
        assert!(result.is_err());
    }

    #[test]
    fn build_with_zero_steps_is_allowed() {
        let saga = SagaBuilder::new("noop").build().unwrap();
        assert!(saga.steps.is_empty());
    }

    #[test]
    fn options_are_applied() {
        let saga = SagaBuilder::new("checkout")
            .correlation_id("order-42")
            .max_retries(5)
            .timeout_ms(60_000)
            .priority(7)
            .tag("billing")
            .metadata("tenant", serde_json::json!("acme"))
            .step(Step::business("reserve", "inventory.reserve"))
            .build()
            .unwrap();

        assert_eq!(saga.correlation_id.as_deref(), Some("order-42"));
        assert_eq!(saga.max_retries, 5);
        assert_eq!(saga.timeout_ms, 60_000);
        assert_eq!(saga.priority, 7);
        assert_eq!(saga.tags, vec!["billing"]);
        assert_eq!(saga.metadata["tenant"], serde_json::json!("acme"));
        assert_eq!(saga.steps[0].step_type, StepType::BusinessLogic);
    }
}
