//! Wait step executor.

use async_trait::async_trait;
use domain::{DataMap, Step, StepType};

use crate::executor::{StepExecutor, StepOutcome};

/// Sleeps for the configured delay; always succeeds unless cancelled by
/// the engine's deadline.
#[derive(Debug, Default)]
pub struct WaitStepExecutor;

impl WaitStepExecutor {
    /// Creates the executor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepExecutor for WaitStepExecutor {
    async fn execute(&self, step: &Step, _saga_input: &DataMap) -> StepOutcome {
        let delay_ms = step.config.delay_ms.unwrap_or(0);
        tracing::debug!(step = %step.name, delay_ms, "wait step sleeping");
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;

        let mut output = DataMap::new();
        output.insert("waited_ms".into(), serde_json::json!(delay_ms));
        StepOutcome::ok(output).with_duration_ms(delay_ms)
    }

    fn step_type(&self) -> StepType {
        StepType::Wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleeps_and_reports_delay() {
        let executor = WaitStepExecutor::new();
        let step = Step::wait("pause", 20);
        let started = std::time::Instant::now();

        let outcome = executor.execute(&step, &DataMap::new()).await;

        assert!(outcome.success);
        assert!(started.elapsed() >= std::time::Duration::from_millis(20));
        assert_eq!(outcome.output["waited_ms"], serde_json::json!(20));
    }

    #[tokio::test]
    async fn missing_delay_is_zero() {
        let executor = WaitStepExecutor::new();
        let step = Step::new("pause", StepType::Wait, domain::StepConfig::default());
        let outcome = executor.execute(&step, &DataMap::new()).await;
        assert!(outcome.success);
        assert_eq!(outcome.output["waited_ms"], serde_json::json!(0));
    }
}
