//! Step executor registry.

use std::collections::HashMap;
use std::sync::Arc;

use domain::StepType;

use crate::executor::StepExecutor;
use crate::{EngineError, Result};

/// Maps step types to their executors.
///
/// Built once at startup; adapters register themselves by type. A lookup
/// for an unregistered type is a non-retryable step failure.
#[derive(Default)]
pub struct StepExecutorRegistry {
    executors: HashMap<StepType, Arc<dyn StepExecutor>>,
}

impl StepExecutorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under its declared step type.
    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(executor.step_type(), executor);
    }

    /// Returns the executor for `step_type`.
    pub fn get(&self, step_type: StepType) -> Result<Arc<dyn StepExecutor>> {
        self.executors
            .get(&step_type)
            .cloned()
            .ok_or(EngineError::UnsupportedStepType(step_type))
    }

    /// Returns true if an executor exists for `step_type`.
    pub fn supports(&self, step_type: StepType) -> bool {
        self.executors.contains_key(&step_type)
    }

    /// Returns the registered step types.
    pub fn supported_types(&self) -> Vec<StepType> {
        self.executors.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::wait::WaitStepExecutor;

    #[test]
    fn lookup_of_registered_type() {
        let mut registry = StepExecutorRegistry::new();
        registry.register(Arc::new(WaitStepExecutor::new()));

        assert!(registry.supports(StepType::Wait));
        assert!(registry.get(StepType::Wait).is_ok());
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let registry = StepExecutorRegistry::new();
        let result = registry.get(StepType::SubSaga);
        assert!(matches!(
            result,
            Err(EngineError::UnsupportedStepType(StepType::SubSaga))
        ));
        assert!(!registry.supports(StepType::SubSaga));
    }

    #[test]
    fn registration_replaces_previous() {
        let mut registry = StepExecutorRegistry::new();
        registry.register(Arc::new(WaitStepExecutor::new()));
        registry.register(Arc::new(WaitStepExecutor::new()));
        assert_eq!(registry.supported_types(), vec![StepType::Wait]);
    }
}
