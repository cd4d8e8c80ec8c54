pub mod types;

pub use types::{SagaId, StepId, Version};
