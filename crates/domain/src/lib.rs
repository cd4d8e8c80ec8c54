//! Domain layer for the saga orchestrator.
//!
//! This crate provides the saga aggregate and its components:
//! - `Saga` and `Step` with their status state machines
//! - Step and compensation configuration
//! - `SagaBuilder` for fluent saga construction
//! - Structural invariant validation

pub mod builder;
pub mod config;
pub mod error;
pub mod saga;
pub mod status;
pub mod step;

pub use builder::SagaBuilder;
pub use config::{CompensationConfig, CompensationType, StepConfig};
pub use error::DomainError;
pub use saga::{DataMap, Saga};
pub use status::{SagaStatus, StepStatus, StepType};
pub use step::Step;

/// Default saga-level and step-level retry budget.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between retry attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Default per-attempt step timeout, in milliseconds.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;
