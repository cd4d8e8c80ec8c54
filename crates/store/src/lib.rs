//! Durable persistence for sagas.
//!
//! The store keeps one record per saga and guards concurrent writers with
//! an optimistic version check: a save carrying a stale version fails with
//! [`StoreError::Conflict`] and the caller reloads and re-applies.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use query::{Page, PageRequest};
pub use store::SagaStore;
