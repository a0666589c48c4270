//! Saga instance model and durable storage.
//!
//! A [`SagaInstance`] owns its ordered [`StepRecord`]s and is always saved as
//! one unit. Every [`SagaStore`] implementation guards saves with an optimistic
//! version check so that at most one worker drives a given saga at a time.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod status;
pub mod store;

pub use common::{SagaId, Version};
pub use error::{Result, SagaStoreError, TransitionError};
pub use memory::InMemorySagaStore;
pub use model::{SagaInstance, StepRecord};
pub use postgres::PostgresSagaStore;
pub use status::{SagaStatus, StepStatus};
pub use store::{SagaStore, SagaStoreExt, SagaStream};
