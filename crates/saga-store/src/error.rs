use thiserror::Error;

use crate::{SagaId, SagaStatus, StepStatus, Version};

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// The stored version did not match the version the caller last read.
    /// The caller must reload and decide whether to retry.
    #[error(
        "Concurrent modification of saga {saga_id}: expected version {expected}, found {actual}"
    )]
    ConcurrentModification {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// The saga was not found in the store.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// A stored row could not be mapped back onto the model.
    #[error("Corrupt saga record {saga_id}: {reason}")]
    Corrupt { saga_id: SagaId, reason: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A state change that the saga or step state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Saga {saga_id} cannot move from {from} to {to}")]
    Saga {
        saga_id: SagaId,
        from: SagaStatus,
        to: SagaStatus,
    },

    #[error("Step '{step_name}' cannot move from {from} to {to}")]
    Step {
        step_name: String,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("Saga {saga_id} is {status} and can no longer change")]
    Terminal { saga_id: SagaId, status: SagaStatus },

    #[error("Saga {saga_id} has no step at index {index}")]
    UnknownStep { saga_id: SagaId, index: usize },
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, SagaStoreError>;
