//! Saga error types.

use common::{SagaId, Version};
use saga_store::{SagaStatus, SagaStoreError, TransitionError};
use thiserror::Error;

/// Errors raised while registering or looking up saga definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// A definition with this name is already registered.
    #[error("Saga definition '{0}' is already registered")]
    DuplicateDefinition(String),

    /// No definition with this name is registered.
    #[error("Unknown saga definition '{0}'")]
    UnknownDefinition(String),

    /// A definition must have at least one step.
    #[error("Saga definition '{0}' has no steps")]
    Empty(String),

    /// Two steps of one definition share a name.
    #[error("Saga definition '{definition}' declares step '{step}' more than once")]
    DuplicateStep { definition: String, step: String },
}

/// Errors that can occur during saga operations.
///
/// Step failures are not errors at this level: they drive the saga into
/// compensation and are recorded on the instance.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// A saga with the caller-supplied id already exists.
    #[error("Saga {0} already exists")]
    AlreadyExists(SagaId),

    /// Saga not found.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// Saga is in an invalid state for the requested operation.
    #[error("Cannot {operation} saga {saga_id} in state {status}")]
    InvalidState {
        saga_id: SagaId,
        status: SagaStatus,
        operation: &'static str,
    },

    /// Another worker saved the saga since it was read. Reload and decide.
    #[error(
        "Saga {saga_id} was modified concurrently: expected version {expected}, found {actual}"
    )]
    ConcurrentModification {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// Compensation exhausted its retries; an operator has to resolve the
    /// listed steps by hand.
    #[error("Compensation of saga {saga_id} is stuck on step(s): {}", steps.join(", "))]
    PoisonedCompensation { saga_id: SagaId, steps: Vec<String> },

    /// Stored step records do not line up with the registered definition.
    #[error("Saga {saga_id} has {records} step records but definition '{definition}' has {steps} steps")]
    DefinitionMismatch {
        saga_id: SagaId,
        definition: String,
        records: usize,
        steps: usize,
    },

    #[error("Invalid transition: {0}")]
    Transition(#[from] TransitionError),

    /// Saga store error.
    #[error("Saga store error: {0}")]
    Store(SagaStoreError),
}

impl From<SagaStoreError> for SagaError {
    fn from(err: SagaStoreError) -> Self {
        match err {
            SagaStoreError::NotFound(saga_id) => SagaError::NotFound(saga_id),
            SagaStoreError::ConcurrentModification {
                saga_id,
                expected,
                actual,
            } => SagaError::ConcurrentModification {
                saga_id,
                expected,
                actual,
            },
            other => SagaError::Store(other),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
