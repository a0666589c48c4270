//! Saga execution with compensating actions.
//!
//! A saga is an ordered list of steps, each pairing a forward action with a
//! compensating action. The [`SagaEngine`] runs the forward actions in order;
//! when one fails (or an operator cancels the saga) the steps that already
//! succeeded are compensated in reverse order.
//!
//! Definitions are registered once in a [`SagaRegistry`]. Step side effects go
//! through the [`StepAction`] trait, and every state change is saved through a
//! [`saga_store::SagaStore`] before the next invocation.

pub mod action;
pub mod definition;
pub mod engine;
pub mod error;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use action::{StepAction, StepErrorKind, StepExecutionError, StepInvocation};
pub use definition::{SagaDefinition, SagaRegistry, StepDefinition};
pub use engine::{CANCELLED_BY_OPERATOR, RecoveryReport, SagaEngine};
pub use error::{DefinitionError, Result, SagaError};
pub use retry::RetryPolicy;
