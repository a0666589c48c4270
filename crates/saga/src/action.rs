//! Step action capability and its failure type.

use std::time::Duration;

use async_trait::async_trait;
use common::SagaId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Everything a step action needs to perform one invocation.
#[derive(Debug, Clone, Copy)]
pub struct StepInvocation<'a> {
    pub saga_id: SagaId,
    pub step_name: &'a str,
    /// Stable across retries of this step within this saga.
    pub idempotency_key: &'a str,
    pub payload: &'a Value,
    /// 1-based attempt number within the current drive of the step.
    pub attempt: u32,
}

/// One external side effect and the action that semantically undoes it.
///
/// Both operations must be safe to repeat with the same idempotency key:
/// a second call with the same key must not apply the effect a second time.
#[async_trait]
pub trait StepAction: Send + Sync {
    /// Applies the effect, returning the result the compensation will need.
    async fn forward(&self, invocation: &StepInvocation<'_>) -> Result<Value, StepExecutionError>;

    /// Undoes a previously successful `forward`, given its result.
    async fn compensate(
        &self,
        invocation: &StepInvocation<'_>,
        result: &Value,
    ) -> Result<(), StepExecutionError>;
}

/// Closed classification of step failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepErrorKind {
    /// The request itself is wrong; repeating it cannot help.
    Validation,
    /// Downstream store or network blip.
    TransientInfra,
    /// Failure forced by a test hook (`failBookCar` and friends).
    SimulatedFailure,
    /// The invocation did not finish within the step timeout.
    Timeout,
    /// The downstream service refused the request for a business reason.
    Rejected,
}

impl StepErrorKind {
    /// Whether failures of this kind are retried unless stated otherwise.
    pub fn retryable_by_default(&self) -> bool {
        matches!(self, StepErrorKind::TransientInfra | StepErrorKind::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepErrorKind::Validation => "ValidationError",
            StepErrorKind::TransientInfra => "TransientInfraError",
            StepErrorKind::SimulatedFailure => "SimulatedFailure",
            StepErrorKind::Timeout => "Timeout",
            StepErrorKind::Rejected => "Rejected",
        }
    }
}

impl std::fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed failure of a forward or compensating action.
///
/// The engine only looks at `retryable`; the kind is carried for operators
/// and logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} in step '{step_name}': {message}")]
pub struct StepExecutionError {
    pub step_name: String,
    pub kind: StepErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl StepExecutionError {
    /// Creates an error whose retryability follows the kind's default.
    pub fn new(step_name: impl Into<String>, kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            kind,
            message: message.into(),
            retryable: kind.retryable_by_default(),
        }
    }

    pub fn validation(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(step_name, StepErrorKind::Validation, message)
    }

    pub fn transient(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(step_name, StepErrorKind::TransientInfra, message)
    }

    pub fn simulated(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(step_name, StepErrorKind::SimulatedFailure, message)
    }

    pub fn rejected(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(step_name, StepErrorKind::Rejected, message)
    }

    /// A timed-out invocation. Only an idempotent step may be retried after a
    /// timeout, since the first call may still have taken effect.
    pub fn timeout(step_name: impl Into<String>, after: Duration, idempotent: bool) -> Self {
        let mut err = Self::new(
            step_name,
            StepErrorKind::Timeout,
            format!("no response after {}ms", after.as_millis()),
        );
        err.retryable = idempotent;
        err
    }

    /// Overrides the retryability implied by the kind.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}
