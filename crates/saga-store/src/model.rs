//! Saga instance and step record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransitionError;
use crate::{SagaId, SagaStatus, StepStatus, Version};

/// Execution record of one step inside a saga instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub(crate) step_name: String,
    pub(crate) sequence_index: usize,
    pub(crate) status: StepStatus,
    pub(crate) request_payload: Value,
    pub(crate) result_payload: Option<Value>,
    pub(crate) attempt: u32,
    pub(crate) last_error: Option<String>,
}

impl StepRecord {
    /// Creates a step record that has not been executed yet.
    pub fn new(step_name: impl Into<String>, sequence_index: usize, request_payload: Value) -> Self {
        Self {
            step_name: step_name.into(),
            sequence_index,
            status: StepStatus::NotStarted,
            request_payload,
            result_payload: None,
            attempt: 0,
            last_error: None,
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn request_payload(&self) -> &Value {
        &self.request_payload
    }

    /// The forward action's result, kept for the compensating action.
    pub fn result_payload(&self) -> Option<&Value> {
        self.result_payload.as_ref()
    }

    /// Number of invocations made so far (forward and compensation combined).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn move_to(&mut self, next: StepStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Step {
                step_name: self.step_name.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// One run of a saga definition.
///
/// The instance exclusively owns its step records; both are saved together
/// and both become immutable once the instance reaches a terminal status.
/// All mutators validate against the state machines in [`crate::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub(crate) saga_id: SagaId,
    pub(crate) definition_name: String,
    pub(crate) status: SagaStatus,
    pub(crate) input: Value,
    pub(crate) steps: Vec<StepRecord>,
    pub(crate) cancel_requested: bool,
    pub(crate) failure_reason: Option<String>,
    pub(crate) version: Version,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl SagaInstance {
    /// Creates a new, never-saved instance in `Pending`.
    ///
    /// Step records must already be ordered by a dense 0-based sequence index.
    pub fn new(
        saga_id: SagaId,
        definition_name: impl Into<String>,
        input: Value,
        steps: Vec<StepRecord>,
    ) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            definition_name: definition_name.into(),
            status: SagaStatus::Pending,
            input,
            steps,
            cancel_requested: false,
            failure_reason: None,
            version: Version::initial(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    pub fn definition_name(&self) -> &str {
        &self.definition_name
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Step records in ascending sequence order.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&StepRecord> {
        self.steps.get(index)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Version this copy was read at (or last saved as).
    pub fn version(&self) -> Version {
        self.version
    }

    /// Records the version assigned by a successful save.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Index of the first step that has not been attempted yet.
    pub fn next_pending_step(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status == StepStatus::NotStarted)
    }

    /// Indices of steps whose effects must be undone, in compensation order
    /// (descending sequence index).
    pub fn compensation_order(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .steps
            .iter()
            .filter(|s| s.status.needs_compensation())
            .map(|s| s.sequence_index)
            .collect();
        indices.sort_unstable_by(|a, b| b.cmp(a));
        indices
    }

    /// Moves the saga to `next`.
    pub fn transition(&mut self, next: SagaStatus) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Saga {
                saga_id: self.saga_id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Flags an operator cancellation; the driving worker acts on it.
    pub fn request_cancel(&mut self) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        if !self.status.can_cancel() {
            return Err(TransitionError::Saga {
                saga_id: self.saga_id,
                from: self.status,
                to: SagaStatus::Compensating,
            });
        }
        self.cancel_requested = true;
        self.touch();
        Ok(())
    }

    pub fn set_failure_reason(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_mutable()?;
        self.failure_reason = Some(reason.into());
        self.touch();
        Ok(())
    }

    /// Adds `count` invocations to the step at `index`.
    pub fn record_attempts(&mut self, index: usize, count: u32) -> Result<u32, TransitionError> {
        let step = self.step_mut(index)?;
        step.attempt += count;
        let attempt = step.attempt;
        self.touch();
        Ok(attempt)
    }

    pub fn record_step_error(
        &mut self,
        index: usize,
        error: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.step_mut(index)?.last_error = Some(error.into());
        self.touch();
        Ok(())
    }

    pub fn mark_step_succeeded(&mut self, index: usize, result: Value) -> Result<(), TransitionError> {
        let step = self.step_mut(index)?;
        step.move_to(StepStatus::Succeeded)?;
        step.result_payload = Some(result);
        step.last_error = None;
        self.touch();
        Ok(())
    }

    pub fn mark_step_failed(
        &mut self,
        index: usize,
        error: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let step = self.step_mut(index)?;
        step.move_to(StepStatus::Failed)?;
        step.last_error = Some(error.into());
        self.touch();
        Ok(())
    }

    pub fn mark_step_compensating(&mut self, index: usize) -> Result<(), TransitionError> {
        let step = self.step_mut(index)?;
        if step.status != StepStatus::Compensating {
            step.move_to(StepStatus::Compensating)?;
        }
        self.touch();
        Ok(())
    }

    pub fn mark_step_compensated(&mut self, index: usize) -> Result<(), TransitionError> {
        let step = self.step_mut(index)?;
        step.move_to(StepStatus::Compensated)?;
        step.last_error = None;
        self.touch();
        Ok(())
    }

    fn step_mut(&mut self, index: usize) -> Result<&mut StepRecord, TransitionError> {
        self.ensure_mutable()?;
        let saga_id = self.saga_id;
        self.steps
            .get_mut(index)
            .ok_or(TransitionError::UnknownStep { saga_id, index })
    }

    fn ensure_mutable(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal {
                saga_id: self.saga_id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
