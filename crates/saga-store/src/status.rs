//! Saga and step state machines.

use serde::{Deserialize, Serialize};

/// The state of a saga instance in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Running ──┬──► Completed
///                       └──► Compensating ──┬──► Compensated
///                                           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Instance and step records persisted, nothing executed yet.
    #[default]
    Pending,

    /// Forward steps are being executed.
    Running,

    /// All forward steps succeeded (terminal state).
    Completed,

    /// A forward step failed or the saga was cancelled; succeeded steps are being undone.
    Compensating,

    /// Every succeeded step was undone (terminal state).
    Compensated,

    /// A compensation could not be applied; needs an operator (terminal state).
    Failed,
}

impl SagaStatus {
    /// Returns true if the saga may move from `self` to `next`.
    pub fn can_transition_to(&self, next: SagaStatus) -> bool {
        matches!(
            (self, next),
            (SagaStatus::Pending, SagaStatus::Running)
                | (SagaStatus::Running, SagaStatus::Completed)
                | (SagaStatus::Running, SagaStatus::Compensating)
                | (SagaStatus::Compensating, SagaStatus::Compensated)
                | (SagaStatus::Compensating, SagaStatus::Failed)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Compensated | SagaStatus::Failed
        )
    }

    /// Returns true if a recovery sweep should pick this saga up.
    pub fn is_runnable(&self) -> bool {
        matches!(self, SagaStatus::Running | SagaStatus::Compensating)
    }

    /// Returns true if an operator may still request cancellation.
    pub fn can_cancel(&self) -> bool {
        matches!(self, SagaStatus::Pending | SagaStatus::Running)
    }

    /// Returns the status name as stored and rendered.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "PENDING",
            SagaStatus::Running => "RUNNING",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Compensated => "COMPENSATED",
            SagaStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SagaStatus::Pending),
            "RUNNING" => Ok(SagaStatus::Running),
            "COMPLETED" => Ok(SagaStatus::Completed),
            "COMPENSATING" => Ok(SagaStatus::Compensating),
            "COMPENSATED" => Ok(SagaStatus::Compensated),
            "FAILED" => Ok(SagaStatus::Failed),
            other => Err(format!("unknown saga status '{other}'")),
        }
    }
}

/// The state of a single step within a saga instance.
///
/// ```text
/// NotStarted ──┬──► Succeeded ──► Compensating ──► Compensated
///              └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    #[default]
    NotStarted,
    Succeeded,
    Failed,
    Compensating,
    Compensated,
}

impl StepStatus {
    /// Returns true if the step may move from `self` to `next`.
    ///
    /// `Succeeded -> Compensated` is allowed directly: the engine marks a
    /// step `Compensating` only when it has to survive a retry.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::NotStarted, StepStatus::Succeeded)
                | (StepStatus::NotStarted, StepStatus::Failed)
                | (StepStatus::Succeeded, StepStatus::Compensating)
                | (StepStatus::Succeeded, StepStatus::Compensated)
                | (StepStatus::Compensating, StepStatus::Compensated)
        )
    }

    /// Returns true if the forward effect of this step may still be in place.
    pub fn needs_compensation(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Compensating)
    }

    /// Returns the status name as stored and rendered.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::NotStarted => "NOT_STARTED",
            StepStatus::Succeeded => "SUCCEEDED",
            StepStatus::Failed => "FAILED",
            StepStatus::Compensating => "COMPENSATING",
            StepStatus::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(StepStatus::NotStarted),
            "SUCCEEDED" => Ok(StepStatus::Succeeded),
            "FAILED" => Ok(StepStatus::Failed),
            "COMPENSATING" => Ok(StepStatus::Compensating),
            "COMPENSATED" => Ok(StepStatus::Compensated),
            other => Err(format!("unknown step status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SagaStatus; 6] = [
        SagaStatus::Pending,
        SagaStatus::Running,
        SagaStatus::Completed,
        SagaStatus::Compensating,
        SagaStatus::Compensated,
        SagaStatus::Failed,
    ];

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(SagaStatus::default(), SagaStatus::Pending);
        assert_eq!(StepStatus::default(), StepStatus::NotStarted);
    }

    #[test]
    fn test_terminal_states_admit_no_transition() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_forward_path() {
        assert!(SagaStatus::Pending.can_transition_to(SagaStatus::Running));
        assert!(SagaStatus::Running.can_transition_to(SagaStatus::Completed));
        assert!(!SagaStatus::Pending.can_transition_to(SagaStatus::Completed));
        assert!(!SagaStatus::Running.can_transition_to(SagaStatus::Pending));
    }

    #[test]
    fn test_compensation_path() {
        assert!(SagaStatus::Running.can_transition_to(SagaStatus::Compensating));
        assert!(SagaStatus::Compensating.can_transition_to(SagaStatus::Compensated));
        assert!(SagaStatus::Compensating.can_transition_to(SagaStatus::Failed));
        assert!(!SagaStatus::Running.can_transition_to(SagaStatus::Failed));
        assert!(!SagaStatus::Compensating.can_transition_to(SagaStatus::Running));
    }

    #[test]
    fn test_runnable_and_cancellable() {
        assert!(SagaStatus::Running.is_runnable());
        assert!(SagaStatus::Compensating.is_runnable());
        assert!(!SagaStatus::Pending.is_runnable());
        assert!(SagaStatus::Pending.can_cancel());
        assert!(SagaStatus::Running.can_cancel());
        assert!(!SagaStatus::Compensating.can_cancel());
        assert!(!SagaStatus::Failed.can_cancel());
    }

    #[test]
    fn test_step_transitions() {
        assert!(StepStatus::NotStarted.can_transition_to(StepStatus::Succeeded));
        assert!(StepStatus::NotStarted.can_transition_to(StepStatus::Failed));
        assert!(StepStatus::Succeeded.can_transition_to(StepStatus::Compensating));
        assert!(StepStatus::Compensating.can_transition_to(StepStatus::Compensated));
        assert!(!StepStatus::NotStarted.can_transition_to(StepStatus::Compensated));
        assert!(!StepStatus::Failed.can_transition_to(StepStatus::Compensating));
        assert!(!StepStatus::Compensated.can_transition_to(StepStatus::Succeeded));
    }

    #[test]
    fn test_string_roundtrip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<SagaStatus>().unwrap(), status);
        }
        assert!("running".parse::<SagaStatus>().is_err());
        assert_eq!(
            "COMPENSATING".parse::<StepStatus>().unwrap(),
            StepStatus::Compensating
        );
    }

    #[test]
    fn test_serialization_matches_storage_names() {
        let json = serde_json::to_string(&SagaStatus::Compensated).unwrap();
        assert_eq!(json, "\"COMPENSATED\"");
        let json = serde_json::to_string(&StepStatus::NotStarted).unwrap();
        assert_eq!(json, "\"NOT_STARTED\"");
    }
}
