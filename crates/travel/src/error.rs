//! Reservation error types.

use saga::{StepErrorKind, StepExecutionError};
use thiserror::Error;

/// Failures of the reservation table collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// The table could not be reached or refused the write.
    #[error("reservation table unavailable: {0}")]
    Unavailable(String),
}

/// Why a reserve or cancel request was not carried out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    /// The request body is not a JSON object.
    #[error("{0}")]
    Malformed(String),

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// A field is present but unusable.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// Forced by the request's failure flag; nothing was written.
    #[error("{0}")]
    SimulatedFailure(String),

    #[error("{kind} reservation {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The id belongs to a cancelled reservation, which cannot be reserved again.
    #[error("{kind} reservation {id} was cancelled")]
    AlreadyCancelled { kind: &'static str, id: String },

    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: TableError,
    },
}

impl ReservationError {
    /// HTTP-style status code carried in the response envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            ReservationError::Malformed(_)
            | ReservationError::MissingFields(_)
            | ReservationError::InvalidField { .. } => 400,
            ReservationError::NotFound { .. } => 404,
            ReservationError::AlreadyCancelled { .. } => 409,
            ReservationError::SimulatedFailure(_) | ReservationError::Store { .. } => 500,
        }
    }

    /// The `errorType` discriminator of the response body.
    pub fn error_type(&self) -> &'static str {
        match self {
            ReservationError::Malformed(_)
            | ReservationError::MissingFields(_)
            | ReservationError::InvalidField { .. } => "ValidationError",
            ReservationError::NotFound { .. } => "NotFound",
            ReservationError::AlreadyCancelled { .. } => "AlreadyCancelled",
            ReservationError::SimulatedFailure(_) => "SimulatedFailure",
            ReservationError::Store { .. } => "StoreError",
        }
    }

    /// Classifies the failure for the saga engine.
    pub fn to_step_error(&self, step_name: &str) -> StepExecutionError {
        let kind = match self {
            ReservationError::Malformed(_)
            | ReservationError::MissingFields(_)
            | ReservationError::InvalidField { .. } => StepErrorKind::Validation,
            ReservationError::SimulatedFailure(_) => StepErrorKind::SimulatedFailure,
            ReservationError::NotFound { .. } | ReservationError::AlreadyCancelled { .. } => {
                StepErrorKind::Rejected
            }
            ReservationError::Store { .. } => StepErrorKind::TransientInfra,
        };
        StepExecutionError::new(step_name, kind, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_message() {
        let err = ReservationError::MissingFields(vec!["driverName".into(), "carType".into()]);
        assert_eq!(err.to_string(), "Missing required fields: driverName, carType");
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_type(), "ValidationError");
    }

    #[test]
    fn step_error_retryability() {
        let store = ReservationError::Store {
            context: "Failed to reserve car".into(),
            source: TableError::Unavailable("throttled".into()),
        };
        assert!(store.to_step_error("reserve_car").retryable);
        assert_eq!(store.status_code(), 500);

        let simulated = ReservationError::SimulatedFailure("Failed to reserve car".into());
        let step_error = simulated.to_step_error("reserve_car");
        assert!(!step_error.retryable);
        assert_eq!(step_error.kind, StepErrorKind::SimulatedFailure);

        let invalid = ReservationError::MissingFields(vec!["driverName".into()]);
        assert!(!invalid.to_step_error("reserve_car").retryable);
    }
}
