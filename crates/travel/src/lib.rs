//! Travel reservation services and the `TravelBooking` saga.
//!
//! Each leaf service (flight, hotel, car) accepts a JSON request, either raw
//! or wrapped by an HTTP gateway, and answers with a `{statusCode, body}`
//! envelope. Reservations are upserts keyed by the caller-supplied id, so a
//! retried request never creates a second record.
//!
//! [`booking`] wires the three services into a three-step saga:
//! flight, then hotel, then car, each compensated by its cancel handler.

pub mod booking;
pub mod envelope;
pub mod error;
pub mod invocation;
pub mod service;
pub mod steps;
pub mod table;

pub use booking::{StepSettings, TRAVEL_BOOKING, TravelServices, register_travel_booking};
pub use envelope::Envelope;
pub use error::{ReservationError, TableError};
pub use invocation::Invocation;
pub use service::{ReservationService, ServiceKind};
pub use steps::ReservationStep;
pub use table::{
    InMemoryReservationTable, ReservationItem, ReservationStatus, ReservationTable, UpsertOutcome,
};
