pub mod health;
pub mod metrics;
pub mod reservations;
pub mod sagas;
