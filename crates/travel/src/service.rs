//! Reserve and cancel handlers for the three travel services.

use std::str::FromStr;

use chrono::Utc;
use common::Money;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::ReservationError;
use crate::invocation::Invocation;
use crate::table::{ReservationItem, ReservationStatus, ReservationTable, UpsertOutcome};

/// Which leaf service a handler serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Flight,
    Hotel,
    Car,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [ServiceKind::Flight, ServiceKind::Hotel, ServiceKind::Car];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Flight => "flight",
            ServiceKind::Hotel => "hotel",
            ServiceKind::Car => "car",
        }
    }

    /// Display name used in response messages.
    pub fn noun(&self) -> &'static str {
        match self {
            ServiceKind::Flight => "Flight",
            ServiceKind::Hotel => "Hotel",
            ServiceKind::Car => "Car",
        }
    }

    /// Request field holding the reservation id (the idempotency key).
    pub fn id_field(&self) -> &'static str {
        match self {
            ServiceKind::Flight => "bookingId",
            ServiceKind::Hotel => "reservationId",
            ServiceKind::Car => "rentalId",
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            ServiceKind::Flight => &["passengerName", "flightNumber"],
            ServiceKind::Hotel => &["guestName", "hotelName"],
            ServiceKind::Car => &["driverName", "carType"],
        }
    }

    /// Descriptive fields stored with the reservation.
    pub fn attribute_fields(&self) -> &'static [&'static str] {
        match self {
            ServiceKind::Flight => &["passengerName", "flightNumber", "departure", "destination"],
            ServiceKind::Hotel => &["guestName", "hotelName", "roomType", "checkIn", "checkOut"],
            ServiceKind::Car => &[
                "driverName",
                "carType",
                "pickupLocation",
                "dropoffLocation",
                "pickupDate",
                "dropoffDate",
            ],
        }
    }

    /// Test-only flag that forces the reservation to fail.
    pub fn fail_flag(&self) -> &'static str {
        match self {
            ServiceKind::Flight => "failBookFlight",
            ServiceKind::Hotel => "failBookHotel",
            ServiceKind::Car => "failBookCar",
        }
    }

    /// Field echoed back in the reserve response.
    pub fn summary_field(&self) -> &'static str {
        match self {
            ServiceKind::Flight => "flightNumber",
            ServiceKind::Hotel => "roomType",
            ServiceKind::Car => "carType",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flight" => Ok(ServiceKind::Flight),
            "hotel" => Ok(ServiceKind::Hotel),
            "car" => Ok(ServiceKind::Car),
            other => Err(format!("unknown reservation service: {other}")),
        }
    }
}

/// Reserve and cancel handlers of one service over its table.
#[derive(Debug, Clone)]
pub struct ReservationService<T: ReservationTable> {
    kind: ServiceKind,
    table: T,
}

impl<T: ReservationTable> ReservationService<T> {
    pub fn new(kind: ServiceKind, table: T) -> Self {
        Self { kind, table }
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    /// Reserve handler: normalizes the request and wraps the outcome.
    pub async fn reserve(&self, invocation: Invocation) -> Envelope {
        let result = match invocation.into_payload() {
            Ok(payload) => self.reserve_item(&payload).await,
            Err(e) => Err(e),
        };
        self.finish("reserve", result)
    }

    /// Cancel handler: normalizes the request and wraps the outcome.
    pub async fn cancel(&self, invocation: Invocation) -> Envelope {
        let result = match invocation.into_payload() {
            Ok(payload) => self.cancel_item(&payload).await,
            Err(e) => Err(e),
        };
        self.finish("cancel", result)
    }

    /// Validates the request and upserts a `RESERVED` item under its id.
    ///
    /// When the failure flag is set nothing is written.
    #[tracing::instrument(skip(self, payload), fields(service = %self.kind))]
    pub async fn reserve_item(&self, payload: &Map<String, Value>) -> Result<Value, ReservationError> {
        let missing: Vec<String> = self
            .kind
            .required_fields()
            .iter()
            .filter(|field| !has_value(payload, field))
            .map(|field| field.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ReservationError::MissingFields(missing));
        }

        if payload.get(self.kind.fail_flag()).and_then(Value::as_bool) == Some(true) {
            tracing::warn!(flag = self.kind.fail_flag(), "simulating reservation failure");
            return Err(ReservationError::SimulatedFailure(format!(
                "Failed to reserve {}",
                self.kind.as_str()
            )));
        }

        let id = match payload.get(self.kind.id_field()) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            None | Some(Value::Null) => Uuid::new_v4().to_string(),
            Some(_) => {
                return Err(ReservationError::InvalidField {
                    field: self.kind.id_field().to_string(),
                    reason: "must be a non-empty string".to_string(),
                });
            }
        };
        let price = parse_price(payload)?;

        let attributes: Map<String, Value> = self
            .kind
            .attribute_fields()
            .iter()
            .filter_map(|field| payload.get(*field).map(|v| (field.to_string(), v.clone())))
            .collect();

        let now = Utc::now();
        let item = ReservationItem {
            id: id.clone(),
            status: ReservationStatus::Reserved,
            price,
            attributes,
            created_at: now,
            updated_at: now,
        };

        let outcome = self
            .table
            .upsert(item)
            .await
            .map_err(|source| ReservationError::Store {
                context: format!("Failed to reserve {}", self.kind.as_str()),
                source,
            })?;
        if outcome == UpsertOutcome::AlreadyCancelled {
            return Err(ReservationError::AlreadyCancelled {
                kind: self.kind.noun(),
                id,
            });
        }

        tracing::info!(%id, "reservation stored");

        let summary = self.kind.summary_field();
        Ok(json!({
            "message": format!("{} reserved successfully", self.kind.noun()),
            self.kind.id_field(): id,
            summary: payload.get(summary).cloned().unwrap_or(Value::Null),
            "status": ReservationStatus::Reserved.as_str(),
            "price": price,
        }))
    }

    /// Marks the reservation `CANCELLED`. Repeating the call is harmless.
    #[tracing::instrument(skip(self, payload), fields(service = %self.kind))]
    pub async fn cancel_item(&self, payload: &Map<String, Value>) -> Result<Value, ReservationError> {
        let id_field = self.kind.id_field();
        let id = match payload.get(id_field) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => return Err(ReservationError::MissingFields(vec![id_field.to_string()])),
        };

        let updated = self
            .table
            .update_status(&id, ReservationStatus::Cancelled)
            .await
            .map_err(|source| ReservationError::Store {
                context: format!("Failed to cancel {}", self.kind.as_str()),
                source,
            })?;

        if updated.is_none() {
            return Err(ReservationError::NotFound {
                kind: self.kind.noun(),
                id,
            });
        }

        tracing::info!(%id, "reservation cancelled");
        Ok(json!({
            "message": format!("{} reservation cancelled successfully", self.kind.noun()),
            id_field: id,
            "status": ReservationStatus::Cancelled.as_str(),
        }))
    }

    fn finish(&self, operation: &'static str, result: Result<Value, ReservationError>) -> Envelope {
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.error_type(),
        };
        metrics::counter!(
            "reservations_total",
            "service" => self.kind.as_str(),
            "operation" => operation,
            "outcome" => outcome
        )
        .increment(1);

        if let Err(e) = &result {
            tracing::warn!(service = %self.kind, operation, error = %e, "reservation request failed");
        }
        Envelope::from(result)
    }
}

fn has_value(payload: &Map<String, Value>, field: &str) -> bool {
    match payload.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn parse_price(payload: &Map<String, Value>) -> Result<Money, ReservationError> {
    let invalid = |reason: &str| ReservationError::InvalidField {
        field: "price".to_string(),
        reason: reason.to_string(),
    };

    match payload.get("price") {
        None | Some(Value::Null) => Ok(Money::zero()),
        Some(Value::Number(n)) => {
            let money = n
                .as_f64()
                .and_then(Money::from_decimal)
                .ok_or_else(|| invalid("must be a finite decimal"))?;
            if money.is_negative() {
                return Err(invalid("must not be negative"));
            }
            Ok(money)
        }
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Money::from_decimal)
            .filter(|m| !m.is_negative())
            .ok_or_else(|| invalid("must be a non-negative decimal")),
        Some(_) => Err(invalid("must be a decimal number")),
    }
}
