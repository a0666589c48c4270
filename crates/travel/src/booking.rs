//! The `TravelBooking` saga: flight, then hotel, then car.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use saga::definition::DEFAULT_STEP_TIMEOUT;
use saga::{DefinitionError, RetryPolicy, SagaDefinition, SagaRegistry, StepDefinition};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::service::{ReservationService, ServiceKind};
use crate::steps::ReservationStep;
use crate::table::{InMemoryReservationTable, ReservationTable};

pub const TRAVEL_BOOKING: &str = "TravelBooking";

pub const RESERVE_FLIGHT: &str = "reserve_flight";
pub const RESERVE_HOTEL: &str = "reserve_hotel";
pub const RESERVE_CAR: &str = "reserve_car";

const DEFAULT_NAME: &str = "John Doe";
const DEFAULT_FLIGHT_PRICE: f64 = 299.99;
const DEFAULT_HOTEL_PRICE: f64 = 199.99;
const DEFAULT_CAR_PRICE: f64 = 89.99;

/// Invocation settings applied to every step of the saga.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSettings {
    pub timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_STEP_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// The three leaf services the saga drives.
#[derive(Debug, Clone)]
pub struct TravelServices<T: ReservationTable> {
    pub flight: ReservationService<T>,
    pub hotel: ReservationService<T>,
    pub car: ReservationService<T>,
}

impl<T: ReservationTable> TravelServices<T> {
    pub fn new(flight: T, hotel: T, car: T) -> Self {
        Self {
            flight: ReservationService::new(ServiceKind::Flight, flight),
            hotel: ReservationService::new(ServiceKind::Hotel, hotel),
            car: ReservationService::new(ServiceKind::Car, car),
        }
    }

    pub fn service(&self, kind: ServiceKind) -> &ReservationService<T> {
        match kind {
            ServiceKind::Flight => &self.flight,
            ServiceKind::Hotel => &self.hotel,
            ServiceKind::Car => &self.car,
        }
    }
}

impl TravelServices<InMemoryReservationTable> {
    /// Services over fresh in-memory tables, one per service.
    pub fn in_memory() -> Self {
        Self::new(
            InMemoryReservationTable::new(),
            InMemoryReservationTable::new(),
            InMemoryReservationTable::new(),
        )
    }
}

/// Registers `TravelBooking` over `services`.
pub fn register_travel_booking<T>(
    registry: &mut SagaRegistry,
    services: &TravelServices<T>,
    settings: StepSettings,
) -> Result<Arc<SagaDefinition>, DefinitionError>
where
    T: ReservationTable + Clone + 'static,
{
    let step = |name: &str, service: &ReservationService<T>, mapper: fn(&Value) -> Value| {
        StepDefinition::new(name, ReservationStep::new(service.clone()))
            .with_payload_mapper(mapper)
            .with_retry_policy(settings.retry_policy)
            .with_timeout(settings.timeout)
    };

    registry.register(
        TRAVEL_BOOKING,
        vec![
            step(RESERVE_FLIGHT, &services.flight, flight_request),
            step(RESERVE_HOTEL, &services.hotel, hotel_request),
            step(RESERVE_CAR, &services.car, car_request),
        ],
    )
}

/// Builds the flight request from the saga input, filling defaults.
pub fn flight_request(input: &Value) -> Value {
    let fields = fields(input);
    let flight_number = format!(
        "FL{}",
        Uuid::new_v4().simple().to_string()[..6].to_uppercase()
    );
    json!({
        "bookingId": Uuid::new_v4().to_string(),
        "passengerName": text(fields, "passengerName", DEFAULT_NAME),
        "flightNumber": text(fields, "flightNumber", &flight_number),
        "departure": text(fields, "departure", "JFK"),
        "destination": text(fields, "destination", "LAX"),
        "price": number(fields, "flightPrice", DEFAULT_FLIGHT_PRICE),
        "failBookFlight": flag(fields, "failBookFlight"),
    })
}

pub fn hotel_request(input: &Value) -> Value {
    let fields = fields(input);
    let today = today();
    json!({
        "reservationId": Uuid::new_v4().to_string(),
        "guestName": text(fields, "guestName", DEFAULT_NAME),
        "hotelName": text(fields, "hotelName", "Grand Hotel"),
        "roomType": text(fields, "roomType", "Deluxe Suite"),
        "checkIn": text(fields, "checkIn", &today),
        "checkOut": text(fields, "checkOut", &today),
        "price": number(fields, "hotelPrice", DEFAULT_HOTEL_PRICE),
        "failBookHotel": flag(fields, "failBookHotel"),
    })
}

pub fn car_request(input: &Value) -> Value {
    let fields = fields(input);
    let today = today();
    json!({
        "rentalId": Uuid::new_v4().to_string(),
        "driverName": text(fields, "driverName", DEFAULT_NAME),
        "carType": text(fields, "carType", "Sedan"),
        "pickupLocation": text(fields, "pickupLocation", "Airport"),
        "dropoffLocation": text(fields, "dropoffLocation", "Airport"),
        "pickupDate": text(fields, "pickupDate", &today),
        "dropoffDate": text(fields, "dropoffDate", &today),
        "price": number(fields, "carPrice", DEFAULT_CAR_PRICE),
        "failBookCar": flag(fields, "failBookCar"),
    })
}

fn fields(input: &Value) -> Option<&Map<String, Value>> {
    input.as_object()
}

fn present<'a>(fields: Option<&'a Map<String, Value>>, key: &str) -> Option<&'a Value> {
    fields.and_then(|f| f.get(key)).filter(|v| !v.is_null())
}

fn text(fields: Option<&Map<String, Value>>, key: &str, default: &str) -> Value {
    present(fields, key)
        .cloned()
        .unwrap_or_else(|| Value::String(default.to_string()))
}

fn number(fields: Option<&Map<String, Value>>, key: &str, default: f64) -> Value {
    present(fields, key).cloned().unwrap_or_else(|| json!(default))
}

fn flag(fields: Option<&Map<String, Value>>, key: &str) -> bool {
    present(fields, key).and_then(Value::as_bool).unwrap_or(false)
}

fn today() -> String {
    Utc::now().date_naive().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let car = car_request(&json!({}));
        assert_eq!(car["driverName"], "John Doe");
        assert_eq!(car["carType"], "Sedan");
        assert_eq!(car["pickupLocation"], "Airport");
        assert_eq!(car["price"], 89.99);
        assert_eq!(car["failBookCar"], false);
        assert_eq!(car["pickupDate"], today());
        assert!(Uuid::parse_str(car["rentalId"].as_str().unwrap()).is_ok());

        let flight = flight_request(&Value::Null);
        assert_eq!(flight["departure"], "JFK");
        assert_eq!(flight["destination"], "LAX");
        assert_eq!(flight["price"], 299.99);
        let number = flight["flightNumber"].as_str().unwrap();
        assert!(number.starts_with("FL"));
        assert_eq!(number.len(), 8);

        let hotel = hotel_request(&json!({"guestName": null}));
        assert_eq!(hotel["guestName"], "John Doe");
        assert_eq!(hotel["hotelName"], "Grand Hotel");
        assert_eq!(hotel["roomType"], "Deluxe Suite");
        assert_eq!(hotel["price"], 199.99);
    }

    #[test]
    fn input_overrides_defaults() {
        let input = json!({
            "driverName": "Jane Doe",
            "carType": "SUV",
            "carPrice": 120.0,
            "failBookCar": true,
            "hotelName": "Seaside Inn"
        });

        let car = car_request(&input);
        assert_eq!(car["driverName"], "Jane Doe");
        assert_eq!(car["carType"], "SUV");
        assert_eq!(car["price"], 120.0);
        assert_eq!(car["failBookCar"], true);

        let hotel = hotel_request(&input);
        assert_eq!(hotel["hotelName"], "Seaside Inn");
        assert_eq!(hotel["failBookHotel"], false);
    }

    #[test]
    fn registers_three_steps_in_order() {
        let mut registry = SagaRegistry::new();
        let services = TravelServices::in_memory();
        let definition =
            register_travel_booking(&mut registry, &services, StepSettings::default()).unwrap();

        let names: Vec<_> = definition.steps().iter().map(|s| s.name()).collect();
        assert_eq!(names, [RESERVE_FLIGHT, RESERVE_HOTEL, RESERVE_CAR]);
        assert!(registry.lookup(TRAVEL_BOOKING).is_ok());
    }
}
