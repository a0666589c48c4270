//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::{AppState, SharedStore};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use saga_store::InMemorySagaStore;
use serde_json::{Value, json};
use tower::ServiceExt;
use travel::{StepSettings, TRAVEL_BOOKING};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup_with_state() -> (axum::Router, Arc<AppState>) {
    let store: SharedStore = Arc::new(InMemorySagaStore::new());
    let state = api::create_state(store, StepSettings::default()).unwrap();
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

fn setup() -> axum::Router {
    setup_with_state().0
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn saga_uri() -> String {
    format!("/sagas/{TRAVEL_BOOKING}")
}

#[tokio::test]
async fn test_health_check() {
    let (status, json) = send(&setup(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    send(&app, "POST", &saga_uri(), Some(json!({}))).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("saga_started_total"));
}

#[tokio::test]
async fn test_start_saga_completes() {
    let (app, state) = setup_with_state();

    let (status, json) = send(
        &app,
        "POST",
        &saga_uri(),
        Some(json!({"passengerName": "Jane Doe"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "COMPLETED");
    assert_eq!(json["definition"], TRAVEL_BOOKING);
    let steps = json["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0]["name"], "reserve_flight");
    assert_eq!(steps[2]["name"], "reserve_car");
    assert!(steps.iter().all(|s| s["status"] == "SUCCEEDED"));

    assert_eq!(state.services.car.table().reserved_count(), 1);
}

#[tokio::test]
async fn test_start_saga_with_failing_car_compensates() {
    let (app, state) = setup_with_state();

    let (status, json) = send(&app, "POST", &saga_uri(), Some(json!({"failBookCar": true}))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "COMPENSATED");
    assert_eq!(json["steps"][0]["status"], "COMPENSATED");
    assert_eq!(json["steps"][1]["status"], "COMPENSATED");
    assert_eq!(json["steps"][2]["status"], "FAILED");
    assert!(json["failure_reason"].as_str().is_some());

    assert_eq!(state.services.flight.table().reserved_count(), 0);
    assert_eq!(state.services.hotel.table().reserved_count(), 0);
    assert_eq!(state.services.car.table().item_count(), 0);
}

#[tokio::test]
async fn test_start_saga_without_body() {
    let (status, json) = send(&setup(), "POST", &saga_uri(), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "COMPLETED");
}

#[tokio::test]
async fn test_unknown_definition() {
    let (status, json) = send(&setup(), "POST", "/sagas/NoSuchSaga", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("NoSuchSaga"));
}

#[tokio::test]
async fn test_duplicate_saga_id_conflicts() {
    let app = setup();
    let id = uuid::Uuid::new_v4();
    let uri = format!("{}?saga_id={id}", saga_uri());

    let (first, json) = send(&app, "POST", &uri, Some(json!({}))).await;
    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(json["saga_id"], id.to_string());

    let (second, _) = send(&app, "POST", &uri, Some(json!({}))).await;
    assert_eq!(second, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_get_saga() {
    let app = setup();
    let (_, created) = send(&app, "POST", &saga_uri(), Some(json!({}))).await;
    let id = created["saga_id"].as_str().unwrap();

    let (status, json) = send(&app, "GET", &format!("/sagas/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["saga_id"], id);
    assert_eq!(json["status"], "COMPLETED");
    assert_eq!(json["steps"][0]["attempt"], 1);
}

#[tokio::test]
async fn test_get_nonexistent_saga() {
    let uri = format!("/sagas/{}", uuid::Uuid::new_v4());
    let (status, _) = send(&setup(), "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_saga_id_format() {
    let (status, _) = send(&setup(), "GET", "/sagas/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_async_start_returns_accepted() {
    let app = setup();

    let (status, json) = send(&app, "POST", &format!("{}?async=true", saga_uri()), Some(json!({}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "PENDING");
    let uri = format!("/sagas/{}", json["saga_id"].as_str().unwrap());

    let mut last = Value::Null;
    for _ in 0..100 {
        let (_, saga) = send(&app, "GET", &uri, None).await;
        if saga["status"] == "COMPLETED" {
            return;
        }
        last = saga;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("saga never completed: {last}");
}

#[tokio::test]
async fn test_cancel_pending_saga() {
    let (app, state) = setup_with_state();
    let created = state
        .engine
        .create(TRAVEL_BOOKING, None, json!({}))
        .await
        .unwrap();
    let id = created.saga_id();

    let (status, json) = send(&app, "POST", &format!("/sagas/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cancel_requested"], true);

    let finished = state.engine.run(id).await.unwrap();
    assert_eq!(finished.status().as_str(), "COMPENSATED");
    assert_eq!(state.services.flight.table().item_count(), 0);
}

#[tokio::test]
async fn test_cancel_completed_saga_conflicts() {
    let app = setup();
    let (_, created) = send(&app, "POST", &saga_uri(), Some(json!({}))).await;
    let id = created["saga_id"].as_str().unwrap();

    let (status, json) = send(&app, "POST", &format!("/sagas/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("COMPLETED"));
}

#[tokio::test]
async fn test_reserve_car() {
    let (app, state) = setup_with_state();

    let (status, json) = send(
        &app,
        "POST",
        "/reservations/car",
        Some(json!({"driverName": "Jane Doe", "carType": "SUV"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "RESERVED");
    assert_eq!(json["message"], "Car reserved successfully");
    assert_eq!(state.services.car.table().item_count(), 1);
}

#[tokio::test]
async fn test_reserve_car_errors() {
    let (app, state) = setup_with_state();

    let (status, json) = send(
        &app,
        "POST",
        "/reservations/car",
        Some(json!({"driverName": "Jane Doe", "carType": "SUV", "failBookCar": true})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["errorType"], "SimulatedFailure");

    let (status, json) = send(&app, "POST", "/reservations/car", Some(json!({"carType": "SUV"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["message"], "Missing required fields: driverName");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/reservations/car")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(state.services.car.table().item_count(), 0);
}

#[tokio::test]
async fn test_reserve_and_cancel_hotel() {
    let (app, state) = setup_with_state();
    let request = json!({"reservationId": "H-1", "guestName": "Jane Doe", "hotelName": "Grand Hotel"});

    for _ in 0..2 {
        let (status, _) = send(&app, "POST", "/reservations/hotel", Some(request.clone())).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(state.services.hotel.table().item_count(), 1);

    let (status, json) = send(
        &app,
        "POST",
        "/reservations/hotel/cancel",
        Some(json!({"reservationId": "H-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "CANCELLED");

    let (status, json) = send(
        &app,
        "POST",
        "/reservations/hotel/cancel",
        Some(json!({"reservationId": "H-2"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["errorType"], "NotFound");
}

#[tokio::test]
async fn test_unknown_reservation_service() {
    let (status, json) = send(&setup(), "POST", "/reservations/boat", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("boat"));
}

#[tokio::test]
async fn test_gateway_wrapped_reservation_event() {
    let (app, state) = setup_with_state();
    let event = json!({
        "body": json!({"rentalId": "R-9", "driverName": "Jane Doe", "carType": "SUV"}).to_string(),
        "headers": {}
    });

    let (status, json) = send(&app, "POST", "/reservations/car", Some(event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["rentalId"], "R-9");

    let (status, _) = send(
        &app,
        "POST",
        "/reservations/car/cancel",
        Some(json!({"rentalId": "R-9"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(
        &app,
        "POST",
        "/reservations/car",
        Some(json!({"rentalId": "R-9", "driverName": "Jane Doe", "carType": "SUV"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["errorType"], "AlreadyCancelled");
    assert_eq!(state.services.car.table().reserved_count(), 0);
}
