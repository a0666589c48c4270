//! HTTP API server for the saga coordinator.
//!
//! Provides REST endpoints to start, query and cancel sagas and to call the
//! travel reservation handlers directly, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{DefinitionError, SagaEngine, SagaRegistry};
use saga_store::SagaStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use travel::{InMemoryReservationTable, StepSettings, TravelServices, register_travel_booking};

/// Saga store chosen at startup: PostgreSQL or in-memory.
pub type SharedStore = Arc<dyn SagaStore>;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub engine: SagaEngine<SharedStore>,
    pub services: TravelServices<InMemoryReservationTable>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        // One parameter name per segment: POST takes a definition name, GET a saga id.
        .route(
            "/sagas/{key}",
            post(routes::sagas::start).get(routes::sagas::get),
        )
        .route("/sagas/{key}/cancel", post(routes::sagas::cancel))
        .route("/reservations/{service}", post(routes::reservations::reserve))
        .route(
            "/reservations/{service}/cancel",
            post(routes::reservations::cancel),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state: in-memory reservation tables and the
/// `TravelBooking` saga registered over them.
pub fn create_state(
    store: SharedStore,
    settings: StepSettings,
) -> Result<Arc<AppState>, DefinitionError> {
    let services = TravelServices::in_memory();
    let mut registry = SagaRegistry::new();
    register_travel_booking(&mut registry, &services, settings)?;

    Ok(Arc::new(AppState {
        engine: SagaEngine::new(store, registry),
        services,
    }))
}
