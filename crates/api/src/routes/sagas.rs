//! Saga start, query and cancel endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use saga_store::{SagaId, SagaInstance, StepRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Default, Deserialize)]
pub struct StartParams {
    /// Return `202 Accepted` right after creation and drive in the background.
    #[serde(default, rename = "async")]
    pub run_async: bool,
    /// Caller-supplied saga id; generated when absent.
    pub saga_id: Option<String>,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct SagaResponse {
    pub saga_id: String,
    pub definition: String,
    pub status: String,
    pub cancel_requested: bool,
    pub failure_reason: Option<String>,
    pub version: i64,
    pub input: Value,
    pub steps: Vec<StepResponse>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub name: String,
    pub sequence_index: usize,
    pub status: String,
    pub attempt: u32,
    pub last_error: Option<String>,
    pub request: Value,
    pub result: Option<Value>,
}

impl From<&StepRecord> for StepResponse {
    fn from(step: &StepRecord) -> Self {
        Self {
            name: step.step_name().to_string(),
            sequence_index: step.sequence_index(),
            status: step.status().to_string(),
            attempt: step.attempt(),
            last_error: step.last_error().map(str::to_string),
            request: step.request_payload().clone(),
            result: step.result_payload().cloned(),
        }
    }
}

impl From<&SagaInstance> for SagaResponse {
    fn from(saga: &SagaInstance) -> Self {
        Self {
            saga_id: saga.saga_id().to_string(),
            definition: saga.definition_name().to_string(),
            status: saga.status().to_string(),
            cancel_requested: saga.cancel_requested(),
            failure_reason: saga.failure_reason().map(str::to_string),
            version: saga.version().as_i64(),
            input: saga.input().clone(),
            steps: saga.steps().iter().map(StepResponse::from).collect(),
            created_at: saga.created_at().to_rfc3339(),
            updated_at: saga.updated_at().to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /sagas/{definition}: create a saga and drive it.
///
/// The request body is the saga input; an empty body means `{}`.
#[tracing::instrument(skip(state, body))]
pub async fn start(
    State(state): State<Arc<AppState>>,
    Path(definition): Path<String>,
    Query(params): Query<StartParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<SagaResponse>), ApiError> {
    let input = parse_input(&body)?;
    let saga_id = params.saga_id.as_deref().map(parse_saga_id).transpose()?;

    if params.run_async {
        let created = state.engine.create(&definition, saga_id, input).await?;
        let id = created.saga_id();

        let background = state.clone();
        tokio::spawn(async move {
            if let Err(e) = background.engine.run(id).await {
                tracing::error!(saga_id = %id, error = %e, "background saga run failed");
                metrics::counter!("saga_background_failures_total").increment(1);
            }
        });

        return Ok((StatusCode::ACCEPTED, Json(SagaResponse::from(&created))));
    }

    let saga = state.engine.start(&definition, saga_id, input).await?;
    Ok((StatusCode::CREATED, Json(SagaResponse::from(&saga))))
}

/// GET /sagas/{id}: load a saga with its step records.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let saga = state.engine.get(saga_id).await?;
    Ok(Json(SagaResponse::from(&saga)))
}

/// POST /sagas/{id}/cancel: request operator cancellation.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let saga = state.engine.cancel(saga_id).await?;
    Ok(Json(SagaResponse::from(&saga)))
}

fn parse_saga_id(id: &str) -> Result<SagaId, ApiError> {
    SagaId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid saga id '{id}': {e}")))
}

fn parse_input(body: &[u8]) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_slice(body) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(ApiError::BadRequest(
            "Saga input must be a JSON object".to_string(),
        )),
        Err(e) => Err(ApiError::BadRequest(format!("Invalid JSON in request body: {e}"))),
    }
}
