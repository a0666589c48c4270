//! Direct access to the reservation handlers.
//!
//! A JSON request body is classified like any incoming event, so both plain
//! requests and gateway-wrapped events (`{"body": "<json string>"}`) are
//! accepted. A body that is not JSON reaches the handler as a raw gateway body
//! and is rejected there as malformed.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::Value;
use travel::{Envelope, Invocation, ServiceKind};

use crate::AppState;
use crate::error::ApiError;

/// POST /reservations/{service}
#[tracing::instrument(skip(state, body))]
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let kind = parse_service(&service)?;
    let envelope = state
        .services
        .service(kind)
        .reserve(to_invocation(&body))
        .await;
    into_response(envelope)
}

/// POST /reservations/{service}/cancel
#[tracing::instrument(skip(state, body))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let kind = parse_service(&service)?;
    let envelope = state
        .services
        .service(kind)
        .cancel(to_invocation(&body))
        .await;
    into_response(envelope)
}

fn parse_service(service: &str) -> Result<ServiceKind, ApiError> {
    service
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Unknown reservation service '{service}'")))
}

fn to_invocation(body: &[u8]) -> Invocation {
    match serde_json::from_slice::<Value>(body) {
        Ok(event) => Invocation::from_event(event),
        Err(_) => Invocation::Gateway {
            body: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_body_classification() {
        assert_eq!(
            to_invocation(br#"{"carType":"SUV"}"#),
            Invocation::Raw(json!({"carType": "SUV"}))
        );
        assert_eq!(
            to_invocation(br#"{"body":"{\"carType\":\"SUV\"}"}"#),
            Invocation::Gateway {
                body: r#"{"carType":"SUV"}"#.to_string()
            }
        );
        assert_eq!(
            to_invocation(b"{not json"),
            Invocation::Gateway {
                body: "{not json".to_string()
            }
        );
    }
}

fn into_response(envelope: Envelope) -> Result<(StatusCode, Json<Value>), ApiError> {
    let status = StatusCode::from_u16(envelope.status_code)
        .map_err(|e| ApiError::Internal(format!("invalid handler status: {e}")))?;
    Ok((status, Json(envelope.body)))
}
