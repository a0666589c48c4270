//! Normalization of incoming requests.

use serde_json::{Map, Value};

use crate::error::ReservationError;

/// A request as it reaches a reservation handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// Invoked directly with the request object.
    Raw(Value),
    /// Invoked through an HTTP gateway; the request is the JSON-encoded body.
    Gateway { body: String },
}

impl Invocation {
    /// Classifies an incoming event.
    ///
    /// An object carrying a string `body` is a gateway event. An object whose
    /// `body` is already decoded is unwrapped to a raw invocation.
    pub fn from_event(event: Value) -> Self {
        match event {
            Value::Object(mut fields) if fields.contains_key("body") => {
                match fields.remove("body") {
                    Some(Value::String(body)) => Invocation::Gateway { body },
                    Some(body) => Invocation::Raw(body),
                    None => Invocation::Raw(Value::Object(fields)),
                }
            }
            other => Invocation::Raw(other),
        }
    }

    /// Resolves the request object, rejecting anything that is not one.
    pub fn into_payload(self) -> Result<Map<String, Value>, ReservationError> {
        let value = match self {
            Invocation::Raw(value) => value,
            Invocation::Gateway { body } => serde_json::from_str(&body).map_err(|e| {
                ReservationError::Malformed(format!("Invalid JSON in request body: {e}"))
            })?,
        };

        match value {
            Value::Object(fields) => Ok(fields),
            other => Err(ReservationError::Malformed(format!(
                "Request body must be a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
