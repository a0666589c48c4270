use serde::{Serialize, Serializer};
use serde_json::{Value, json};

use crate::error::ReservationError;

/// Handler response: a status code and a JSON body.
///
/// Serialized the way a function gateway expects it, with the body
/// JSON-encoded as a string: `{"statusCode": 200, "body": "{...}"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub status_code: u16,
    #[serde(serialize_with = "encode_body")]
    pub body: Value,
}

impl Envelope {
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    pub fn from_error(error: &ReservationError) -> Self {
        Self {
            status_code: error.status_code(),
            body: json!({
                "message": error.to_string(),
                "errorType": error.error_type(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

impl From<Result<Value, ReservationError>> for Envelope {
    fn from(result: Result<Value, ReservationError>) -> Self {
        match result {
            Ok(body) => Envelope::ok(body),
            Err(e) => Envelope::from_error(&e),
        }
    }
}

fn encode_body<S: Serializer>(body: &Value, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&body.to_string())
}
