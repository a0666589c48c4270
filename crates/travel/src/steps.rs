//! Step action adapters over the reservation services.

use async_trait::async_trait;
use saga::{StepAction, StepExecutionError, StepInvocation};
use serde_json::{Map, Value};

use crate::error::ReservationError;
use crate::service::ReservationService;
use crate::table::ReservationTable;

/// Runs a reservation service as a saga step: reserve forward, cancel to
/// compensate.
///
/// A step payload without a reservation id gets the idempotency key as its
/// id, so retries always target the same record.
#[derive(Debug, Clone)]
pub struct ReservationStep<T: ReservationTable> {
    service: ReservationService<T>,
}

impl<T: ReservationTable> ReservationStep<T> {
    pub fn new(service: ReservationService<T>) -> Self {
        Self { service }
    }

    fn request(&self, invocation: &StepInvocation<'_>) -> Result<Map<String, Value>, StepExecutionError> {
        let Value::Object(mut payload) = invocation.payload.clone() else {
            return Err(StepExecutionError::validation(
                invocation.step_name,
                "step payload must be a JSON object",
            ));
        };
        let id_field = self.service.kind().id_field();
        if payload.get(id_field).is_none_or(Value::is_null) {
            payload.insert(
                id_field.to_string(),
                Value::String(invocation.idempotency_key.to_string()),
            );
        }
        Ok(payload)
    }
}

#[async_trait]
impl<T: ReservationTable> StepAction for ReservationStep<T> {
    async fn forward(&self, invocation: &StepInvocation<'_>) -> Result<Value, StepExecutionError> {
        let payload = self.request(invocation)?;
        self.service
            .reserve_item(&payload)
            .await
            .map_err(|e| e.to_step_error(invocation.step_name))
    }

    async fn compensate(
        &self,
        invocation: &StepInvocation<'_>,
        result: &Value,
    ) -> Result<(), StepExecutionError> {
        let id_field = self.service.kind().id_field();
        let mut payload = Map::new();
        let id = result
            .get(id_field)
            .or_else(|| invocation.payload.get(id_field))
            .cloned()
            .unwrap_or_else(|| Value::String(invocation.idempotency_key.to_string()));
        payload.insert(id_field.to_string(), id);

        match self.service.cancel_item(&payload).await {
            Ok(_) => Ok(()),
            // Nothing was ever stored under this id, so there is nothing to undo.
            Err(ReservationError::NotFound { id, .. }) => {
                tracing::info!(step = invocation.step_name, %id, "no reservation to cancel");
                Ok(())
            }
            Err(e) => Err(e.to_step_error(invocation.step_name)),
        }
    }
}
