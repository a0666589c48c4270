//! Saga definitions and the process-wide registry.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use common::SagaId;
use serde_json::Value;

use crate::action::StepAction;
use crate::error::DefinitionError;
use crate::retry::RetryPolicy;

/// Derives the idempotency key of a step from the saga id and step name.
pub type IdempotencyKeyFn = Arc<dyn Fn(SagaId, &str) -> String + Send + Sync>;

/// Maps the saga input to one step's request payload.
pub type PayloadMapper = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Default per-invocation timeout for a step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// One step of a saga: a forward action, its compensation and how to call them.
#[derive(Clone)]
pub struct StepDefinition {
    name: String,
    action: Arc<dyn StepAction>,
    idempotency_key: IdempotencyKeyFn,
    payload_mapper: PayloadMapper,
    retry_policy: RetryPolicy,
    timeout: Duration,
    idempotent: bool,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        Self::from_arc(name, Arc::new(action))
    }

    pub fn from_arc(name: impl Into<String>, action: Arc<dyn StepAction>) -> Self {
        Self {
            name: name.into(),
            action,
            idempotency_key: Arc::new(|saga_id: SagaId, step_name: &str| {
                format!("{saga_id}:{step_name}")
            }),
            payload_mapper: Arc::new(Value::clone),
            retry_policy: RetryPolicy::default(),
            timeout: DEFAULT_STEP_TIMEOUT,
            idempotent: true,
        }
    }

    pub fn with_idempotency_key(
        mut self,
        key: impl Fn(SagaId, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.idempotency_key = Arc::new(key);
        self
    }

    pub fn with_payload_mapper(mut self, mapper: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.payload_mapper = Arc::new(mapper);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Marks whether repeating a timed-out invocation is safe.
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &dyn StepAction {
        self.action.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    /// Key the step's action is invoked with; stable for a given saga.
    pub fn idempotency_key_for(&self, saga_id: SagaId) -> String {
        (self.idempotency_key)(saga_id, &self.name)
    }

    pub fn request_payload(&self, input: &Value) -> Value {
        (self.payload_mapper)(input)
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("retry_policy", &self.retry_policy)
            .field("timeout", &self.timeout)
            .field("idempotent", &self.idempotent)
            .finish_non_exhaustive()
    }
}

/// A named, ordered list of steps. Immutable once registered.
#[derive(Debug)]
pub struct SagaDefinition {
    name: String,
    steps: Vec<StepDefinition>,
}

impl SagaDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in execution order; a step's position is its sequence index.
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&StepDefinition> {
        self.steps.get(index)
    }
}

/// Registry of saga definitions, keyed by name.
#[derive(Debug, Default)]
pub struct SagaRegistry {
    definitions: HashMap<String, Arc<SagaDefinition>>,
}

impl SagaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        steps: Vec<StepDefinition>,
    ) -> Result<Arc<SagaDefinition>, DefinitionError> {
        let name = name.into();

        if self.definitions.contains_key(&name) {
            return Err(DefinitionError::DuplicateDefinition(name));
        }
        if steps.is_empty() {
            return Err(DefinitionError::Empty(name));
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name()) {
                return Err(DefinitionError::DuplicateStep {
                    definition: name,
                    step: step.name().to_string(),
                });
            }
        }

        let definition = Arc::new(SagaDefinition {
            name: name.clone(),
            steps,
        });
        self.definitions.insert(name, definition.clone());
        Ok(definition)
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<SagaDefinition>, DefinitionError> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| DefinitionError::UnknownDefinition(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAction;
    use serde_json::json;

    fn step(name: &str) -> StepDefinition {
        StepDefinition::new(name, ScriptedAction::new(name))
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = SagaRegistry::new();
        registry
            .register("TravelBooking", vec![step("a"), step("b")])
            .unwrap();

        let definition = registry.lookup("TravelBooking").unwrap();
        assert_eq!(definition.name(), "TravelBooking");
        let names: Vec<_> = definition.steps().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn duplicate_definition_is_rejected() {
        let mut registry = SagaRegistry::new();
        registry.register("X", vec![step("a")]).unwrap();
        assert_eq!(
            registry.register("X", vec![step("a")]).unwrap_err(),
            DefinitionError::DuplicateDefinition("X".to_string())
        );
    }

    #[test]
    fn empty_definition_is_rejected() {
        let mut registry = SagaRegistry::new();
        assert_eq!(
            registry.register("X", vec![]).unwrap_err(),
            DefinitionError::Empty("X".to_string())
        );
    }

    #[test]
    fn duplicate_step_name_is_rejected() {
        let mut registry = SagaRegistry::new();
        let err = registry
            .register("X", vec![step("a"), step("b"), step("a")])
            .unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateStep { step, .. } if step == "a"));
        assert!(registry.lookup("X").is_err());
    }

    #[test]
    fn unknown_definition() {
        let registry = SagaRegistry::new();
        assert_eq!(
            registry.lookup("Nope").unwrap_err(),
            DefinitionError::UnknownDefinition("Nope".to_string())
        );
    }

    #[test]
    fn default_key_and_payload() {
        let saga_id = SagaId::new();
        let definition = step("reserve_car");
        assert_eq!(
            definition.idempotency_key_for(saga_id),
            format!("{saga_id}:reserve_car")
        );
        let input = json!({"driverName": "Jane"});
        assert_eq!(definition.request_payload(&input), input);
    }

    #[test]
    fn custom_key_and_payload() {
        let definition = step("reserve_car")
            .with_idempotency_key(|_, step| format!("fixed-{step}"))
            .with_payload_mapper(|input| json!({"driver": input["driverName"]}));

        assert_eq!(definition.idempotency_key_for(SagaId::new()), "fixed-reserve_car");
        assert_eq!(
            definition.request_payload(&json!({"driverName": "Jane"})),
            json!({"driver": "Jane"})
        );
    }
}
