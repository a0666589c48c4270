//! Scriptable step actions for exercising the engine.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::action::{StepAction, StepExecutionError, StepInvocation};

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Forward { step: String, key: String },
    Compensate { step: String, key: String },
}

/// Shared, ordered log of invocations across several actions.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Step names of forward invocations, in call order.
    pub fn forwards(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                Call::Forward { step, .. } => Some(step.clone()),
                Call::Compensate { .. } => None,
            })
            .collect()
    }

    /// Step names of compensating invocations, in call order.
    pub fn compensations(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                Call::Compensate { step, .. } => Some(step.clone()),
                Call::Forward { .. } => None,
            })
            .collect()
    }
}

/// Pauses a forward invocation until the test lets it go.
#[derive(Debug, Clone, Default)]
pub struct StepGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl StepGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the gated invocation has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// A step action whose outcomes are scripted ahead of time.
///
/// Queued outcomes are consumed one per invocation; once a queue is empty the
/// standing outcome applies (success unless `always_fail_*` was set). The
/// default forward result is `{"step": <name>, "key": <idempotency key>}`.
#[derive(Debug)]
pub struct ScriptedAction {
    name: String,
    journal: CallJournal,
    forward_script: Mutex<VecDeque<Result<Value, StepExecutionError>>>,
    compensate_script: Mutex<VecDeque<Result<(), StepExecutionError>>>,
    forward_failure: Option<StepExecutionError>,
    compensate_failure: Option<StepExecutionError>,
    forward_delay: Option<Duration>,
    gate: Option<StepGate>,
}

impl ScriptedAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            journal: CallJournal::new(),
            forward_script: Mutex::new(VecDeque::new()),
            compensate_script: Mutex::new(VecDeque::new()),
            forward_failure: None,
            compensate_failure: None,
            forward_delay: None,
            gate: None,
        }
    }

    pub fn with_journal(mut self, journal: &CallJournal) -> Self {
        self.journal = journal.clone();
        self
    }

    /// Queues the outcome of the next unscripted forward invocation.
    pub fn then_forward(self, outcome: Result<Value, StepExecutionError>) -> Self {
        lock(&self.forward_script).push_back(outcome);
        self
    }

    pub fn then_compensate(self, outcome: Result<(), StepExecutionError>) -> Self {
        lock(&self.compensate_script).push_back(outcome);
        self
    }

    pub fn always_fail_forward(mut self, error: StepExecutionError) -> Self {
        self.forward_failure = Some(error);
        self
    }

    pub fn always_fail_compensate(mut self, error: StepExecutionError) -> Self {
        self.compensate_failure = Some(error);
        self
    }

    /// Sleeps this long inside every forward invocation.
    pub fn with_forward_delay(mut self, delay: Duration) -> Self {
        self.forward_delay = Some(delay);
        self
    }

    pub fn with_gate(mut self, gate: &StepGate) -> Self {
        self.gate = Some(gate.clone());
        self
    }

    pub fn journal(&self) -> &CallJournal {
        &self.journal
    }
}

#[async_trait]
impl StepAction for ScriptedAction {
    async fn forward(&self, invocation: &StepInvocation<'_>) -> Result<Value, StepExecutionError> {
        self.journal.record(Call::Forward {
            step: self.name.clone(),
            key: invocation.idempotency_key.to_string(),
        });

        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if let Some(delay) = self.forward_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.forward_script).pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => match &self.forward_failure {
                Some(error) => Err(error.clone()),
                None => Ok(json!({
                    "step": self.name,
                    "key": invocation.idempotency_key,
                })),
            },
        }
    }

    async fn compensate(
        &self,
        invocation: &StepInvocation<'_>,
        _result: &Value,
    ) -> Result<(), StepExecutionError> {
        self.journal.record(Call::Compensate {
            step: self.name.clone(),
            key: invocation.idempotency_key.to_string(),
        });

        let scripted = lock(&self.compensate_script).pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => match &self.compensate_failure {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            },
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
