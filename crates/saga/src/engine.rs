//! Saga execution engine: drives instances forward and compensates on failure.

use std::sync::Arc;
use std::time::Instant;

use common::SagaId;
use futures_util::StreamExt;
use saga_store::{SagaInstance, SagaStatus, SagaStore, SagaStoreError, SagaStoreExt, StepRecord};
use serde_json::Value;

use crate::action::StepInvocation;
use crate::definition::{SagaDefinition, SagaRegistry};
use crate::error::{Result, SagaError};
use crate::retry::invoke_with_retry;

/// Failure reason recorded when an operator cancellation triggers compensation.
pub const CANCELLED_BY_OPERATOR: &str = "cancelled by operator";

const CANCEL_SAVE_ATTEMPTS: u32 = 3;

/// Outcome of a crash-recovery sweep.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Sagas driven to a terminal state by this sweep.
    pub resumed: Vec<SagaId>,
    /// Sagas the sweep could not finish. `None` when the store failed to load
    /// an entry at all.
    pub failed: Vec<(Option<SagaId>, SagaError)>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives saga instances through their definitions.
///
/// Forward steps run in ascending sequence order. The first step failure (or
/// an operator cancellation) switches the saga to compensation, which undoes
/// succeeded steps in strictly descending order. Every transition is saved
/// before the next invocation, so a crashed drive can be resumed from the
/// store.
pub struct SagaEngine<S: SagaStore> {
    store: S,
    registry: Arc<SagaRegistry>,
}

impl<S: SagaStore + Clone> Clone for SagaEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<S: SagaStore> SagaEngine<S> {
    pub fn new(store: S, registry: SagaRegistry) -> Self {
        Self::with_shared_registry(store, Arc::new(registry))
    }

    pub fn with_shared_registry(store: S, registry: Arc<SagaRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &SagaRegistry {
        &self.registry
    }

    /// Creates a saga and drives it to a terminal state.
    ///
    /// Step failures are not errors: the returned instance is `Compensated`
    /// (or `Failed` if compensation got stuck).
    pub async fn start(
        &self,
        definition_name: &str,
        saga_id: Option<SagaId>,
        input: Value,
    ) -> Result<SagaInstance> {
        let instance = self.create(definition_name, saga_id, input).await?;
        self.run(instance.saga_id()).await
    }

    /// Persists a new `Pending` instance with one unstarted record per step.
    #[tracing::instrument(skip(self, input))]
    pub async fn create(
        &self,
        definition_name: &str,
        saga_id: Option<SagaId>,
        input: Value,
    ) -> Result<SagaInstance> {
        let definition = self.registry.lookup(definition_name)?;
        let saga_id = saga_id.unwrap_or_default();

        if self.store.exists(saga_id).await? {
            return Err(SagaError::AlreadyExists(saga_id));
        }

        let steps = definition
            .steps()
            .iter()
            .enumerate()
            .map(|(index, step)| StepRecord::new(step.name(), index, step.request_payload(&input)))
            .collect();

        let mut instance = SagaInstance::new(saga_id, definition.name(), input, steps);
        match self.store.persist(&mut instance).await {
            Ok(()) => {}
            // Lost a race against another create with the same id.
            Err(SagaStoreError::ConcurrentModification { .. }) => {
                return Err(SagaError::AlreadyExists(saga_id));
            }
            Err(e) => return Err(e.into()),
        }

        metrics::counter!("saga_started_total", "definition" => definition.name().to_string())
            .increment(1);
        tracing::info!(%saga_id, definition = definition.name(), "saga created");
        Ok(instance)
    }

    /// Drives a created saga to a terminal state.
    ///
    /// Accepts `Pending`, `Running` and `Compensating` instances.
    pub async fn run(&self, saga_id: SagaId) -> Result<SagaInstance> {
        let mut instance = self.store.load(saga_id).await?;

        match instance.status() {
            SagaStatus::Pending => {
                instance.transition(SagaStatus::Running)?;
                self.save(&mut instance).await?;
            }
            SagaStatus::Running | SagaStatus::Compensating => {}
            status => {
                return Err(SagaError::InvalidState {
                    saga_id,
                    status,
                    operation: "run",
                });
            }
        }

        self.drive(instance).await
    }

    /// Continues a `Running` or `Compensating` saga from its persisted records.
    ///
    /// Succeeded steps are never re-executed.
    pub async fn resume(&self, saga_id: SagaId) -> Result<SagaInstance> {
        let instance = self.store.load(saga_id).await?;
        if !instance.status().is_runnable() {
            return Err(SagaError::InvalidState {
                saga_id,
                status: instance.status(),
                operation: "resume",
            });
        }
        tracing::info!(%saga_id, status = %instance.status(), "resuming saga");
        self.drive(instance).await
    }

    /// Resumes every saga left `Running` or `Compensating`, e.g. after a crash.
    ///
    /// A saga that cannot be finished is reported and the sweep moves on.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut runnable = self.store.list_runnable().await?;

        while let Some(next) = runnable.next().await {
            let instance = match next {
                Ok(instance) => instance,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load saga during recovery");
                    report.failed.push((None, e.into()));
                    continue;
                }
            };

            let saga_id = instance.saga_id();
            match self.drive(instance).await {
                Ok(done) => {
                    tracing::info!(%saga_id, status = %done.status(), "saga recovered");
                    report.resumed.push(saga_id);
                }
                Err(e) => {
                    tracing::error!(%saga_id, error = %e, "saga recovery failed");
                    report.failed.push((Some(saga_id), e));
                }
            }
        }

        metrics::counter!("saga_recovered_total").increment(report.resumed.len() as u64);
        tracing::info!(
            resumed = report.resumed.len(),
            failed = report.failed.len(),
            "recovery sweep finished"
        );
        Ok(report)
    }

    /// Requests cancellation of a `Pending` or `Running` saga.
    ///
    /// Only the flag is written; the worker driving the saga notices it before
    /// its next forward step and compensates. Repeating the request is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, saga_id: SagaId) -> Result<SagaInstance> {
        let mut attempt = 1;
        loop {
            let mut instance = self.store.load(saga_id).await?;

            if !instance.status().can_cancel() {
                return Err(SagaError::InvalidState {
                    saga_id,
                    status: instance.status(),
                    operation: "cancel",
                });
            }
            if instance.cancel_requested() {
                return Ok(instance);
            }

            instance.request_cancel()?;
            match self.store.persist(&mut instance).await {
                Ok(()) => {
                    metrics::counter!("saga_cancel_requests_total").increment(1);
                    tracing::info!(%saga_id, "saga cancellation requested");
                    return Ok(instance);
                }
                Err(SagaStoreError::ConcurrentModification { .. })
                    if attempt < CANCEL_SAVE_ATTEMPTS =>
                {
                    tracing::debug!(%saga_id, attempt, "cancel raced with a save, reloading");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Loads a saga in any state.
    pub async fn get(&self, saga_id: SagaId) -> Result<SagaInstance> {
        Ok(self.store.load(saga_id).await?)
    }

    #[tracing::instrument(
        skip(self, instance),
        fields(saga_id = %instance.saga_id(), definition = instance.definition_name())
    )]
    async fn drive(&self, mut instance: SagaInstance) -> Result<SagaInstance> {
        let saga_start = Instant::now();
        let definition = self.registry.lookup(instance.definition_name())?;

        if definition.steps().len() != instance.steps().len() {
            return Err(SagaError::DefinitionMismatch {
                saga_id: instance.saga_id(),
                definition: definition.name().to_string(),
                records: instance.steps().len(),
                steps: definition.steps().len(),
            });
        }

        if instance.status() == SagaStatus::Running {
            self.run_forward(&mut instance, &definition).await?;
        }
        if instance.status() == SagaStatus::Compensating {
            self.run_compensation(&mut instance, &definition).await?;
        }

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        match instance.status() {
            SagaStatus::Completed => {
                metrics::counter!("saga_completed_total").increment(1);
                tracing::info!(duration, "saga completed successfully");
            }
            SagaStatus::Compensated => {
                metrics::counter!("saga_compensated_total").increment(1);
                tracing::warn!(
                    duration,
                    reason = instance.failure_reason().unwrap_or("unknown"),
                    "saga compensated"
                );
            }
            SagaStatus::Failed => {
                metrics::counter!("saga_failed_total").increment(1);
                tracing::error!(
                    duration,
                    reason = instance.failure_reason().unwrap_or("unknown"),
                    "saga failed"
                );
            }
            _ => {}
        }

        Ok(instance)
    }

    async fn run_forward(
        &self,
        instance: &mut SagaInstance,
        definition: &SagaDefinition,
    ) -> Result<()> {
        let saga_id = instance.saga_id();

        while let Some(index) = instance.next_pending_step() {
            self.absorb_cancel(instance).await?;
            if instance.cancel_requested() {
                tracing::info!(%saga_id, "cancellation observed, compensating");
                instance.set_failure_reason(CANCELLED_BY_OPERATOR)?;
                instance.transition(SagaStatus::Compensating)?;
                self.save(instance).await?;
                return Ok(());
            }

            let Some(step) = definition.step(index) else {
                break;
            };
            let key = step.idempotency_key_for(saga_id);
            let payload = instance.steps()[index].request_payload().clone();

            tracing::info!(step = step.name(), "saga step started");
            let attempted = invoke_with_retry(
                step.name(),
                step.retry_policy(),
                step.timeout(),
                step.is_idempotent(),
                |attempt| {
                    let invocation = StepInvocation {
                        saga_id,
                        step_name: step.name(),
                        idempotency_key: &key,
                        payload: &payload,
                        attempt,
                    };
                    async move { step.action().forward(&invocation).await }
                },
            )
            .await;

            instance.record_attempts(index, attempted.attempts)?;
            match attempted.outcome {
                Ok(result) => {
                    instance.mark_step_succeeded(index, result)?;
                    self.save(instance).await?;
                    tracing::info!(step = step.name(), attempts = attempted.attempts, "saga step succeeded");
                }
                Err(err) => {
                    tracing::warn!(
                        step = step.name(),
                        attempts = attempted.attempts,
                        kind = %err.kind,
                        error = %err,
                        "saga step failed"
                    );
                    instance.mark_step_failed(index, err.to_string())?;
                    instance.set_failure_reason(format!("step '{}' failed: {}", step.name(), err.message))?;
                    instance.transition(SagaStatus::Compensating)?;
                    self.save(instance).await?;
                    return Ok(());
                }
            }
        }

        instance.transition(SagaStatus::Completed)?;
        self.save(instance).await
    }

    async fn run_compensation(
        &self,
        instance: &mut SagaInstance,
        definition: &SagaDefinition,
    ) -> Result<()> {
        let saga_id = instance.saga_id();
        let mut stuck = Vec::new();

        for index in instance.compensation_order() {
            let Some(step) = definition.step(index) else {
                continue;
            };

            instance.mark_step_compensating(index)?;
            self.save(instance).await?;

            let key = step.idempotency_key_for(saga_id);
            let record = &instance.steps()[index];
            let payload = record.request_payload().clone();
            let result = record.result_payload().cloned().unwrap_or(Value::Null);

            tracing::info!(step = step.name(), "compensating step");
            let attempted = invoke_with_retry(
                step.name(),
                step.retry_policy(),
                step.timeout(),
                step.is_idempotent(),
                |attempt| {
                    let invocation = StepInvocation {
                        saga_id,
                        step_name: step.name(),
                        idempotency_key: &key,
                        payload: &payload,
                        attempt,
                    };
                    let result = &result;
                    async move { step.action().compensate(&invocation, result).await }
                },
            )
            .await;

            instance.record_attempts(index, attempted.attempts)?;
            match attempted.outcome {
                Ok(()) => {
                    instance.mark_step_compensated(index)?;
                    tracing::info!(step = step.name(), "step compensated");
                }
                Err(err) => {
                    // Left in Compensating for an operator to resolve.
                    tracing::error!(
                        step = step.name(),
                        attempts = attempted.attempts,
                        error = %err,
                        "compensation exhausted"
                    );
                    instance.record_step_error(index, err.to_string())?;
                    stuck.push(step.name().to_string());
                }
            }
            self.save(instance).await?;
        }

        if stuck.is_empty() {
            instance.transition(SagaStatus::Compensated)?;
        } else {
            let poisoned = SagaError::PoisonedCompensation {
                saga_id,
                steps: stuck,
            };
            instance.set_failure_reason(poisoned.to_string())?;
            instance.transition(SagaStatus::Failed)?;
        }
        self.save(instance).await
    }

    /// Saves the instance. A conflict caused only by a concurrent cancellation
    /// request is absorbed and the save retried once; any other conflict
    /// aborts the drive.
    async fn save(&self, instance: &mut SagaInstance) -> Result<()> {
        match self.store.persist(instance).await {
            Ok(()) => Ok(()),
            Err(SagaStoreError::ConcurrentModification { .. }) => {
                self.absorb_cancel(instance).await?;
                self.store.persist(instance).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Picks up a cancellation saved by `cancel` since this copy was read.
    ///
    /// Returns `false` when the stored copy has not moved. Any other foreign
    /// write means a second worker is driving the saga.
    async fn absorb_cancel(&self, instance: &mut SagaInstance) -> Result<bool> {
        let stored = self.store.load(instance.saga_id()).await?;
        if stored.version() == instance.version() {
            return Ok(false);
        }

        let only_cancelled = stored.cancel_requested()
            && !instance.cancel_requested()
            && stored.version() == instance.version().next();
        if !only_cancelled {
            return Err(SagaError::ConcurrentModification {
                saga_id: instance.saga_id(),
                expected: instance.version(),
                actual: stored.version(),
            });
        }

        if instance.status().can_cancel() {
            instance.request_cancel()?;
        }
        instance.set_version(stored.version());
        tracing::debug!(saga_id = %instance.saga_id(), "absorbed cancellation request");
        Ok(true)
    }
}
