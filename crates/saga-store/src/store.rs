use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{Result, SagaId, SagaInstance, SagaStoreError, Version};

/// A lazy stream of saga instances.
pub type SagaStream = Pin<Box<dyn Stream<Item = Result<SagaInstance>> + Send>>;

/// Core trait for saga store implementations.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Atomically upserts the instance together with all of its step records.
    ///
    /// The stored version must equal `instance.version()` (version 0 means the
    /// saga must not exist yet); otherwise the save fails with
    /// `ConcurrentModification` and nothing is written.
    ///
    /// Returns the new stored version.
    async fn save(&self, instance: &SagaInstance) -> Result<Version>;

    /// Loads an instance with its step records.
    ///
    /// Fails with `NotFound` if the saga does not exist.
    async fn load(&self, saga_id: SagaId) -> Result<SagaInstance>;

    /// Streams every saga that is `Running` or `Compensating`, oldest first.
    ///
    /// The stream is finite; calling again restarts the sweep.
    async fn list_runnable(&self) -> Result<SagaStream>;
}

#[async_trait]
impl<T: SagaStore + ?Sized> SagaStore for Arc<T> {
    async fn save(&self, instance: &SagaInstance) -> Result<Version> {
        (**self).save(instance).await
    }

    async fn load(&self, saga_id: SagaId) -> Result<SagaInstance> {
        (**self).load(saga_id).await
    }

    async fn list_runnable(&self) -> Result<SagaStream> {
        (**self).list_runnable().await
    }
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    /// Saves the instance and records the new version on it.
    async fn persist(&self, instance: &mut SagaInstance) -> Result<()> {
        let version = self.save(instance).await?;
        instance.set_version(version);
        Ok(())
    }

    /// Loads an instance, mapping `NotFound` to `None`.
    async fn find(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        match self.load(saga_id).await {
            Ok(instance) => Ok(Some(instance)),
            Err(SagaStoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Checks if a saga exists.
    async fn exists(&self, saga_id: SagaId) -> Result<bool> {
        Ok(self.find(saga_id).await?.is_some())
    }
}

// Blanket implementation for all SagaStore implementations
impl<T: SagaStore + ?Sized> SagaStoreExt for T {}

/// Rejects instances whose step records are not densely indexed from 0.
pub fn validate_for_save(instance: &SagaInstance) -> Result<()> {
    for (position, step) in instance.steps().iter().enumerate() {
        if step.sequence_index() != position {
            return Err(SagaStoreError::Corrupt {
                saga_id: instance.saga_id(),
                reason: format!(
                    "step '{}' has sequence index {}, expected {position}",
                    step.step_name(),
                    step.sequence_index()
                ),
            });
        }
    }
    Ok(())
}
