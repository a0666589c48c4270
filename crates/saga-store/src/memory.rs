use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Result, SagaId, SagaInstance, SagaStoreError, Version,
    store::{SagaStore, SagaStream, validate_for_save},
};

/// In-memory saga store implementation.
///
/// Provides the same versioning semantics as the PostgreSQL implementation,
/// so the engine behaves identically on top of either.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<SagaId, SagaInstance>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory saga store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of sagas stored.
    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn save(&self, instance: &SagaInstance) -> Result<Version> {
        validate_for_save(instance)?;

        let saga_id = instance.saga_id();
        let mut sagas = self.sagas.write().await;

        let actual = sagas
            .get(&saga_id)
            .map(|stored| stored.version())
            .unwrap_or(Version::initial());

        if actual != instance.version() {
            return Err(SagaStoreError::ConcurrentModification {
                saga_id,
                expected: instance.version(),
                actual,
            });
        }

        let next = actual.next();
        let mut stored = instance.clone();
        stored.set_version(next);
        sagas.insert(saga_id, stored);

        Ok(next)
    }

    async fn load(&self, saga_id: SagaId) -> Result<SagaInstance> {
        self.sagas
            .read()
            .await
            .get(&saga_id)
            .cloned()
            .ok_or(SagaStoreError::NotFound(saga_id))
    }

    async fn list_runnable(&self) -> Result<SagaStream> {
        use futures_util::stream;

        let sagas = self.sagas.read().await;
        let mut runnable: Vec<SagaInstance> = sagas
            .values()
            .filter(|s| s.status().is_runnable())
            .cloned()
            .collect();
        runnable.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then(a.saga_id().cmp(&b.saga_id()))
        });

        let stream = stream::iter(runnable.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }
}
