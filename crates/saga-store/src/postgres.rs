use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, SagaId, SagaInstance, SagaStatus, SagaStoreError, StepRecord, StepStatus, Version,
    store::{SagaStore, SagaStream, validate_for_save},
};

/// PostgreSQL-backed saga store implementation.
///
/// Instance rows and step rows are written in one transaction, and the
/// instance update is conditional on the version the caller read.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and returns a store over the new pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn current_version(&self, saga_id: SagaId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM saga_instances WHERE saga_id = $1")
                .bind(saga_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(version.map(Version::new))
    }

    fn row_to_step(saga_id: SagaId, row: PgRow) -> Result<StepRecord> {
        let status: String = row.try_get("status")?;
        let sequence_index: i64 = row.try_get("sequence_index")?;
        let attempt: i64 = row.try_get("attempt")?;

        Ok(StepRecord {
            step_name: row.try_get("step_name")?,
            sequence_index: usize::try_from(sequence_index).map_err(|_| {
                SagaStoreError::Corrupt {
                    saga_id,
                    reason: format!("negative sequence index {sequence_index}"),
                }
            })?,
            status: status
                .parse::<StepStatus>()
                .map_err(|reason| SagaStoreError::Corrupt { saga_id, reason })?,
            request_payload: row.try_get("request_payload")?,
            result_payload: row.try_get("result_payload")?,
            attempt: u32::try_from(attempt).unwrap_or(u32::MAX),
            last_error: row.try_get("last_error")?,
        })
    }

    fn row_to_instance(row: PgRow, steps: Vec<StepRecord>) -> Result<SagaInstance> {
        let saga_id = SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?);
        let status: String = row.try_get("status")?;

        Ok(SagaInstance {
            saga_id,
            definition_name: row.try_get("definition_name")?,
            status: status
                .parse::<SagaStatus>()
                .map_err(|reason| SagaStoreError::Corrupt { saga_id, reason })?,
            input: row.try_get("input")?,
            steps,
            cancel_requested: row.try_get("cancel_requested")?,
            failure_reason: row.try_get("failure_reason")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    #[tracing::instrument(skip(self, instance), fields(saga_id = %instance.saga_id(), status = %instance.status()))]
    async fn save(&self, instance: &SagaInstance) -> Result<Version> {
        validate_for_save(instance)?;

        let saga_id = instance.saga_id();
        let expected = instance.version();
        let next = expected.next();

        // Start a transaction
        let mut tx = self.pool.begin().await?;

        let rows_affected = if expected == Version::initial() {
            sqlx::query(
                r#"
                INSERT INTO saga_instances
                    (saga_id, definition_name, status, input, cancel_requested, failure_reason, version, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (saga_id) DO NOTHING
                "#,
            )
            .bind(saga_id.as_uuid())
            .bind(instance.definition_name())
            .bind(instance.status().as_str())
            .bind(instance.input())
            .bind(instance.cancel_requested())
            .bind(instance.failure_reason())
            .bind(next.as_i64())
            .bind(instance.created_at())
            .bind(instance.updated_at())
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE saga_instances
                SET status = $2, cancel_requested = $3, failure_reason = $4, version = $5, updated_at = $6
                WHERE saga_id = $1 AND version = $7
                "#,
            )
            .bind(saga_id.as_uuid())
            .bind(instance.status().as_str())
            .bind(instance.cancel_requested())
            .bind(instance.failure_reason())
            .bind(next.as_i64())
            .bind(instance.updated_at())
            .bind(expected.as_i64())
            .execute(&mut *tx)
            .await?
            .rows_affected()
        };

        if rows_affected == 0 {
            tx.rollback().await?;
            return match self.current_version(saga_id).await? {
                Some(actual) => Err(SagaStoreError::ConcurrentModification {
                    saga_id,
                    expected,
                    actual,
                }),
                None => Err(SagaStoreError::NotFound(saga_id)),
            };
        }

        for step in instance.steps() {
            sqlx::query(
                r#"
                INSERT INTO saga_step_records
                    (saga_id, sequence_index, step_name, status, request_payload, result_payload, attempt, last_error)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (saga_id, sequence_index) DO UPDATE SET
                    status = EXCLUDED.status,
                    result_payload = EXCLUDED.result_payload,
                    attempt = EXCLUDED.attempt,
                    last_error = EXCLUDED.last_error
                "#,
            )
            .bind(saga_id.as_uuid())
            .bind(step.sequence_index() as i64)
            .bind(step.step_name())
            .bind(step.status().as_str())
            .bind(step.request_payload())
            .bind(step.result_payload())
            .bind(i64::from(step.attempt()))
            .bind(step.last_error())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        metrics::counter!("saga_store_saves_total").increment(1);
        Ok(next)
    }

    async fn load(&self, saga_id: SagaId) -> Result<SagaInstance> {
        // Both reads see the same snapshot, so step rows never run ahead of
        // the instance row they were saved with.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT saga_id, definition_name, status, input, cancel_requested, failure_reason, version, created_at, updated_at
            FROM saga_instances
            WHERE saga_id = $1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(SagaStoreError::NotFound(saga_id));
        };

        let step_rows = sqlx::query(
            r#"
            SELECT sequence_index, step_name, status, request_payload, result_payload, attempt, last_error
            FROM saga_step_records
            WHERE saga_id = $1
            ORDER BY sequence_index ASC
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let steps = step_rows
            .into_iter()
            .map(|r| Self::row_to_step(saga_id, r))
            .collect::<Result<Vec<_>>>()?;

        Self::row_to_instance(row, steps)
    }

    async fn list_runnable(&self) -> Result<SagaStream> {
        use futures_util::{StreamExt, stream};

        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT saga_id
            FROM saga_instances
            WHERE status IN ('RUNNING', 'COMPENSATING')
            ORDER BY created_at ASC, saga_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        // Instances are loaded one at a time as the sweep pulls them; a saga
        // that finished in the meantime is skipped.
        let store = self.clone();
        let stream = stream::iter(ids)
            .then(move |id| {
                let store = store.clone();
                async move { store.load(SagaId::from_uuid(id)).await }
            })
            .filter_map(|result| async move {
                match result {
                    Ok(instance) if instance.status().is_runnable() => Some(Ok(instance)),
                    Ok(_) | Err(SagaStoreError::NotFound(_)) => None,
                    Err(e) => Some(Err(e)),
                }
            });

        Ok(Box::pin(stream))
    }
}
