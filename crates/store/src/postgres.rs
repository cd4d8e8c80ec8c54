use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{SagaId, Version};
use domain::{DataMap, Saga, SagaStatus, Step};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::query::{Page, PageRequest};
use crate::store::SagaStore;
use crate::{Result, StoreError};

const SAGA_COLUMNS: &str = "saga_id, name, correlation_id, status, steps, current_step_index, \
     input_data, output_data, retry_count, max_retries, timeout_ms, priority, version, \
     error_message, error_trace, metadata, tags, created_at, updated_at, started_at, completed_at";

/// PostgreSQL-backed saga store.
///
/// One row per saga; the step list is stored as a JSONB document so a
/// single save is atomic.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_saga(row: PgRow) -> Result<Saga> {
        let status: String = row.try_get("status")?;
        let status: SagaStatus = status
            .parse()
            .map_err(|e| StoreError::Serialization(serde_json::Error::io(std::io::Error::other(e))))?;
        let steps: serde_json::Value = row.try_get("steps")?;
        let steps: Vec<Step> = serde_json::from_value(steps)?;

        Ok(Saga {
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            name: row.try_get("name")?,
            correlation_id: row.try_get("correlation_id")?,
            status,
            steps,
            current_step_index: row.try_get::<i64, _>("current_step_index")? as usize,
            input_data: Self::json_map(row.try_get("input_data")?),
            output_data: Self::json_map(row.try_get("output_data")?),
            retry_count: row.try_get::<i32, _>("retry_count")? as u32,
            max_retries: row.try_get::<i32, _>("max_retries")? as u32,
            timeout_ms: row.try_get::<i64, _>("timeout_ms")? as u64,
            priority: row.try_get("priority")?,
            version: Version::new(row.try_get("version")?),
            error_message: row.try_get("error_message")?,
            error_trace: row.try_get("error_trace")?,
            metadata: Self::json_map(row.try_get("metadata")?),
            tags: row.try_get("tags")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn json_map(value: serde_json::Value) -> DataMap {
        match value {
            serde_json::Value::Object(map) => map,
            _ => DataMap::new(),
        }
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn save(&self, mut saga: Saga) -> Result<Saga> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT version FROM sagas WHERE saga_id = $1 FOR UPDATE")
                .bind(saga.saga_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

        let steps = serde_json::to_value(&saga.steps)?;
        saga.updated_at = Utc::now();

        match existing {
            None => {
                if saga.version.as_i64() != 0 {
                    return Err(StoreError::NotFound(saga.saga_id));
                }
                saga.version = saga.version.next();
                sqlx::query(
                    r#"
                    INSERT INTO sagas (saga_id, name, correlation_id, status, steps,
                        current_step_index, input_data, output_data, retry_count, max_retries,
                        timeout_ms, priority, version, error_message, error_trace, metadata,
                        tags, created_at, updated_at, started_at, completed_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                        $16, $17, $18, $19, $20, $21)
                    "#,
                )
                .bind(saga.saga_id.as_uuid())
                .bind(&saga.name)
                .bind(&saga.correlation_id)
                .bind(saga.status.as_str())
                .bind(&steps)
                .bind(saga.current_step_index as i64)
                .bind(serde_json::Value::Object(saga.input_data.clone()))
                .bind(serde_json::Value::Object(saga.output_data.clone()))
                .bind(saga.retry_count as i32)
                .bind(saga.max_retries as i32)
                .bind(saga.timeout_ms as i64)
                .bind(saga.priority)
                .bind(saga.version.as_i64())
                .bind(&saga.error_message)
                .bind(&saga.error_trace)
                .bind(serde_json::Value::Object(saga.metadata.clone()))
                .bind(&saga.tags)
                .bind(saga.created_at)
                .bind(saga.updated_at)
                .bind(saga.started_at)
                .bind(saga.completed_at)
                .execute(&mut *tx)
                .await?;
            }
            Some(actual) => {
                if actual != saga.version.as_i64() {
                    return Err(StoreError::Conflict {
                        saga_id: saga.saga_id,
                        expected: saga.version,
                        actual: Version::new(actual),
                    });
                }
                saga.version = saga.version.next();
                sqlx::query(
                    r#"
                    UPDATE sagas SET name = $2, correlation_id = $3, status = $4, steps = $5,
                        current_step_index = $6, input_data = $7, output_data = $8,
                        retry_count = $9, max_retries = $10, timeout_ms = $11, priority = $12,
                        version = $13, error_message = $14, error_trace = $15, metadata = $16,
                        tags = $17, updated_at = $18, started_at = $19, completed_at = $20
                    WHERE saga_id = $1
                    "#,
                )
                .bind(saga.saga_id.as_uuid())
                .bind(&saga.name)
                .bind(&saga.correlation_id)
                .bind(saga.status.as_str())
                .bind(&steps)
                .bind(saga.current_step_index as i64)
                .bind(serde_json::Value::Object(saga.input_data.clone()))
                .bind(serde_json::Value::Object(saga.output_data.clone()))
                .bind(saga.retry_count as i32)
                .bind(saga.max_retries as i32)
                .bind(saga.timeout_ms as i64)
                .bind(saga.priority)
                .bind(saga.version.as_i64())
                .bind(&saga.error_message)
                .bind(&saga.error_trace)
                .bind(serde_json::Value::Object(saga.metadata.clone()))
                .bind(&saga.tags)
                .bind(saga.updated_at)
                .bind(saga.started_at)
                .bind(saga.completed_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(saga)
    }

    async fn find(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        let row = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM sagas WHERE saga_id = $1"
        ))
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_saga).transpose()
    }

    async fn find_by_status(&self, status: SagaStatus, page: PageRequest) -> Result<Page<Saga>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sagas WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM sagas WHERE status = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(status.as_str())
        .bind(page.size as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(Self::row_to_saga)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            page: page.page,
            size: page.size,
            total: total as u64,
        })
    }

    async fn find_by_correlation(&self, correlation_id: &str) -> Result<Vec<Saga>> {
        let rows = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM sagas WHERE correlation_id = $1 ORDER BY created_at DESC"
        ))
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<Saga>> {
        let rows = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM sagas WHERE name = $1 ORDER BY created_at DESC"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn find_timed_out(&self, now: DateTime<Utc>) -> Result<Vec<Saga>> {
        let rows = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM sagas \
             WHERE status IN ('RUNNING', 'RETRYING') AND timeout_ms > 0 \
               AND started_at IS NOT NULL \
               AND started_at + (timeout_ms * interval '1 millisecond') <= $1"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn find_retryable(&self) -> Result<Vec<Saga>> {
        let rows = sqlx::query(&format!(
            "SELECT {SAGA_COLUMNS} FROM sagas \
             WHERE status = 'FAILED' AND retry_count < max_retries \
             ORDER BY priority DESC, created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_saga).collect()
    }

    async fn count_by_status(&self, status: SagaStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sagas WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn bulk_update_status(&self, ids: &[SagaId], status: SagaStatus) -> Result<u64> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let result = sqlx::query(
            "UPDATE sagas SET status = $1, version = version + 1, updated_at = $2 \
             WHERE saga_id = ANY($3)",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(&uuids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn bulk_delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM sagas \
             WHERE status IN ('COMPLETED', 'FAILED', 'COMPENSATED', 'TIMEOUT') \
               AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
