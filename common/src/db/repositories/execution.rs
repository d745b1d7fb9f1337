// Execution repository implementation

use crate::db::store::ExecutionStore;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::Execution;
use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

/// Repository for trigger execution history
pub struct ExecutionRepository {
    pool: DbPool,
}

impl ExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for ExecutionRepository {
    #[instrument(skip(self, execution), fields(execution_id = %execution.id))]
    async fn insert_execution(&self, execution: &Execution) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO trigger_executions (
                id, trigger_id, flow_execution_id, status, payload,
                started_at, completed_at, duration_ms, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(execution.id)
        .bind(execution.trigger_id)
        .bind(&execution.flow_execution_id)
        .bind(execution.status.to_string())
        .bind(&execution.payload)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(&execution.error)
        .execute(self.pool.pool())
        .await?;

        tracing::debug!(
            execution_id = %execution.id,
            trigger_id = %execution.trigger_id,
            "Execution created"
        );
        Ok(())
    }

    #[instrument(skip(self, execution), fields(execution_id = %execution.id))]
    async fn finish_execution(&self, execution: &Execution) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE trigger_executions
            SET status = $2,
                flow_execution_id = $3,
                completed_at = $4,
                duration_ms = $5,
                error = $6
            WHERE id = $1
            "#,
        )
        .bind(execution.id)
        .bind(execution.status.to_string())
        .bind(&execution.flow_execution_id)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(&execution.error)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!(
                "Execution not found: {}",
                execution.id
            )));
        }

        tracing::debug!(
            execution_id = %execution.id,
            status = %execution.status,
            "Execution finished"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_executions(
        &self,
        trigger_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Execution>, DatabaseError> {
        let executions = sqlx::query_as::<_, Execution>(
            r#"
            SELECT
                id, trigger_id, flow_execution_id, status, payload,
                started_at, completed_at, duration_ms, error
            FROM trigger_executions
            WHERE trigger_id = $1
            ORDER BY started_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(trigger_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await?;

        Ok(executions)
    }
}
