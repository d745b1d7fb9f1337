// Trigger repository implementation

use crate::db::store::TriggerStore;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{Trigger, TriggerFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

const TRIGGER_COLUMNS: &str = r#"
    id, flow_id, trigger_type, name, description, config, enabled,
    webhook_path, next_run_at, last_fired_at, fire_count, error_count,
    last_error, created_at, updated_at
"#;

/// Repository for trigger records and their statistics
pub struct TriggerRepository {
    pool: DbPool,
}

impl TriggerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn not_found(id: Uuid) -> DatabaseError {
        DatabaseError::NotFound(format!("Trigger not found: {}", id))
    }
}

#[async_trait]
impl TriggerStore for TriggerRepository {
    #[instrument(skip(self))]
    async fn flow_exists(&self, flow_id: Uuid) -> Result<bool, DatabaseError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM flows WHERE id = $1)")
            .bind(flow_id)
            .fetch_one(self.pool.pool())
            .await?;
        Ok(exists)
    }

    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    async fn insert_trigger(&self, trigger: &Trigger) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO triggers (
                id, flow_id, trigger_type, name, description, config, enabled,
                webhook_path, next_run_at, last_fired_at, fire_count, error_count,
                last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(trigger.id)
        .bind(trigger.flow_id)
        .bind(trigger.trigger_type.as_str())
        .bind(&trigger.name)
        .bind(&trigger.description)
        .bind(&trigger.config)
        .bind(trigger.enabled)
        .bind(&trigger.webhook_path)
        .bind(trigger.next_run_at)
        .bind(trigger.last_fired_at)
        .bind(trigger.fire_count)
        .bind(trigger.error_count)
        .bind(&trigger.last_error)
        .bind(trigger.created_at)
        .bind(trigger.updated_at)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(
            trigger_id = %trigger.id,
            flow_id = %trigger.flow_id,
            trigger_type = %trigger.trigger_type,
            "Trigger created"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_trigger(&self, id: Uuid) -> Result<Option<Trigger>, DatabaseError> {
        let query = format!("SELECT {} FROM triggers WHERE id = $1", TRIGGER_COLUMNS);
        let trigger = sqlx::query_as::<_, Trigger>(&query)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(trigger)
    }

    #[instrument(skip(self))]
    async fn list_triggers(&self, filter: &TriggerFilter) -> Result<Vec<Trigger>, DatabaseError> {
        let query = format!(
            r#"
            SELECT {}
            FROM triggers
            WHERE ($1::uuid IS NULL OR flow_id = $1)
              AND ($2::text IS NULL OR trigger_type = $2)
              AND ($3::boolean IS NULL OR enabled = $3)
            ORDER BY created_at ASC
            "#,
            TRIGGER_COLUMNS
        );
        let triggers = sqlx::query_as::<_, Trigger>(&query)
            .bind(filter.flow_id)
            .bind(filter.trigger_type.map(|t| t.as_str()))
            .bind(filter.enabled)
            .fetch_all(self.pool.pool())
            .await?;

        tracing::debug!(count = triggers.len(), "Listed triggers");
        Ok(triggers)
    }

    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    async fn update_trigger(&self, trigger: &Trigger) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE triggers
            SET name = $2,
                description = $3,
                config = $4,
                enabled = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(trigger.id)
        .bind(&trigger.name)
        .bind(&trigger.description)
        .bind(&trigger.config)
        .bind(trigger.enabled)
        .bind(trigger.updated_at)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(trigger.id));
        }

        tracing::info!(trigger_id = %trigger.id, enabled = trigger.enabled, "Trigger updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_trigger(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM triggers WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(trigger_id = %id, "Trigger deleted");
        }
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn record_fire_success(
        &self,
        id: Uuid,
        fired_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE triggers
            SET fire_count = fire_count + 1,
                last_fired_at = $2,
                last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(fired_at)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn record_fire_failure(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE triggers
            SET error_count = error_count + 1,
                last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_next_run(
        &self,
        id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE triggers SET next_run_at = $2 WHERE id = $1")
            .bind(id)
            .bind(next_run_at)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    #[instrument(skip(self, error))]
    async fn set_last_error(&self, id: Uuid, error: Option<&str>) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE triggers SET last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }
        Ok(())
    }
}
