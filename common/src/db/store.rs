// Storage contracts consumed by the trigger service

use crate::errors::DatabaseError;
use crate::models::{Execution, Trigger, TriggerFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Durable trigger records and their statistics.
///
/// Statistics updates are single atomic operations so that concurrent
/// firings of the same trigger never lose an increment.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn flow_exists(&self, flow_id: Uuid) -> Result<bool, DatabaseError>;

    async fn insert_trigger(&self, trigger: &Trigger) -> Result<(), DatabaseError>;

    async fn get_trigger(&self, id: Uuid) -> Result<Option<Trigger>, DatabaseError>;

    async fn list_triggers(&self, filter: &TriggerFilter) -> Result<Vec<Trigger>, DatabaseError>;

    /// Persist the user-editable fields (name, description, config, enabled)
    async fn update_trigger(&self, trigger: &Trigger) -> Result<(), DatabaseError>;

    /// Returns false when no record existed
    async fn delete_trigger(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Increment the fire count, stamp `last_fired_at` and clear `last_error`
    async fn record_fire_success(
        &self,
        id: Uuid,
        fired_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Increment the error count and stamp `last_error`
    async fn record_fire_failure(&self, id: Uuid, error: &str) -> Result<(), DatabaseError>;

    async fn set_next_run(
        &self,
        id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError>;

    async fn set_last_error(&self, id: Uuid, error: Option<&str>) -> Result<(), DatabaseError>;

    async fn list_enabled_triggers(&self) -> Result<Vec<Trigger>, DatabaseError> {
        self.list_triggers(&TriggerFilter {
            enabled: Some(true),
            ..Default::default()
        })
        .await
    }
}

/// Append-mostly log of firing attempts
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert_execution(&self, execution: &Execution) -> Result<(), DatabaseError>;

    /// Persist the terminal state of an execution
    async fn finish_execution(&self, execution: &Execution) -> Result<(), DatabaseError>;

    /// Executions for one trigger, newest first
    async fn list_executions(
        &self,
        trigger_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Execution>, DatabaseError>;

    async fn recent_executions(
        &self,
        trigger_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Execution>, DatabaseError> {
        self.list_executions(trigger_id, limit, 0).await
    }
}
