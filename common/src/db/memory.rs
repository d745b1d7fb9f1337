// In-memory store used by tests and single-process deployments

use super::store::{ExecutionStore, TriggerStore};
use crate::errors::DatabaseError;
use crate::models::{Execution, Trigger, TriggerFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    flows: HashSet<Uuid>,
    triggers: HashMap<Uuid, Trigger>,
    // Insertion order doubles as per-trigger creation order
    executions: Vec<Execution>,
}

/// Implements both [`TriggerStore`] and [`ExecutionStore`] over a single lock
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `flow_id` resolvable for trigger registration
    pub async fn add_flow(&self, flow_id: Uuid) {
        self.state.write().await.flows.insert(flow_id);
    }

    /// Number of execution rows recorded for a trigger
    pub async fn execution_count(&self, trigger_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .executions
            .iter()
            .filter(|e| e.trigger_id == trigger_id)
            .count()
    }
}

fn missing(id: Uuid) -> DatabaseError {
    DatabaseError::NotFound(format!("Trigger not found: {}", id))
}

#[async_trait]
impl TriggerStore for InMemoryStore {
    async fn flow_exists(&self, flow_id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self.state.read().await.flows.contains(&flow_id))
    }

    async fn insert_trigger(&self, trigger: &Trigger) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        if state.triggers.contains_key(&trigger.id) {
            return Err(DatabaseError::DuplicateKey(trigger.id.to_string()));
        }
        if !state.flows.contains(&trigger.flow_id) {
            return Err(DatabaseError::ForeignKeyViolation(format!(
                "flow {} does not exist",
                trigger.flow_id
            )));
        }
        state.triggers.insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn get_trigger(&self, id: Uuid) -> Result<Option<Trigger>, DatabaseError> {
        Ok(self.state.read().await.triggers.get(&id).cloned())
    }

    async fn list_triggers(&self, filter: &TriggerFilter) -> Result<Vec<Trigger>, DatabaseError> {
        let state = self.state.read().await;
        let mut triggers: Vec<Trigger> = state
            .triggers
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        triggers.sort_by_key(|t| t.created_at);
        Ok(triggers)
    }

    async fn update_trigger(&self, trigger: &Trigger) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        let stored = state
            .triggers
            .get_mut(&trigger.id)
            .ok_or_else(|| missing(trigger.id))?;
        stored.name = trigger.name.clone();
        stored.description = trigger.description.clone();
        stored.config = trigger.config.clone();
        stored.enabled = trigger.enabled;
        stored.updated_at = trigger.updated_at;
        Ok(())
    }

    async fn delete_trigger(&self, id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self.state.write().await.triggers.remove(&id).is_some())
    }

    async fn record_fire_success(
        &self,
        id: Uuid,
        fired_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        let trigger = state.triggers.get_mut(&id).ok_or_else(|| missing(id))?;
        trigger.fire_count += 1;
        trigger.last_fired_at = Some(fired_at);
        trigger.last_error = None;
        Ok(())
    }

    async fn record_fire_failure(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        let trigger = state.triggers.get_mut(&id).ok_or_else(|| missing(id))?;
        trigger.error_count += 1;
        trigger.last_error = Some(error.to_string());
        Ok(())
    }

    async fn set_next_run(
        &self,
        id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        let trigger = state.triggers.get_mut(&id).ok_or_else(|| missing(id))?;
        trigger.next_run_at = next_run_at;
        Ok(())
    }

    async fn set_last_error(&self, id: Uuid, error: Option<&str>) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        let trigger = state.triggers.get_mut(&id).ok_or_else(|| missing(id))?;
        trigger.last_error = error.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn insert_execution(&self, execution: &Execution) -> Result<(), DatabaseError> {
        self.state.write().await.executions.push(execution.clone());
        Ok(())
    }

    async fn finish_execution(&self, execution: &Execution) -> Result<(), DatabaseError> {
        let mut state = self.state.write().await;
        let stored = state
            .executions
            .iter_mut()
            .find(|e| e.id == execution.id)
            .ok_or_else(|| {
                DatabaseError::NotFound(format!("Execution not found: {}", execution.id))
            })?;
        *stored = execution.clone();
        Ok(())
    }

    async fn list_executions(
        &self,
        trigger_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Execution>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .executions
            .iter()
            .rev()
            .filter(|e| e.trigger_id == trigger_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TriggerDefinition, TriggerType};

    async fn seeded() -> (InMemoryStore, Trigger) {
        let store = InMemoryStore::new();
        let flow_id = Uuid::new_v4();
        store.add_flow(flow_id).await;
        let trigger = Trigger::new(
            flow_id,
            TriggerDefinition {
                trigger_type: TriggerType::Schedule,
                name: "t".to_string(),
                description: None,
                config: serde_json::json!({}),
                enabled: true,
            },
        );
        store.insert_trigger(&trigger).await.unwrap();
        (store, trigger)
    }

    #[tokio::test]
    async fn test_insert_requires_existing_flow() {
        let store = InMemoryStore::new();
        let trigger = Trigger::new(
            Uuid::new_v4(),
            TriggerDefinition {
                trigger_type: TriggerType::File,
                name: "orphan".to_string(),
                description: None,
                config: serde_json::json!({}),
                enabled: true,
            },
        );
        let result = store.insert_trigger(&trigger).await;
        assert!(matches!(result, Err(DatabaseError::ForeignKeyViolation(_))));
    }

    #[tokio::test]
    async fn test_success_clears_last_error() {
        let (store, trigger) = seeded().await;
        store.record_fire_failure(trigger.id, "boom").await.unwrap();
        store.record_fire_success(trigger.id, Utc::now()).await.unwrap();

        let stored = store.get_trigger(trigger.id).await.unwrap().unwrap();
        assert_eq!(stored.fire_count, 1);
        assert_eq!(stored.error_count, 1);
        assert!(stored.last_error.is_none());
        assert!(stored.last_fired_at.is_some());
    }

    #[tokio::test]
    async fn test_update_does_not_touch_statistics() {
        let (store, mut trigger) = seeded().await;
        store.record_fire_success(trigger.id, Utc::now()).await.unwrap();

        trigger.name = "renamed".to_string();
        trigger.fire_count = 0;
        store.update_trigger(&trigger).await.unwrap();

        let stored = store.get_trigger(trigger.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.fire_count, 1);
    }

    #[tokio::test]
    async fn test_executions_listed_newest_first_with_paging() {
        let (store, trigger) = seeded().await;
        let mut ids = Vec::new();
        for i in 0..4 {
            let execution = Execution::start(trigger.id, serde_json::json!({ "n": i }));
            ids.push(execution.id);
            store.insert_execution(&execution).await.unwrap();
        }

        let page = store.list_executions(trigger.id, 2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, ids[2]);
        assert_eq!(page[1].id, ids[1]);
        assert_eq!(store.execution_count(trigger.id).await, 4);
    }

    #[tokio::test]
    async fn test_delete_reports_missing_record() {
        let (store, trigger) = seeded().await;
        assert!(store.delete_trigger(trigger.id).await.unwrap());
        assert!(!store.delete_trigger(trigger.id).await.unwrap());
    }
}
