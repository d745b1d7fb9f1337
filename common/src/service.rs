// Trigger service: registry of processors, owner of the armed set and
// sole writer of trigger statistics

use crate::config::EngineConfig;
use crate::db::{ExecutionStore, TriggerStore};
use crate::errors::{ConfigError, TriggerError, WebhookRejection};
use crate::gateway::FlowGateway;
use crate::models::{
    Execution, Trigger, TriggerDefinition, TriggerFilter, TriggerHealth, TriggerPatch,
    TriggerStatus, TriggerType,
};
use crate::processors::email::MailboxConnector;
use crate::processors::{
    EmailProcessor, FileProcessor, FirerHandle, ProcessContext, ScheduleProcessor,
    TriggerFirer, TriggerProcessor, WebhookProcessor,
};
use crate::telemetry;
use crate::webhook::WebhookRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Executions shown in a status snapshot
const RECENT_EXECUTIONS: i64 = 5;

pub struct TriggerService {
    triggers: Arc<dyn TriggerStore>,
    executions: Arc<dyn ExecutionStore>,
    processors: HashMap<TriggerType, Arc<dyn TriggerProcessor>>,
    webhooks: Arc<WebhookProcessor>,
    schedules: Arc<ScheduleProcessor>,
    // Armed triggers with the snapshot they were armed from. The lock is held
    // across setup/teardown so arming the same trigger never interleaves.
    armed: Mutex<HashMap<Uuid, Trigger>>,
}

impl TriggerService {
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        executions: Arc<dyn ExecutionStore>,
        gateway: Arc<dyn FlowGateway>,
        engine: &EngineConfig,
        mail: Arc<dyn MailboxConnector>,
    ) -> Arc<Self> {
        let poll_interval = Duration::from_secs(engine.default_email_poll_seconds);
        let hash_max_bytes = engine.file_hash_max_bytes;

        Arc::new_cyclic(|service: &Weak<Self>| {
            let firer: FirerHandle = service.clone();

            let webhooks = Arc::new(WebhookProcessor::new(gateway.clone(), firer.clone()));
            let schedules = Arc::new(ScheduleProcessor::new(gateway.clone(), firer.clone()));
            let emails = Arc::new(EmailProcessor::new(
                gateway.clone(),
                firer.clone(),
                mail,
                poll_interval,
            ));
            let files = Arc::new(FileProcessor::new(gateway, firer, hash_max_bytes));

            let all: [Arc<dyn TriggerProcessor>; 4] =
                [webhooks.clone(), schedules.clone(), emails, files];
            let processors = all
                .into_iter()
                .map(|processor| (processor.trigger_type(), processor))
                .collect();

            Self {
                triggers,
                executions,
                processors,
                webhooks,
                schedules,
                armed: Mutex::new(HashMap::new()),
            }
        })
    }

    fn processor(&self, trigger_type: TriggerType) -> Result<&Arc<dyn TriggerProcessor>, TriggerError> {
        self.processors.get(&trigger_type).ok_or_else(|| {
            ConfigError::Unsupported {
                trigger_type: trigger_type.to_string(),
                operation: "setup".to_string(),
            }
            .into()
        })
    }

    /// Arm every enabled trigger in the store. Returns how many armed.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<usize, TriggerError> {
        let enabled = self.triggers.list_enabled_triggers().await?;
        let mut armed = self.armed.lock().await;

        for trigger in &enabled {
            self.arm(&mut armed, trigger).await?;
        }

        telemetry::update_armed_triggers(armed.len());
        info!(armed = armed.len(), enabled = enabled.len(), "Trigger service started");
        Ok(armed.len())
    }

    /// Disarm every armed trigger. In-flight firings run to completion.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let mut armed = self.armed.lock().await;

        for (trigger_id, trigger) in armed.drain() {
            if let Err(e) = self.teardown_with(&trigger).await {
                warn!(%trigger_id, error = %e, "Teardown failed during shutdown");
            }
        }

        telemetry::update_armed_triggers(0);
        info!("Trigger service stopped");
    }

    /// Set up a trigger and add it to the armed set.
    ///
    /// Setup failures are recorded on the trigger instead of being returned;
    /// only store failures propagate.
    async fn arm(
        &self,
        armed: &mut HashMap<Uuid, Trigger>,
        trigger: &Trigger,
    ) -> Result<(), TriggerError> {
        let setup = match self.processor(trigger.trigger_type) {
            Ok(processor) => processor.setup(trigger).await,
            Err(e) => Err(e),
        };

        match setup {
            Ok(()) => {
                armed.insert(trigger.id, trigger.clone());
                info!(trigger_id = %trigger.id, trigger_type = %trigger.trigger_type, "Trigger armed");
            }
            Err(e) => {
                warn!(
                    trigger_id = %trigger.id,
                    trigger_type = %trigger.trigger_type,
                    error = %e,
                    "Trigger setup failed"
                );
                self.triggers
                    .set_last_error(trigger.id, Some(&e.to_string()))
                    .await?;
            }
        }
        Ok(())
    }

    async fn teardown_with(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        self.processor(trigger.trigger_type)?.teardown(trigger).await
    }

    async fn disarm(&self, armed: &mut HashMap<Uuid, Trigger>, trigger_id: Uuid) {
        if let Some(previous) = armed.remove(&trigger_id) {
            if let Err(e) = self.teardown_with(&previous).await {
                warn!(%trigger_id, error = %e, "Trigger teardown failed");
            }
        }
    }

    async fn load(&self, trigger_id: Uuid) -> Result<Trigger, TriggerError> {
        self.triggers
            .get_trigger(trigger_id)
            .await?
            .ok_or_else(|| TriggerError::trigger_not_found(trigger_id))
    }

    /// Persist a new trigger for `flow_id` and arm it when enabled
    #[instrument(skip(self, definition), fields(trigger_type = %definition.trigger_type))]
    pub async fn register_trigger(
        &self,
        flow_id: Uuid,
        definition: TriggerDefinition,
    ) -> Result<Trigger, TriggerError> {
        if !self.triggers.flow_exists(flow_id).await? {
            return Err(TriggerError::flow_not_found(flow_id));
        }

        let trigger = Trigger::new(flow_id, definition);
        self.triggers.insert_trigger(&trigger).await?;
        info!(trigger_id = %trigger.id, %flow_id, "Trigger registered");

        if trigger.enabled {
            let mut armed = self.armed.lock().await;
            self.arm(&mut armed, &trigger).await?;
            telemetry::update_armed_triggers(armed.len());
        }

        self.load(trigger.id).await
    }

    /// Persist a patch, then re-arm: torn down if armed, set up again if still enabled
    #[instrument(skip(self, patch))]
    pub async fn update_trigger(
        &self,
        trigger_id: Uuid,
        patch: TriggerPatch,
    ) -> Result<Trigger, TriggerError> {
        let mut armed = self.armed.lock().await;

        let mut trigger = self.load(trigger_id).await?;
        trigger.apply(patch);
        self.triggers.update_trigger(&trigger).await?;

        self.disarm(&mut armed, trigger_id).await;
        if trigger.enabled {
            self.arm(&mut armed, &trigger).await?;
        }
        telemetry::update_armed_triggers(armed.len());
        drop(armed);

        info!(enabled = trigger.enabled, "Trigger updated");
        self.load(trigger_id).await
    }

    /// Disarm and delete. Unknown ids are a no-op.
    #[instrument(skip(self))]
    pub async fn unregister_trigger(&self, trigger_id: Uuid) -> Result<(), TriggerError> {
        let mut armed = self.armed.lock().await;

        self.disarm(&mut armed, trigger_id).await;
        telemetry::update_armed_triggers(armed.len());

        if self.triggers.delete_trigger(trigger_id).await? {
            info!("Trigger unregistered");
        }
        Ok(())
    }

    /// Record one firing: create the execution, run the processor, update statistics.
    ///
    /// A processing failure is recorded on the trigger and the execution,
    /// then returned to the caller.
    #[instrument(skip(self, payload))]
    pub async fn fire_trigger(&self, trigger_id: Uuid, payload: Value) -> Result<Uuid, TriggerError> {
        let trigger = self.load(trigger_id).await?;
        if !trigger.enabled {
            return Err(TriggerError::Disabled(trigger_id));
        }
        let processor = self.processor(trigger.trigger_type)?;

        let mut execution = Execution::start(trigger_id, payload);
        self.executions.insert_execution(&execution).await?;

        let started = Instant::now();
        let outcome = processor
            .process(ProcessContext {
                trigger: &trigger,
                execution_id: execution.id,
                payload: &execution.payload,
            })
            .await;
        let elapsed = started.elapsed();
        let duration_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        telemetry::record_execution_duration(trigger.trigger_type, elapsed.as_secs_f64());

        match outcome {
            Ok(result) => {
                execution.succeed(result.flow_execution_id, duration_ms);
                self.executions.finish_execution(&execution).await?;
                self.triggers.record_fire_success(trigger_id, Utc::now()).await?;
                telemetry::record_trigger_fired(trigger.trigger_type);

                info!(execution_id = %execution.id, duration_ms, "Trigger execution succeeded");
                Ok(execution.id)
            }
            Err(e) => {
                let message = e.to_string();
                execution.fail(message.clone(), duration_ms);
                self.executions.finish_execution(&execution).await?;
                self.triggers.record_fire_failure(trigger_id, &message).await?;
                telemetry::record_trigger_failure(trigger.trigger_type, e.kind());

                error!(execution_id = %execution.id, error = %message, "Trigger execution failed");
                Err(e)
            }
        }
    }

    /// Manual fire, marking the payload with `"test": true`
    #[instrument(skip(self, payload))]
    pub async fn test_trigger(
        &self,
        trigger_id: Uuid,
        payload: Option<Value>,
    ) -> Result<Uuid, TriggerError> {
        let payload = match payload {
            Some(Value::Object(mut fields)) => {
                fields.insert("test".to_string(), Value::Bool(true));
                Value::Object(fields)
            }
            Some(Value::Null) | None => json!({ "test": true }),
            Some(other) => json!({ "test": true, "data": other }),
        };
        self.fire_trigger(trigger_id, payload).await
    }

    #[instrument(skip(self))]
    pub async fn get_trigger_status(&self, trigger_id: Uuid) -> Result<TriggerStatus, TriggerError> {
        let trigger = self.load(trigger_id).await?;
        let is_armed = self.armed.lock().await.contains_key(&trigger_id);
        let recent_executions = self
            .executions
            .recent_executions(trigger_id, RECENT_EXECUTIONS)
            .await?;

        let (health, message) = if let Some(last_error) = &trigger.last_error {
            (TriggerHealth::Error, Some(last_error.clone()))
        } else if !trigger.enabled {
            (TriggerHealth::Disarmed, None)
        } else if is_armed {
            (TriggerHealth::Armed, None)
        } else {
            (
                TriggerHealth::Error,
                Some("Trigger is enabled but not armed".to_string()),
            )
        };

        Ok(TriggerStatus {
            trigger_id,
            trigger_type: trigger.trigger_type,
            enabled: trigger.enabled,
            health,
            message,
            fire_count: trigger.fire_count,
            error_count: trigger.error_count,
            last_fired_at: trigger.last_fired_at,
            last_error: trigger.last_error,
            next_run_at: trigger.next_run_at,
            recent_executions,
        })
    }

    pub async fn get_trigger(&self, trigger_id: Uuid) -> Result<Trigger, TriggerError> {
        self.load(trigger_id).await
    }

    pub async fn list_triggers(&self, filter: &TriggerFilter) -> Result<Vec<Trigger>, TriggerError> {
        Ok(self.triggers.list_triggers(filter).await?)
    }

    pub async fn list_executions(
        &self,
        trigger_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Execution>, TriggerError> {
        self.load(trigger_id).await?;
        Ok(self
            .executions
            .list_executions(trigger_id, limit, offset)
            .await?)
    }

    /// Preview the next `count` runs of a schedule trigger without side effects
    pub async fn get_next_runs(
        &self,
        trigger_id: Uuid,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>, TriggerError> {
        let trigger = self.load(trigger_id).await?;
        if trigger.trigger_type != TriggerType::Schedule {
            return Err(ConfigError::Unsupported {
                trigger_type: trigger.trigger_type.to_string(),
                operation: "next runs".to_string(),
            }
            .into());
        }
        self.schedules.next_runs(&trigger, count)
    }

    /// Entry point for `/webhook/{trigger_id}` requests
    pub async fn handle_webhook(
        &self,
        trigger_id: Uuid,
        request: WebhookRequest,
    ) -> Result<Uuid, WebhookRejection> {
        self.webhooks.handle(trigger_id, request).await
    }

    pub async fn armed_count(&self) -> usize {
        self.armed.lock().await.len()
    }

    pub async fn is_armed(&self, trigger_id: Uuid) -> bool {
        self.armed.lock().await.contains_key(&trigger_id)
    }
}

#[async_trait]
impl TriggerFirer for TriggerService {
    async fn fire_trigger(&self, trigger_id: Uuid, payload: Value) -> Result<Uuid, TriggerError> {
        TriggerService::fire_trigger(self, trigger_id, payload).await
    }

    async fn record_next_run(
        &self,
        trigger_id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), TriggerError> {
        Ok(self.triggers.set_next_run(trigger_id, next_run_at).await?)
    }
}
