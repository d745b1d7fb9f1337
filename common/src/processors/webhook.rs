// Webhook processor: routes inbound HTTP requests to armed webhook triggers

use super::{execute_flow, FirerHandle, ProcessContext, ProcessResult, TriggerProcessor};
use crate::errors::{TriggerError, WebhookRejection};
use crate::gateway::FlowGateway;
use crate::models::{Trigger, TriggerType};
use crate::webhook::{WebhookConfig, WebhookRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Armed webhook triggers are entries in a route table keyed by trigger id;
/// the HTTP layer serves every `/webhook/{trigger_id}` through [`handle`].
///
/// [`handle`]: WebhookProcessor::handle
pub struct WebhookProcessor {
    gateway: Arc<dyn FlowGateway>,
    firer: FirerHandle,
    routes: RwLock<HashMap<Uuid, Arc<WebhookConfig>>>,
}

impl WebhookProcessor {
    pub fn new(gateway: Arc<dyn FlowGateway>, firer: FirerHandle) -> Self {
        Self {
            gateway,
            firer,
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_routed(&self, trigger_id: Uuid) -> bool {
        self.routes
            .read()
            .map(|routes| routes.contains_key(&trigger_id))
            .unwrap_or(false)
    }

    /// Validate an inbound request and fire the trigger.
    ///
    /// The firing runs on its own task so a client disconnect cannot cancel
    /// it halfway through recording the execution.
    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn handle(
        &self,
        trigger_id: Uuid,
        request: WebhookRequest,
    ) -> Result<Uuid, WebhookRejection> {
        let config = self
            .routes
            .read()
            .map_err(|_| WebhookRejection::Failed("route table unavailable".to_string()))?
            .get(&trigger_id)
            .cloned()
            .ok_or(WebhookRejection::NotFound)?;

        let payload = config.accept(&request).map_err(|rejection| {
            warn!(code = rejection.code(), reason = %rejection, "Webhook request rejected");
            rejection
        })?;

        let service = self
            .firer
            .upgrade()
            .ok_or_else(|| WebhookRejection::Failed(TriggerError::ServiceUnavailable.to_string()))?;

        let execution_id =
            tokio::spawn(async move { service.fire_trigger(trigger_id, payload).await })
                .await
                .map_err(|e| WebhookRejection::Failed(format!("firing task failed: {}", e)))??;

        info!(%execution_id, "Webhook fired");
        Ok(execution_id)
    }
}

#[async_trait]
impl TriggerProcessor for WebhookProcessor {
    fn trigger_type(&self) -> TriggerType {
        TriggerType::Webhook
    }

    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    async fn setup(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        self.teardown(trigger).await?;

        let config = WebhookConfig::from_config(&trigger.config)?;
        let method = config.method.clone();

        self.routes
            .write()
            .map_err(|_| TriggerError::ServiceUnavailable)?
            .insert(trigger.id, Arc::new(config));

        info!(
            path = trigger.webhook_path.as_deref().unwrap_or_default(),
            %method,
            "Webhook route registered"
        );
        Ok(())
    }

    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    async fn teardown(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        let removed = self
            .routes
            .write()
            .map_err(|_| TriggerError::ServiceUnavailable)?
            .remove(&trigger.id);

        if removed.is_some() {
            info!("Webhook route removed");
        }
        Ok(())
    }

    async fn process(&self, context: ProcessContext<'_>) -> Result<ProcessResult, TriggerError> {
        execute_flow(&self.gateway, context).await
    }
}
