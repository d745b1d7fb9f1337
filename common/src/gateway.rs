// Flow execution gateway: the entry point into the workflow runtime

use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::models::Trigger;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::instrument;

/// Starts a flow execution on behalf of a firing trigger and returns the
/// runtime's opaque execution identifier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FlowGateway: Send + Sync {
    async fn execute_flow_from_trigger(
        &self,
        trigger: &Trigger,
        payload: &Value,
    ) -> Result<String, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct ExecutionHandle {
    execution_id: Value,
}

/// Gateway that talks to the workflow runtime over HTTP
pub struct HttpFlowGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFlowGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FlowGateway for HttpFlowGateway {
    #[instrument(skip(self, trigger, payload), fields(trigger_id = %trigger.id, flow_id = %trigger.flow_id))]
    async fn execute_flow_from_trigger(
        &self,
        trigger: &Trigger,
        payload: &Value,
    ) -> Result<String, GatewayError> {
        let url = format!("{}/flows/{}/executions", self.base_url, trigger.flow_id);
        let body = json!({
            "trigger_id": trigger.id,
            "trigger_type": trigger.trigger_type,
            "payload": payload,
        });

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Flow execution rejected by runtime");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let handle: ExecutionHandle = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let execution_id = match handle.execution_id {
            Value::String(id) if !id.is_empty() => id,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(GatewayError::InvalidResponse(format!(
                    "unusable execution_id: {}",
                    other
                )))
            }
        };

        tracing::debug!(flow_execution_id = %execution_id, "Flow execution started");
        Ok(execution_id)
    }
}
