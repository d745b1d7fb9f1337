// Trigger processors: one per event-detection mechanism
//
// A processor arms a trigger's detection mechanism (`setup`), disarms it
// (`teardown`), and runs the downstream flow for a firing (`process`).
// Detected events are handed back to the owning service through a weak
// `TriggerFirer` handle; processors never write to the store themselves.

pub mod email;
pub mod file;
pub mod schedule;
pub mod webhook;

use crate::errors::TriggerError;
use crate::gateway::FlowGateway;
use crate::models::{Trigger, TriggerType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::TryRecvError};
use uuid::Uuid;

pub use email::EmailProcessor;
pub use file::FileProcessor;
pub use schedule::ScheduleProcessor;
pub use webhook::WebhookProcessor;

/// Callback surface the service exposes to its processors
#[async_trait]
pub trait TriggerFirer: Send + Sync {
    /// Fire a trigger, returning the execution id
    async fn fire_trigger(&self, trigger_id: Uuid, payload: Value) -> Result<Uuid, TriggerError>;

    /// Persist the next scheduled run of a schedule trigger
    async fn record_next_run(
        &self,
        trigger_id: Uuid,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), TriggerError>;
}

/// Weak back-reference from a processor to the service that owns it
pub type FirerHandle = Weak<dyn TriggerFirer>;

/// Input to [`TriggerProcessor::process`]
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext<'a> {
    pub trigger: &'a Trigger,
    pub execution_id: Uuid,
    pub payload: &'a Value,
}

/// Outcome of a successful `process` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub flow_execution_id: String,
}

#[async_trait]
pub trait TriggerProcessor: Send + Sync {
    fn trigger_type(&self) -> TriggerType;

    /// Arm the trigger. Re-arming an armed trigger tears it down first.
    async fn setup(&self, trigger: &Trigger) -> Result<(), TriggerError>;

    /// Disarm the trigger; a no-op when it is not armed
    async fn teardown(&self, trigger: &Trigger) -> Result<(), TriggerError>;

    /// Run the downstream flow for one firing
    async fn process(&self, context: ProcessContext<'_>) -> Result<ProcessResult, TriggerError>;
}

/// Shared `process` implementation: hand the payload to the gateway
pub(crate) async fn execute_flow(
    gateway: &Arc<dyn FlowGateway>,
    context: ProcessContext<'_>,
) -> Result<ProcessResult, TriggerError> {
    let flow_execution_id = gateway
        .execute_flow_from_trigger(context.trigger, context.payload)
        .await?;

    tracing::debug!(
        trigger_id = %context.trigger.id,
        execution_id = %context.execution_id,
        flow_execution_id = %flow_execution_id,
        "Flow execution started"
    );

    Ok(ProcessResult { flow_execution_id })
}

/// Fire through the weak service handle, logging instead of propagating.
///
/// Used by background detection loops, which keep running after a failed
/// firing. Returns false once the service is gone.
pub(crate) async fn fire_and_log(firer: &FirerHandle, trigger_id: Uuid, payload: Value) -> bool {
    let Some(service) = firer.upgrade() else {
        return false;
    };

    match service.fire_trigger(trigger_id, payload).await {
        Ok(execution_id) => {
            tracing::info!(%trigger_id, %execution_id, "Trigger fired");
        }
        Err(e) => {
            tracing::warn!(%trigger_id, error = %e, kind = e.kind(), "Trigger firing failed");
        }
    }
    true
}

/// Teardown signal as seen by one background detection loop.
///
/// Once observed the signal stays raised. A dropped sender counts as a
/// signal, since teardown drops it right after sending.
pub(crate) struct Shutdown {
    rx: broadcast::Receiver<()>,
    raised: bool,
}

impl Shutdown {
    pub(crate) fn new(rx: broadcast::Receiver<()>) -> Self {
        Self { rx, raised: false }
    }

    /// Non-blocking check, made before each unit of work
    pub(crate) fn requested(&mut self) -> bool {
        if !self.raised {
            self.raised = !matches!(self.rx.try_recv(), Err(TryRecvError::Empty));
        }
        self.raised
    }

    /// Resolves when teardown is signalled. Cancel safe.
    pub(crate) async fn wait(&mut self) {
        if !self.raised {
            let _ = self.rx.recv().await;
            self.raised = true;
        }
    }
}
