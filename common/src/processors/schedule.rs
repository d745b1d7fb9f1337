// Schedule processor: timer-driven firing for cron, interval and one-time triggers

use super::{
    execute_flow, fire_and_log, FirerHandle, ProcessContext, ProcessResult, Shutdown, TriggerProcessor,
};
use crate::errors::TriggerError;
use crate::gateway::FlowGateway;
use crate::models::{Trigger, TriggerType};
use crate::schedule::ScheduleSpec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

struct ScheduledJob {
    spec: ScheduleSpec,
    shutdown_tx: broadcast::Sender<()>,
    // Detached on teardown, never aborted
    handle: JoinHandle<()>,
}

pub struct ScheduleProcessor {
    gateway: Arc<dyn FlowGateway>,
    firer: FirerHandle,
    jobs: Mutex<HashMap<Uuid, ScheduledJob>>,
}

impl ScheduleProcessor {
    pub fn new(gateway: Arc<dyn FlowGateway>, firer: FirerHandle) -> Self {
        Self {
            gateway,
            firer,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Look ahead `count` runs without touching the running job.
    ///
    /// Armed triggers use the schedule they were armed with so interval
    /// anchors line up with the real ticks.
    pub fn next_runs(
        &self,
        trigger: &Trigger,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>, TriggerError> {
        let now = Utc::now();
        let armed = self
            .jobs
            .lock()
            .map_err(|_| TriggerError::ServiceUnavailable)?
            .get(&trigger.id)
            .map(|job| job.spec.clone());

        let spec = match armed {
            Some(spec) => spec,
            None => ScheduleSpec::from_config(&trigger.config, now)?,
        };
        Ok(spec.upcoming(now, count))
    }

    pub fn is_scheduled(&self, trigger_id: Uuid) -> bool {
        self.jobs
            .lock()
            .map(|jobs| jobs.contains_key(&trigger_id))
            .unwrap_or(false)
    }

    fn remove_job(&self, trigger_id: Uuid) -> Result<Option<ScheduledJob>, TriggerError> {
        Ok(self
            .jobs
            .lock()
            .map_err(|_| TriggerError::ServiceUnavailable)?
            .remove(&trigger_id))
    }
}

/// Sleep until each run, fire, then persist the following run.
///
/// The firing itself happens outside the `select!` so a teardown that
/// arrives mid-fire lets the in-flight execution complete.
async fn run_schedule(
    trigger_id: Uuid,
    spec: ScheduleSpec,
    firer: FirerHandle,
    mut shutdown: Shutdown,
) {
    let mut cursor = Utc::now();

    while let Some(next) = spec.next_after(cursor) {
        let wait = (next - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                debug!(%trigger_id, "Schedule shutdown signal received");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let payload = json!({ "scheduled_time": next.to_rfc3339() });
        if !fire_and_log(&firer, trigger_id, payload).await {
            return;
        }

        // Missed ticks are not replayed
        cursor = next.max(Utc::now());
        let following = spec.next_after(cursor);

        let Some(service) = firer.upgrade() else {
            return;
        };
        if let Err(e) = service.record_next_run(trigger_id, following).await {
            warn!(%trigger_id, error = %e, "Failed to persist next run");
        }
    }

    info!(%trigger_id, "Schedule exhausted, no further runs");
}

#[async_trait]
impl TriggerProcessor for ScheduleProcessor {
    fn trigger_type(&self) -> TriggerType {
        TriggerType::Schedule
    }

    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    async fn setup(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        self.teardown(trigger).await?;

        let now = Utc::now();
        let spec = ScheduleSpec::from_config(&trigger.config, now)?;
        let next_run = spec.next_after(now);

        if let Some(service) = self.firer.upgrade() {
            service.record_next_run(trigger.id, next_run).await?;
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_schedule(
            trigger.id,
            spec.clone(),
            self.firer.clone(),
            Shutdown::new(shutdown_rx),
        ));

        self.jobs
            .lock()
            .map_err(|_| TriggerError::ServiceUnavailable)?
            .insert(
                trigger.id,
                ScheduledJob {
                    spec,
                    shutdown_tx,
                    handle,
                },
            );

        info!(next_run = ?next_run, "Schedule armed");
        Ok(())
    }

    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    async fn teardown(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        if let Some(job) = self.remove_job(trigger.id)? {
            // A sleeping task exits at once; a firing task exits after the fire
            let _ = job.shutdown_tx.send(());
            drop(job.handle);
            info!("Schedule disarmed");
        }
        Ok(())
    }

    async fn process(&self, context: ProcessContext<'_>) -> Result<ProcessResult, TriggerError> {
        execute_flow(&self.gateway, context).await
    }
}
