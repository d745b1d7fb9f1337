use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use common::TriggerService;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TriggerService>,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn new(service: Arc<TriggerService>, metrics: PrometheusHandle) -> Self {
        Self { service, metrics }
    }
}
