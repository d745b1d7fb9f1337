// Shared fixtures for the common crate's integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use common::config::EngineConfig;
use common::db::InMemoryStore;
use common::errors::{GatewayError, MailError};
use common::gateway::FlowGateway;
use common::models::Trigger;
use common::processors::email::{EmailConfig, MailboxClient, MailboxConnector};
use common::TriggerService;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Gateway that either always succeeds or always fails with a fixed message
#[derive(Default)]
pub struct StubGateway {
    failure: Option<String>,
    calls: AtomicUsize,
}

impl StubGateway {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlowGateway for StubGateway {
    async fn execute_flow_from_trigger(
        &self,
        _trigger: &Trigger,
        _payload: &Value,
    ) -> Result<String, GatewayError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(GatewayError::RequestFailed(message.clone())),
            None => Ok(format!("flow-exec-{}", call + 1)),
        }
    }
}

pub struct NoMail;

#[async_trait]
impl MailboxConnector for NoMail {
    async fn connect(&self, _config: &EmailConfig) -> Result<Box<dyn MailboxClient>, MailError> {
        Err(MailError::Protocol("no mail server in tests".to_string()))
    }
}

/// A service over a fresh in-memory store holding one flow
pub async fn service_with(
    gateway: Arc<StubGateway>,
) -> (Arc<TriggerService>, Arc<InMemoryStore>, Uuid) {
    let store = Arc::new(InMemoryStore::new());
    let flow_id = Uuid::new_v4();
    store.add_flow(flow_id).await;

    let service = TriggerService::new(
        store.clone(),
        store.clone(),
        gateway,
        &EngineConfig::default(),
        Arc::new(NoMail),
    );
    (service, store, flow_id)
}
