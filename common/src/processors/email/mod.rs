// Email processor: one polling loop per armed trigger over IMAP or POP3

pub mod imap;
pub mod message;
pub mod pop3;
pub mod transport;

use super::{
    execute_flow, fire_and_log, FirerHandle, ProcessContext, ProcessResult, Shutdown,
    TriggerProcessor,
};
use crate::errors::{ConfigError, MailError, TriggerError};
use crate::gateway::FlowGateway;
use crate::models::{Trigger, TriggerType};
use async_trait::async_trait;
use chrono::Utc;
use message::{parse_message, MessageFilter};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const TRIGGER_TYPE: &str = "email";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailProtocol {
    Imap,
    Pop3,
}

fn default_true() -> bool {
    true
}

fn default_folder() -> String {
    "INBOX".to_string()
}

/// Parsed email trigger configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    pub protocol: MailProtocol,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub use_ssl: bool,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default)]
    pub from_filter: Option<String>,
    #[serde(default)]
    pub subject_filter: Option<String>,
    #[serde(default)]
    pub body_filter: Option<String>,
    #[serde(default = "default_true")]
    pub unseen_only: bool,
    #[serde(default)]
    pub delete_after_read: bool,
    /// Seconds between polls
    #[serde(default)]
    pub check_interval: Option<u64>,
}

impl EmailConfig {
    pub fn from_config(config: &serde_json::Value) -> Result<Self, ConfigError> {
        let parsed: EmailConfig =
            serde_json::from_value(config.clone()).map_err(|e| ConfigError::InvalidShape {
                trigger_type: TRIGGER_TYPE.to_string(),
                reason: e.to_string(),
            })?;

        if parsed.host.trim().is_empty() {
            return Err(ConfigError::MissingField("host".to_string()));
        }
        if parsed.username.is_empty() {
            return Err(ConfigError::MissingField("username".to_string()));
        }
        if parsed.check_interval == Some(0) {
            return Err(ConfigError::InvalidFieldValue {
                field: "checkInterval".to_string(),
                reason: "must be at least one second".to_string(),
            });
        }
        Ok(parsed)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match (self.protocol, self.use_ssl) {
            (MailProtocol::Imap, true) => 993,
            (MailProtocol::Imap, false) => 143,
            (MailProtocol::Pop3, true) => 995,
            (MailProtocol::Pop3, false) => 110,
        })
    }

    fn query(&self) -> MailQuery {
        MailQuery {
            unseen_only: self.unseen_only && self.protocol == MailProtocol::Imap,
            from: self.from_filter.clone(),
            subject: self.subject_filter.clone(),
        }
    }

    fn filter(&self) -> MessageFilter {
        MessageFilter {
            from: self.from_filter.clone(),
            subject: self.subject_filter.clone(),
            body: self.body_filter.clone(),
        }
    }
}

/// Server-side narrowing hints; servers that cannot search ignore them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailQuery {
    pub unseen_only: bool,
    pub from: Option<String>,
    pub subject: Option<String>,
}

/// An authenticated mailbox session
#[async_trait]
pub trait MailboxClient: Send {
    /// Identifiers of candidate messages
    async fn list(&mut self, query: &MailQuery) -> Result<Vec<String>, MailError>;

    /// Whether the ids from the last `list` identify the same message in
    /// later sessions. POP3 message numbers do not.
    fn ids_are_stable(&self) -> bool {
        true
    }

    async fn retrieve(&mut self, id: &str) -> Result<Vec<u8>, MailError>;

    async fn delete(&mut self, id: &str) -> Result<(), MailError>;

    async fn logout(&mut self) -> Result<(), MailError>;
}

/// Opens mailbox sessions; replaced by a fake in tests
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self, config: &EmailConfig) -> Result<Box<dyn MailboxClient>, MailError>;
}

/// Connects over TCP, with TLS when `useSsl` is set
pub struct NetworkConnector;

#[async_trait]
impl MailboxConnector for NetworkConnector {
    async fn connect(&self, config: &EmailConfig) -> Result<Box<dyn MailboxClient>, MailError> {
        let conn = transport::MailConnection::open(&config.host, config.port(), config.use_ssl).await?;
        Ok(match config.protocol {
            MailProtocol::Imap => Box::new(
                imap::ImapClient::login(conn, &config.username, &config.password, &config.folder)
                    .await?,
            ),
            MailProtocol::Pop3 => {
                Box::new(pop3::Pop3Client::login(conn, &config.username, &config.password).await?)
            }
        })
    }
}

struct Poller {
    trigger_id: Uuid,
    config: EmailConfig,
    connector: Arc<dyn MailboxConnector>,
    firer: FirerHandle,
    shutdown: Shutdown,
    // Dedup keys of messages already handled by this poller
    processed: HashSet<String>,
}

impl Poller {
    /// One poll cycle. Returns the number of messages fired.
    async fn poll_once(&mut self) -> Result<usize, MailError> {
        let mut client = self.connector.connect(&self.config).await?;
        let result = self.drain(client.as_mut()).await;

        if let Err(e) = client.logout().await {
            debug!(trigger_id = %self.trigger_id, error = %e, "Mailbox logout failed");
        }
        result
    }

    async fn drain(&mut self, client: &mut dyn MailboxClient) -> Result<usize, MailError> {
        let ids = client.list(&self.config.query()).await?;
        // Session-local ids get reused once messages are deleted
        let stable_ids = client.ids_are_stable();
        let filter = self.config.filter();
        let mut fired = 0;

        for id in ids {
            if self.shutdown.requested() {
                break;
            }

            let id_key = format!("id:{}", id);
            if stable_ids && self.processed.contains(&id_key) {
                continue;
            }

            let raw = client.retrieve(&id).await?;
            if stable_ids {
                self.processed.insert(id_key);
            }

            let Some(record) = parse_message(&raw) else {
                warn!(trigger_id = %self.trigger_id, mailbox_id = %id, "Skipping unparsable message");
                continue;
            };

            // Without a stable id or a Message-ID the content itself is the key
            let content_key = match &record.message_id {
                Some(message_id) => Some(format!("mid:{}", message_id)),
                None if stable_ids => None,
                None => Some(format!("sha:{}", hex::encode(Sha256::digest(&raw)))),
            };
            if let Some(key) = content_key {
                if !self.processed.insert(key) {
                    continue;
                }
            }

            if !filter.matches(&record) {
                continue;
            }

            // A retrieve can outlast a teardown; nothing fires after it
            if self.shutdown.requested() {
                break;
            }

            let mut payload = serde_json::to_value(&record)
                .map_err(|e| MailError::Protocol(format!("unserializable message: {}", e)))?;
            payload["received_at"] = serde_json::Value::String(Utc::now().to_rfc3339());

            if !fire_and_log(&self.firer, self.trigger_id, payload).await {
                break;
            }
            fired += 1;

            if self.config.delete_after_read {
                client.delete(&id).await?;
            }
        }

        Ok(fired)
    }
}

/// Poll, then sleep, until shutdown. Poll failures never end the loop.
async fn run_poller(mut poller: Poller, interval: Duration) {
    let trigger_id = poller.trigger_id;
    loop {
        match poller.poll_once().await {
            Ok(fired) if fired > 0 => info!(%trigger_id, fired, "Mailbox poll fired messages"),
            Ok(_) => debug!(%trigger_id, "Mailbox poll found nothing new"),
            Err(e) => warn!(%trigger_id, error = %e, "Mailbox poll failed"),
        }

        if poller.shutdown.requested() {
            debug!(%trigger_id, "Mailbox poller stopping");
            return;
        }
        tokio::select! {
            biased;
            _ = poller.shutdown.wait() => {
                debug!(%trigger_id, "Mailbox poller stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        if poller.firer.strong_count() == 0 {
            return;
        }
    }
}

pub struct EmailProcessor {
    gateway: Arc<dyn FlowGateway>,
    firer: FirerHandle,
    connector: Arc<dyn MailboxConnector>,
    default_interval: Duration,
    pollers: Mutex<HashMap<Uuid, broadcast::Sender<()>>>,
}

impl EmailProcessor {
    pub fn new(
        gateway: Arc<dyn FlowGateway>,
        firer: FirerHandle,
        connector: Arc<dyn MailboxConnector>,
        default_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            firer,
            connector,
            default_interval,
            pollers: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_polling(&self, trigger_id: Uuid) -> bool {
        self.pollers
            .lock()
            .map(|pollers| pollers.contains_key(&trigger_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl TriggerProcessor for EmailProcessor {
    fn trigger_type(&self) -> TriggerType {
        TriggerType::Email
    }

    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    async fn setup(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        self.teardown(trigger).await?;

        let config = EmailConfig::from_config(&trigger.config)?;
        let interval = config
            .check_interval
            .map(Duration::from_secs)
            .unwrap_or(self.default_interval);

        info!(
            protocol = ?config.protocol,
            host = %config.host,
            interval_seconds = interval.as_secs(),
            "Mailbox polling armed"
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let poller = Poller {
            trigger_id: trigger.id,
            config,
            connector: self.connector.clone(),
            firer: self.firer.clone(),
            shutdown: Shutdown::new(shutdown_rx),
            processed: HashSet::new(),
        };
        tokio::spawn(run_poller(poller, interval));

        self.pollers
            .lock()
            .map_err(|_| TriggerError::ServiceUnavailable)?
            .insert(trigger.id, shutdown_tx);
        Ok(())
    }

    #[instrument(skip(self, trigger), fields(trigger_id = %trigger.id))]
    async fn teardown(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        let removed = self
            .pollers
            .lock()
            .map_err(|_| TriggerError::ServiceUnavailable)?
            .remove(&trigger.id);

        if let Some(shutdown_tx) = removed {
            let _ = shutdown_tx.send(());
            info!("Mailbox polling disarmed");
        }
        Ok(())
    }

    async fn process(&self, context: ProcessContext<'_>) -> Result<ProcessResult, TriggerError> {
        execute_flow(&self.gateway, context).await
    }
}
