use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Trigger Models
// ============================================================================

/// Event-detection mechanism a trigger is bound to. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Webhook,
    Schedule,
    Email,
    File,
}

impl TriggerType {
    pub const ALL: [TriggerType; 4] = [
        TriggerType::Webhook,
        TriggerType::Schedule,
        TriggerType::Email,
        TriggerType::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Webhook => "webhook",
            TriggerType::Schedule => "schedule",
            TriggerType::Email => "email",
            TriggerType::File => "file",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(TriggerType::Webhook),
            "schedule" => Ok(TriggerType::Schedule),
            "email" => Ok(TriggerType::Email),
            "file" => Ok(TriggerType::File),
            _ => Err(format!("Invalid trigger type: {}", s)),
        }
    }
}

impl TryFrom<String> for TriggerType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A persisted rule binding one event-detection mechanism to one flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Trigger {
    pub id: Uuid,
    pub flow_id: Uuid,
    #[sqlx(try_from = "String")]
    pub trigger_type: TriggerType,
    pub name: String,
    pub description: Option<String>,
    /// Type-specific configuration, interpreted only by the matching processor
    pub config: serde_json::Value,
    pub enabled: bool,
    pub webhook_path: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub fire_count: i64,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    /// Build a fresh trigger record for `flow_id` from a registration request
    pub fn new(flow_id: Uuid, definition: TriggerDefinition) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let webhook_path = match definition.trigger_type {
            TriggerType::Webhook => Some(webhook_path_for(id)),
            _ => None,
        };

        Self {
            id,
            flow_id,
            trigger_type: definition.trigger_type,
            name: definition.name,
            description: definition.description,
            config: definition.config,
            enabled: definition.enabled,
            webhook_path,
            next_run_at: None,
            last_fired_at: None,
            fire_count: 0,
            error_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a patch in place. The trigger type is never part of a patch.
    pub fn apply(&mut self, patch: TriggerPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = Some(description);
        }
        if let Some(config) = patch.config {
            self.config = config;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        self.updated_at = Utc::now();
    }
}

/// Server-generated path a webhook trigger is reachable at
pub fn webhook_path_for(trigger_id: Uuid) -> String {
    format!("/webhook/{}", trigger_id)
}

fn default_config() -> serde_json::Value {
    serde_json::json!({})
}

fn default_enabled() -> bool {
    true
}

/// Registration request for a new trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub trigger_type: TriggerType,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_config")]
    pub config: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Partial update for an existing trigger.
///
/// Unknown fields (including `trigger_type`) are rejected: changing the
/// detection mechanism requires deleting and recreating the trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl TriggerPatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }
}

/// Filter for trigger listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerFilter {
    pub flow_id: Option<Uuid>,
    pub trigger_type: Option<TriggerType>,
    pub enabled: Option<bool>,
}

impl TriggerFilter {
    pub fn matches(&self, trigger: &Trigger) -> bool {
        self.flow_id.map_or(true, |id| trigger.flow_id == id)
            && self
                .trigger_type
                .map_or(true, |t| trigger.trigger_type == t)
            && self.enabled.map_or(true, |e| trigger.enabled == e)
    }
}

// ============================================================================
// Execution Models
// ============================================================================

/// ExecutionStatus represents the lifecycle of one firing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failure,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failure => write!(f, "failure"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failure" => Ok(ExecutionStatus::Failure),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }
}

impl TryFrom<String> for ExecutionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One record of a single firing attempt and its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Execution {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub flow_execution_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ExecutionStatus,
    pub payload: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

impl Execution {
    /// Create a running execution for a trigger firing
    pub fn start(trigger_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id,
            flow_execution_id: None,
            status: ExecutionStatus::Running,
            payload,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error: None,
        }
    }

    pub fn succeed(&mut self, flow_execution_id: String, duration_ms: i64) {
        self.status = ExecutionStatus::Success;
        self.flow_execution_id = Some(flow_execution_id);
        self.completed_at = Some(Utc::now());
        self.duration_ms = Some(duration_ms);
        self.error = None;
    }

    pub fn fail(&mut self, error: String, duration_ms: i64) {
        self.status = ExecutionStatus::Failure;
        self.completed_at = Some(Utc::now());
        self.duration_ms = Some(duration_ms);
        self.error = Some(error);
    }
}

// ============================================================================
// Status Models
// ============================================================================

/// Health classification reported by status queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerHealth {
    Armed,
    Disarmed,
    Error,
}

/// Status snapshot for a single trigger
#[derive(Debug, Clone, Serialize)]
pub struct TriggerStatus {
    pub trigger_id: Uuid,
    pub trigger_type: TriggerType,
    pub enabled: bool,
    pub health: TriggerHealth,
    pub message: Option<String>,
    pub fire_count: i64,
    pub error_count: i64,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub recent_executions: Vec<Execution>,
}
