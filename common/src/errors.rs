// Error handling framework for the trigger engine

use axum::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

/// Engine-level errors surfaced by the trigger service and processors
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Trigger {0} is disabled")]
    Disabled(Uuid),

    #[error("Invalid trigger configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    #[error("Flow execution failed: {0}")]
    Execution(String),

    #[error("Storage failure: {0}")]
    Store(#[from] DatabaseError),

    #[error("Trigger service is no longer running")]
    ServiceUnavailable,
}

impl TriggerError {
    pub fn trigger_not_found(id: Uuid) -> Self {
        TriggerError::NotFound(format!("trigger {}", id))
    }

    pub fn flow_not_found(id: Uuid) -> Self {
        TriggerError::NotFound(format!("flow {}", id))
    }

    /// Short machine-readable label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerError::NotFound(_) => "not_found",
            TriggerError::Disabled(_) => "disabled",
            TriggerError::Configuration(_) => "configuration",
            TriggerError::TransientIo(_) => "transient_io",
            TriggerError::Execution(_) => "execution",
            TriggerError::Store(_) => "store",
            TriggerError::ServiceUnavailable => "service_unavailable",
        }
    }
}

/// Type-specific configuration problems detected at setup time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Malformed {trigger_type} configuration: {reason}")]
    InvalidShape {
        trigger_type: String,
        reason: String,
    },

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Watched path does not exist: {0}")]
    PathNotFound(String),

    #[error("Invalid JSON schema: {0}")]
    InvalidSchema(String),

    #[error("Operation not supported for {trigger_type} triggers: {operation}")]
    Unsupported {
        trigger_type: String,
        operation: String,
    },
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Errors returned by the flow execution gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    RequestFailed(String),

    #[error("Gateway rejected execution with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Gateway returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Mailbox transport failures during a single poll cycle
#[derive(Error, Debug)]
pub enum MailError {
    #[error("Mailbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("Mailbox authentication failed: {0}")]
    Authentication(String),

    #[error("Unexpected mailbox response: {0}")]
    Protocol(String),

    #[error("Mailbox connection timed out")]
    Timeout,
}

impl From<MailError> for TriggerError {
    fn from(err: MailError) -> Self {
        TriggerError::TransientIo(err.to_string())
    }
}

/// Reasons a webhook request is rejected before or during firing
#[derive(Error, Debug)]
pub enum WebhookRejection {
    #[error("Method {actual} not allowed, expected {expected}")]
    MethodNotAllowed { expected: String, actual: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Webhook not found")]
    NotFound,

    #[error("Webhook execution failed: {0}")]
    Failed(String),
}

impl WebhookRejection {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookRejection::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            WebhookRejection::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebhookRejection::InvalidPayload(_) | WebhookRejection::SchemaValidation(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookRejection::NotFound => StatusCode::NOT_FOUND,
            WebhookRejection::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            WebhookRejection::MethodNotAllowed { .. } => "method_not_allowed",
            WebhookRejection::Unauthorized(_) => "unauthorized",
            WebhookRejection::InvalidPayload(_) => "invalid_payload",
            WebhookRejection::SchemaValidation(_) => "validation_error",
            WebhookRejection::NotFound => "not_found",
            WebhookRejection::Failed(_) => "internal_error",
        }
    }
}

impl From<GatewayError> for TriggerError {
    fn from(err: GatewayError) -> Self {
        TriggerError::Execution(err.to_string())
    }
}

impl From<TriggerError> for WebhookRejection {
    fn from(err: TriggerError) -> Self {
        match err {
            TriggerError::NotFound(_) | TriggerError::Disabled(_) => WebhookRejection::NotFound,
            other => WebhookRejection::Failed(other.to_string()),
        }
    }
}

// Implement From for common external errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        "23503" => DatabaseError::ForeignKeyViolation(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::RequestFailed(err.to_string())
    }
}
