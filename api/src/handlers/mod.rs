pub mod executions;
pub mod health;
pub mod metrics;
pub mod triggers;
pub mod webhooks;

// Common response types
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::errors::{TriggerError, WebhookRejection};
use serde::Serialize;

/// Standard API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub trace_id: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn status(&self) -> StatusCode {
        match self.error.as_str() {
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "not_found" => StatusCode::NOT_FOUND,
            "method_not_allowed" => StatusCode::METHOD_NOT_ALLOWED,
            "validation_error" | "invalid_payload" => StatusCode::BAD_REQUEST,
            "trigger_disabled" => StatusCode::CONFLICT,
            "execution_error" => StatusCode::BAD_GATEWAY,
            "service_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<TriggerError> for ErrorResponse {
    fn from(err: TriggerError) -> Self {
        let code = match &err {
            TriggerError::NotFound(_) => "not_found",
            TriggerError::Disabled(_) => "trigger_disabled",
            TriggerError::Configuration(_) => "validation_error",
            TriggerError::TransientIo(_) | TriggerError::Execution(_) => "execution_error",
            TriggerError::Store(_) => "database_error",
            TriggerError::ServiceUnavailable => "service_unavailable",
        };
        if code == "database_error" {
            tracing::error!(error = %err, "Storage failure while handling request");
        }
        ErrorResponse::new(code, err.to_string())
    }
}

impl From<WebhookRejection> for ErrorResponse {
    fn from(rejection: WebhookRejection) -> Self {
        ErrorResponse::new(rejection.code(), rejection.to_string())
    }
}

/// Standard API success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for SuccessResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
