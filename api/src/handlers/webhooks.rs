use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, Method, Uri},
};
use std::net::SocketAddr;
use uuid::Uuid;

use crate::handlers::triggers::FireResponse;
use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::webhook::WebhookRequest;

/// Serve `/webhook/{trigger_id}` for every method; the trigger's own
/// configuration decides which method is accepted.
#[tracing::instrument(skip(state, headers, body))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(trigger_id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<SuccessResponse<FireResponse>, ErrorResponse> {
    // Malformed ids can never name a webhook
    let trigger_id = Uuid::parse_str(&trigger_id)
        .map_err(|_| ErrorResponse::new("not_found", "Webhook not found"))?;

    let request = WebhookRequest {
        method,
        uri,
        headers,
        client_addr: connect_info.map(|ConnectInfo(addr)| addr),
        body,
    };

    let execution_id = state
        .service
        .handle_webhook(trigger_id, request)
        .await
        .map_err(|rejection| {
            ErrorResponse::from(rejection)
                .with_details(serde_json::json!({ "trigger_id": trigger_id }))
        })?;

    Ok(SuccessResponse::new(FireResponse { execution_id }))
}
