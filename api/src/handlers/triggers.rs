use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::{Trigger, TriggerDefinition, TriggerFilter, TriggerPatch, TriggerStatus};

const DEFAULT_PREVIEW_RUNS: usize = 5;
const MAX_PREVIEW_RUNS: usize = 100;

/// Query parameters for the next-runs preview
#[derive(Debug, Deserialize)]
pub struct NextRunsQuery {
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct NextRunsResponse {
    pub trigger_id: Uuid,
    pub next_runs: Vec<DateTime<Utc>>,
}

/// Outcome of a manual or webhook firing
#[derive(Debug, Serialize)]
pub struct FireResponse {
    pub execution_id: Uuid,
}

/// Register a trigger on a flow
#[tracing::instrument(skip(state, definition))]
pub async fn register_trigger(
    State(state): State<AppState>,
    Path(flow_id): Path<Uuid>,
    Json(definition): Json<TriggerDefinition>,
) -> Result<SuccessResponse<Trigger>, ErrorResponse> {
    let trigger = state.service.register_trigger(flow_id, definition).await?;

    tracing::info!(
        trigger_id = %trigger.id,
        trigger_type = %trigger.trigger_type,
        "Trigger created via API"
    );

    Ok(SuccessResponse::new(trigger))
}

/// List triggers, optionally filtered by flow, type and enabled flag
#[tracing::instrument(skip(state))]
pub async fn list_triggers(
    State(state): State<AppState>,
    Query(filter): Query<TriggerFilter>,
) -> Result<SuccessResponse<Vec<Trigger>>, ErrorResponse> {
    let triggers = state.service.list_triggers(&filter).await?;
    Ok(SuccessResponse::new(triggers))
}

#[tracing::instrument(skip(state))]
pub async fn get_trigger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<SuccessResponse<Trigger>, ErrorResponse> {
    Ok(SuccessResponse::new(state.service.get_trigger(id).await?))
}

/// Apply a partial update. The trigger type cannot be patched.
#[tracing::instrument(skip(state, patch))]
pub async fn update_trigger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<TriggerPatch>,
) -> Result<SuccessResponse<Trigger>, ErrorResponse> {
    let trigger = state.service.update_trigger(id, patch).await?;
    Ok(SuccessResponse::new(trigger))
}

#[tracing::instrument(skip(state))]
pub async fn delete_trigger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<SuccessResponse<Uuid>, ErrorResponse> {
    state.service.unregister_trigger(id).await?;
    Ok(SuccessResponse::new(id))
}

#[tracing::instrument(skip(state))]
pub async fn enable_trigger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<SuccessResponse<Trigger>, ErrorResponse> {
    let trigger = state
        .service
        .update_trigger(id, TriggerPatch::enabled(true))
        .await?;
    Ok(SuccessResponse::new(trigger))
}

#[tracing::instrument(skip(state))]
pub async fn disable_trigger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<SuccessResponse<Trigger>, ErrorResponse> {
    let trigger = state
        .service
        .update_trigger(id, TriggerPatch::enabled(false))
        .await?;
    Ok(SuccessResponse::new(trigger))
}

/// Manually fire a trigger; the body, if any, becomes the test payload
#[tracing::instrument(skip(state, payload))]
pub async fn test_trigger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<serde_json::Value>>,
) -> Result<SuccessResponse<FireResponse>, ErrorResponse> {
    let execution_id = state
        .service
        .test_trigger(id, payload.map(|Json(value)| value))
        .await?;
    Ok(SuccessResponse::new(FireResponse { execution_id }))
}

#[tracing::instrument(skip(state))]
pub async fn get_trigger_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<SuccessResponse<TriggerStatus>, ErrorResponse> {
    Ok(SuccessResponse::new(state.service.get_trigger_status(id).await?))
}

/// Preview upcoming runs of a schedule trigger
#[tracing::instrument(skip(state))]
pub async fn get_next_runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<NextRunsQuery>,
) -> Result<SuccessResponse<NextRunsResponse>, ErrorResponse> {
    let count = query.count.unwrap_or(DEFAULT_PREVIEW_RUNS);
    if count == 0 || count > MAX_PREVIEW_RUNS {
        return Err(ErrorResponse::new(
            "validation_error",
            format!("count must be between 1 and {}", MAX_PREVIEW_RUNS),
        ));
    }

    let next_runs = state.service.get_next_runs(id, count).await?;
    Ok(SuccessResponse::new(NextRunsResponse {
        trigger_id: id,
        next_runs,
    }))
}
