use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::Execution;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

/// Paging parameters for execution history
#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Execution history of one trigger, newest first
#[tracing::instrument(skip(state))]
pub async fn list_executions(
    State(state): State<AppState>,
    Path(trigger_id): Path<Uuid>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<SuccessResponse<Vec<Execution>>, ErrorResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let offset = query.offset.unwrap_or(0);

    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ErrorResponse::new(
            "validation_error",
            format!("limit must be between 1 and {}", MAX_LIMIT),
        ));
    }
    if offset < 0 {
        return Err(ErrorResponse::new(
            "validation_error",
            "offset must not be negative",
        ));
    }

    let executions = state
        .service
        .list_executions(trigger_id, limit, offset)
        .await?;
    Ok(SuccessResponse::new(executions))
}
