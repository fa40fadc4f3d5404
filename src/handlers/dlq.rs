use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

#[derive(Deserialize)]
pub struct DlqQuery {
    pub limit: Option<i64>,
}

pub async fn list_dlq(
    State(state): State<AppState>,
    Query(query): Query<DlqQuery>,
) -> Result<Json<Value>, AppError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let entries = state.dead_letters.list_dead_letters(limit).await?;

    Ok(Json(json!({
        "dlq_entries": entries,
        "count": entries.len()
    })))
}

pub async fn requeue_dlq(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    if !state.dead_letters.requeue(id).await? {
        return Err(AppError::NotFound(format!("DLQ entry {} not found", id)));
    }
    tracing::info!(dlq_id = %id, "DLQ entry requeued");

    Ok(Json(json!({
        "message": "DLQ entry requeued successfully",
        "dlq_id": id
    })))
}
