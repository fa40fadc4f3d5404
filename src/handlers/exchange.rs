use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::Order;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitOrderResponse {
    pub transaction_id: Uuid,
}

#[utoipa::path(
    post,
    path = "/exchange_api/submit_order",
    request_body = Order,
    responses(
        (status = 201, description = "Order accepted", body = SubmitOrderResponse),
        (status = 400, description = "Malformed body or non-positive amount"),
        (status = 502, description = "Rejected by account validation"),
        (status = 503, description = "Ledger store unavailable")
    ),
    tag = "Exchange"
)]
pub async fn submit_order(
    State(state): State<AppState>,
    payload: Result<Json<Order>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let received_at = Utc::now();
    let Json(order) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let transaction_id = state.intake.submit_order(order, received_at).await?;

    Ok((StatusCode::CREATED, Json(SubmitOrderResponse { transaction_id })))
}
