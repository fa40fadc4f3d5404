use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::domain::NewSubAccount;
use crate::error::AppError;
use crate::AppState;

#[utoipa::path(
    post,
    path = "/sub_account/new",
    request_body = NewSubAccount,
    responses(
        (status = 201, description = "Sub-account created", body = crate::domain::SubAccount),
        (status = 400, description = "Malformed body"),
        (status = 409, description = "Account number already in use")
    ),
    tag = "Sub accounts"
)]
pub async fn create_sub_account(
    State(state): State<AppState>,
    payload: Result<Json<NewSubAccount>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(new_account) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    if new_account.account_number.trim().is_empty() {
        return Err(AppError::BadRequest("account_number must not be empty".to_string()));
    }

    let created = state
        .ledger
        .create_sub_account(&new_account.into_account())
        .await?;
    tracing::info!(account_number = %created.account_number, "Sub-account created");

    Ok((StatusCode::CREATED, Json(created)))
}
