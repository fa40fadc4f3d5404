pub mod dlq;
pub mod exchange;
pub mod sub_account;
pub mod transactions;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use utoipa::OpenApi;

use crate::AppState;
use crate::health::{EventLogChecker, LedgerChecker, check_health};

#[derive(OpenApi)]
#[openapi(
    paths(
        exchange::submit_order,
        sub_account::create_sub_account,
        transactions::get_transaction,
    ),
    components(schemas(
        crate::domain::Order,
        crate::domain::NewSubAccount,
        crate::domain::SubAccount,
        crate::domain::AccountStatus,
        crate::domain::Transaction,
        crate::domain::TransactionStatus,
        exchange::SubmitOrderResponse,
    )),
    tags(
        (name = "Exchange", description = "Transfer intake and lookup"),
        (name = "Sub accounts", description = "Sub-account onboarding")
    )
)]
pub struct ApiDoc;

pub async fn openapi() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = check_health(
        LedgerChecker::new(state.ledger.clone()),
        EventLogChecker::new(state.event_log.clone()),
        state.start_time,
    )
    .await;

    // Return 503 only when the ledger store is down
    let status_code = if response.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(response))
}
