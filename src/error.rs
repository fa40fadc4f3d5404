use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::ports::StoreError;
use crate::services::intake::IntakeError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Refused by a business rule. The message is shown to the caller as-is.
    #[error("{0}")]
    Rejected(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Rejected(_) => StatusCode::BAD_GATEWAY,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(key) => AppError::Conflict(format!("{} already exists", key)),
            StoreError::Corrupt(_) | StoreError::Consistency(_) => AppError::Internal(err.to_string()),
            _ => AppError::Unavailable(err.to_string()),
        }
    }
}

impl From<IntakeError> for AppError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::InvalidAmount(_) => AppError::BadRequest(err.to_string()),
            IntakeError::Rejected(rejection) => AppError::Rejected(rejection.to_string()),
            IntakeError::Store(store) => store.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", self);
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Leg, Rejection};

    #[test]
    fn test_rejected_error_status_code() {
        let error = AppError::Rejected("Sub account status is inactive".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_unavailable_error_status_code() {
        let error = AppError::from(StoreError::Unavailable("db down".to_string()));
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_database_error_status_code() {
        let error = AppError::from(StoreError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_duplicate_error_status_code() {
        let error = AppError::from(StoreError::Duplicate("ACC-1".to_string()));
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_bad_request_error_status_code() {
        let error = AppError::BadRequest("Bad request".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_intake_rejection_keeps_message() {
        let rejection = Rejection::InsufficientFunds {
            leg: Leg::From,
            account: "C".to_string(),
        };
        let error = AppError::from(IntakeError::Rejected(rejection));
        assert_eq!(
            error.to_string(),
            "Insufficient amount in sub account. Type: From, Number: C"
        );
    }

    #[tokio::test]
    async fn test_rejected_error_response() {
        let error = AppError::Rejected("Sub account information invalid".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_not_found_error_response() {
        let error = AppError::NotFound("Transaction not found".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
