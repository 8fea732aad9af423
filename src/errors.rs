use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// No owned credential and the shared pool is empty or benched.
    /// Users never learn which of the two it was.
    #[error("no eligible credential")]
    NoEligibleCredential,

    /// Missing, expired, or owned by someone else. Indistinguishable on purpose.
    #[error("task not found")]
    TaskNotFound,

    #[error("credential not found")]
    CredentialNotFound,

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::NoEligibleCredential => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable_error",
                "service_unavailable",
                "service temporarily unavailable, please try again later".to_string(),
            ),
            AppError::TaskNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "task_not_found",
                "task not found".to_string(),
            ),
            AppError::CredentialNotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "credential_not_found",
                "credential not found".to_string(),
            ),
            AppError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
                reason.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if matches!(self, AppError::NoEligibleCredential) {
            response.headers_mut().insert(
                "retry-after",
                axum::http::HeaderValue::from_static("60"),
            );
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::NoEligibleCredential.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AppError::TaskNotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::BadRequest("vendor is required".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("db down")).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unavailable_sets_retry_after() {
        let resp = AppError::NoEligibleCredential.into_response();
        assert_eq!(resp.headers().get("retry-after").unwrap(), "60");
    }
}
