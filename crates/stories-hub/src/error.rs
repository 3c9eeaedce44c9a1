//! Error responses. Every failure leaves the hub as `{"error": "<message>"}`.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use stories_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    /// An extractor refused the request; keeps the extractor's status.
    #[error("{1}")]
    Rejected(StatusCode, String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Rejected(status, _) => *status,
        }
    }

    /// Prefix the message, keeping the status.
    pub fn context(self, prefix: &str) -> Self {
        match self {
            ApiError::NotFound(m) => ApiError::NotFound(format!("{prefix}: {m}")),
            ApiError::BadRequest(m) => ApiError::BadRequest(format!("{prefix}: {m}")),
            ApiError::Conflict(m) => ApiError::Conflict(format!("{prefix}: {m}")),
            ApiError::Internal(m) => ApiError::Internal(format!("{prefix}: {m}")),
            ApiError::Rejected(s, m) => ApiError::Rejected(s, format!("{prefix}: {m}")),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ReloadInProgress => ApiError::Conflict(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("query task failed: {e}"))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::Rejected(e.status(), e.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::Rejected(e.status(), e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("{}", self);
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_status() {
        let conflict: ApiError = StoreError::ReloadInProgress.into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let internal: ApiError = StoreError::InvalidQuery("2 placeholders, 1 value".into()).into();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_context_keeps_status() {
        let err = ApiError::Internal("boom".into()).context("filter error");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "filter error: boom");
    }
}
