use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<crate::db::repo::VolumeError> for AppError {
    fn from(err: crate::db::repo::VolumeError) -> Self {
        use crate::db::repo::VolumeError;
        match err {
            VolumeError::InvalidLots { .. } => AppError::BadRequest(err.to_string()),
            VolumeError::StalePeriod { .. } => AppError::Conflict(err.to_string()),
            VolumeError::Period(_) => AppError::BadRequest(err.to_string()),
            VolumeError::Db(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<crate::db::repo::LedgerError> for AppError {
    fn from(err: crate::db::repo::LedgerError) -> Self {
        use crate::db::repo::LedgerError;
        match err {
            LedgerError::EntryNotFound(_) => AppError::NotFound(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<crate::engine::DistributionError> for AppError {
    fn from(err: crate::engine::DistributionError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<crate::engine::PayoutError> for AppError {
    fn from(err: crate::engine::PayoutError) -> Self {
        use crate::engine::PayoutError;
        match err {
            PayoutError::Period(_) => AppError::BadRequest(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
