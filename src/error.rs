use std::error::Error;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorWrapper {
    error: ProblemDetails,
}

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    title: String,
    detail: Option<String>,
}

/// Application errors that can be automatically turned into an HTTP
/// response. Internal-only failure modes -- a failed push to a worker, a
/// duplicate shard result, a stale-shard reclaim, cache unavailability --
/// are deliberately not represented here: they're handled where they occur
/// and never reach an HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error")]
    Sqlx(#[from] sqlx::Error),

    #[error("json serialization error")]
    Serde(#[from] serde_json::Error),

    #[error("invalid token")]
    InvalidToken,

    #[error("user not found")]
    UserNotFound,

    #[error("task not found")]
    TaskNotFound,

    #[error("server not found")]
    ServerNotFound,

    #[error("insufficient credits: have {current}, need {required}")]
    InsufficientCredits { current: f64, required: f64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Sqlx(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::Sqlx(sqlx::Error::Database(_)) => StatusCode::BAD_REQUEST,
            AppError::Sqlx(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serde(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::TaskNotFound => StatusCode::NOT_FOUND,
            AppError::ServerNotFound => StatusCode::NOT_FOUND,
            AppError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(status = ?status, message = ?self, details = ?self.source());
        }

        let body = Json(ErrorWrapper {
            error: ProblemDetails {
                title: self.to_string(),
                detail: self.source().map(ToString::to_string),
            },
        });

        (status, body).into_response()
    }
}
