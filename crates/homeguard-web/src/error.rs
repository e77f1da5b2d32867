//! API error handling

use crate::auth::{RandomSourceError, SessionStoreError, UserStoreError};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "Authentication required")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    /// Caller must wait this many seconds
    TooManyRequests(i64),
    Unprocessable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ApiError::bad_request(msg)),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, ApiError::unauthorized()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, ApiError::forbidden(msg)),
            AppError::TooManyRequests(secs) => {
                let error = ApiError::new(
                    "TOO_MANY_REQUESTS",
                    format!("auth: blocked for {secs}s"),
                );
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, secs.to_string())],
                    Json(error),
                )
                    .into_response();
            }
            AppError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::new("UNPROCESSABLE_ENTITY", msg),
            ),
            // Details stay in the logs.
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal_error())
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<RandomSourceError> for AppError {
    fn from(err: RandomSourceError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<SessionStoreError> for AppError {
    fn from(err: SessionStoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<UserStoreError> for AppError {
    fn from(err: UserStoreError) -> Self {
        match err {
            UserStoreError::DuplicateLogin(_)
            | UserStoreError::EmptyLogin
            | UserStoreError::DuplicateId(_)
            | UserStoreError::EmptyId => AppError::Unprocessable(err.to_string()),
            UserStoreError::NotFound => AppError::Unauthorized,
            UserStoreError::RandomSource(_) | UserStoreError::Persist(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}
