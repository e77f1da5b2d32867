//! API handlers

pub mod auth;
pub mod install;
pub mod metrics;
pub mod profile;

use crate::error::ApiError;
use axum::{http::StatusCode, Json};

/// Fallback for unknown paths
pub async fn not_found() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new("NOT_FOUND", "Not found")),
    )
}
