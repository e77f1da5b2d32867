//! Prometheus exposition endpoint

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
};
use std::sync::Arc;

/// Prometheus metrics in text format
#[utoipa::path(
    get,
    path = "/control/metrics",
    tag = "metrics",
    responses(
        (status = 200, description = "Prometheus metrics", body = String, content_type = "text/plain"),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    )
)]
pub async fn metrics_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    state
        .metrics
        .active_sessions
        .set(state.auth.sessions().len() as i64);

    let body = state
        .metrics
        .render()
        .map_err(|e| AppError::Internal(format!("rendering metrics: {e}")))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}
