//! API route definitions

use crate::handlers::{auth, install, metrics, profile};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use utoipa::OpenApi;

/// OpenAPI document for the control plane
#[derive(OpenApi)]
#[openapi(
    paths(
        auth::login_handler,
        auth::logout_handler,
        profile::profile_handler,
        install::configure_handler,
        metrics::metrics_handler,
    ),
    components(schemas(
        auth::LoginRequest,
        install::InstallRequest,
        profile::ProfileResponse,
        crate::error::ApiError,
    )),
    tags(
        (name = "auth", description = "Login, logout and the current user"),
        (name = "install", description = "First-run setup"),
        (name = "metrics", description = "Prometheus metrics"),
    )
)]
pub struct ApiDoc;

/// Create control-plane routes
///
/// Public and protected routes share one tree; which is which is decided by
/// the authentication gate, not by the router.
pub fn control_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/control/login", post(auth::login_handler))
        .route("/control/logout", get(auth::logout_handler))
        .route("/control/profile", get(profile::profile_handler))
        .route("/control/install/configure", post(install::configure_handler))
        .route("/control/metrics", get(metrics::metrics_handler))
        .route(
            "/control/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
}
