//! First-run installation
//!
//! Until the first user exists the control plane runs unauthenticated. The
//! configure endpoint creates that user and leaves first-run mode; afterwards
//! it answers 403.

use crate::audit::{audit_log, client_ip, AuditEvent};
use crate::auth::password::{validate_password, Password, PASSWORD_MIN_CHARS};
use crate::auth::User;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use utoipa::ToSchema;

/// Install request body
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct InstallRequest {
    pub username: String,
    pub password: String,
}

/// Create the first user
///
/// # Responses
///
/// * `200 OK` - User created, authentication is now required
/// * `400 Bad Request` - Malformed body
/// * `403 Forbidden` - Installation already completed
/// * `422 Unprocessable Entity` - Empty name or password too short
/// * `500 Internal Server Error` - Hashing or persisting failed
#[utoipa::path(
    post,
    path = "/control/install/configure",
    tag = "install",
    request_body = InstallRequest,
    responses(
        (status = 200, description = "Installation complete"),
        (status = 400, description = "Malformed request", body = crate::error::ApiError),
        (status = 403, description = "Already installed", body = crate::error::ApiError),
        (status = 422, description = "Invalid user", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn configure_handler(
    State(state): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let auth = state.auth.clone();
    if !auth.is_first_run() {
        return Err(AppError::Forbidden(
            "installation already completed".to_string(),
        ));
    }

    let request: InstallRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("install: decoding request: {e}")))?;

    if request.username.trim().is_empty() {
        return Err(AppError::Unprocessable("username is empty".to_string()));
    }
    if validate_password(&request.password).is_err() {
        return Err(AppError::Unprocessable(format!(
            "password must be at least {PASSWORD_MIN_CHARS} symbols long"
        )));
    }

    // Only one request may claim the installation.
    if !auth.finish_install() {
        return Err(AppError::Forbidden(
            "installation already completed".to_string(),
        ));
    }

    let login = request.username.clone();
    let creator = auth.clone();
    let password_config = state.password_config.clone();
    let created = tokio::task::spawn_blocking(move || -> Result<(), AppError> {
        let password = Password::hash_with_config(&request.password, &password_config)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let user = User::new(request.username, password)?;
        creator.users().create(user)?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Internal(format!("install task: {e}")))
    .and_then(|result| result);

    if let Err(e) = created {
        auth.restore_first_run();
        return Err(e);
    }

    tracing::info!(login = %login, "Installation complete");
    audit_log(&AuditEvent::UserCreated {
        login,
        ip_address: client_ip(
            &headers,
            connect.map(|ConnectInfo(addr)| addr.ip()),
            auth.trusted_proxies(),
        )
        .map(|ip| ip.to_string()),
    });

    Ok(StatusCode::OK)
}
