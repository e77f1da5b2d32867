//! Login and logout handlers
//!
//! A successful login creates a session and hands its token to the browser
//! in the `agh_session` cookie. Logout deletes the session and clears the
//! cookie.

use crate::audit::{audit_log, client_ip, extract_user_agent, AuditEvent};
use crate::auth::cookie::{
    build_session_cookie, build_session_cookie_clear, get_cookie_value, SESSION_COOKIE_NAME,
};
use crate::auth::middleware::{found, LOGIN_PAGE};
use crate::auth::rate_limit::retry_after_secs;
use crate::auth::SessionToken;
use crate::error::AppError;
use crate::middleware::metrics::{LOGIN_BLOCKED, LOGIN_FAILURE, LOGIN_SUCCESS};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use utoipa::ToSchema;

/// Login request body
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct LoginRequest {
    pub name: String,
    pub password: String,
}

/// Login with name and password
///
/// Verifies the credentials and issues a session cookie. Failed attempts are
/// counted per client address; after `auth_attempts` failures the address is
/// blocked for `block_auth_min` minutes.
///
/// # Responses
///
/// * `200 OK` - Session created, `Set-Cookie` carries the token
/// * `400 Bad Request` - Malformed body or unknown remote address
/// * `403 Forbidden` - Invalid name or password
/// * `429 Too Many Requests` - Address blocked, see `Retry-After`
/// * `500 Internal Server Error` - Session could not be stored
#[utoipa::path(
    post,
    path = "/control/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful"),
        (status = 400, description = "Malformed request", body = crate::error::ApiError),
        (status = 403, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 429, description = "Too many failed attempts", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: LoginRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("auth: decoding request: {e}")))?;

    let Some(ConnectInfo(peer)) = connect else {
        return Err(AppError::BadRequest(
            "auth: getting remote address".to_string(),
        ));
    };

    let auth = &state.auth;
    let identity = peer.ip().to_string();
    let ip_address = client_ip(&headers, Some(peer.ip()), auth.trusted_proxies())
        .map(|ip| ip.to_string());

    let left = auth.rate_limiter().check(&identity);
    if left > chrono::Duration::zero() {
        let secs = retry_after_secs(left);
        state.metrics.record_login(LOGIN_BLOCKED);
        audit_log(&AuditEvent::LoginBlocked {
            ip_address,
            retry_after_secs: secs,
        });
        return Err(AppError::TooManyRequests(secs));
    }

    let name = request.name.clone();
    let verifier = auth.clone();
    let user = tokio::task::spawn_blocking(move || {
        verifier.users().verify(&request.name, &request.password)
    })
    .await
    .map_err(|e| AppError::Internal(format!("password verification task: {e}")))?;

    let Some(user) = user else {
        auth.rate_limiter().record_failure(&identity);
        state.metrics.record_login(LOGIN_FAILURE);
        audit_log(&AuditEvent::LoginFailure {
            login: name,
            reason: "invalid credentials".to_string(),
            ip_address,
            user_agent: extract_user_agent(&headers),
        });
        return Err(AppError::Forbidden(
            "invalid username or password".to_string(),
        ));
    };

    auth.rate_limiter().clear(&identity);

    let creator = auth.clone();
    let login = user.login.clone();
    let session = tokio::task::spawn_blocking(move || creator.sessions().new_session(&login))
        .await
        .map_err(|e| AppError::Internal(format!("session task: {e}")))??;

    state.metrics.record_login(LOGIN_SUCCESS);
    state.metrics.active_sessions.set(auth.sessions().len() as i64);
    audit_log(&AuditEvent::LoginSuccess {
        login: user.login.to_string(),
        ip_address,
        user_agent: extract_user_agent(&headers),
    });

    let cookie = build_session_cookie(&session.token, auth.clock().now());

    Ok((
        StatusCode::OK,
        [
            (header::SET_COOKIE, cookie),
            (
                header::CACHE_CONTROL,
                "no-store, no-cache, must-revalidate, proxy-revalidate".to_string(),
            ),
            (header::PRAGMA, "no-cache".to_string()),
            (header::EXPIRES, "0".to_string()),
        ],
    )
        .into_response())
}

/// Logout the current session
///
/// Deletes the session named by the cookie, clears the cookie and redirects
/// to the login page. A missing or unknown cookie is not an error.
#[utoipa::path(
    get,
    path = "/control/logout",
    tag = "auth",
    responses(
        (status = 302, description = "Session removed, redirect to the login page"),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let auth = &state.auth;

    if let Some(token) =
        get_cookie_value(&headers, SESSION_COOKIE_NAME).and_then(|v| SessionToken::from_hex(&v))
    {
        if let Err(e) = auth.sessions().delete_by_token(&token) {
            tracing::error!(error = %e, "Failed to delete session");
        }
        state.metrics.active_sessions.set(auth.sessions().len() as i64);
    }

    audit_log(&AuditEvent::Logout {
        ip_address: client_ip(
            &headers,
            connect.map(|ConnectInfo(addr)| addr.ip()),
            auth.trusted_proxies(),
        )
        .map(|ip| ip.to_string()),
    });

    let mut response = found(LOGIN_PAGE);
    if let Ok(value) = build_session_cookie_clear().parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}
