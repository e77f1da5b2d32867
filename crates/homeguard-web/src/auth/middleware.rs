//! Authentication gate for the control plane
//!
//! Every request goes through [`auth_middleware`], which decides in order:
//! 1. First run or no users configured: pass through
//! 2. Login page: redirect an already authenticated caller to `/`
//! 3. Other public resources: pass through
//! 4. Resolve an identity from the vendor token (GL-Inet mode), else the
//!    session cookie, else HTTP Basic credentials
//! 5. Unauthenticated: redirect the root page to the login page, reject
//!    everything else with 401
//!
//! On success the identity is added to request extensions and can be
//! extracted in handlers using `Extension<AuthenticatedUser>`.

use super::cookie::{get_cookie_value, parse_basic_auth, SESSION_COOKIE_NAME};
use super::rate_limit::retry_after_secs;
use super::glinet::GLINET_COOKIE_NAME;
use super::session::SessionCheck;
use super::token::SessionToken;
use super::users::Login;
use super::Auth;
use crate::audit::{audit_log, client_ip, AuditEvent};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;

/// Path of the login page
pub const LOGIN_PAGE: &str = "/login.html";

/// How the caller was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Session,
    Basic,
    Vendor,
}

/// Identity attached to authenticated requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Resolved login; `None` for vendor tokens, which carry no user
    pub login: Option<Login>,
    pub method: AuthMethod,
}

impl AuthenticatedUser {
    /// Login name, empty for vendor tokens
    pub fn name(&self) -> &str {
        self.login.as_ref().map_or("", Login::as_str)
    }
}

/// Authentication middleware errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Malformed Authorization header")]
    MalformedCredentials,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            AuthError::MalformedCredentials => {
                (StatusCode::BAD_REQUEST, "Malformed Authorization header")
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Paths reachable without authentication
pub fn is_public_resource(path: &str) -> bool {
    const PUBLIC_PATHS: &[&str] = &[
        "/dns-query",
        "/control/login",
        "/apple/doh.mobileconfig",
        "/apple/dot.mobileconfig",
        "/control/install/get_addresses",
        "/control/install/check_config",
        "/control/install/configure",
        "/install.html",
    ];

    matches_single_segment(path, "/assets/")
        || matches_single_segment(path, "/login.")
        || path.starts_with("/dns-query/")
        || PUBLIC_PATHS.contains(&path)
}

// Glob-style `<prefix>*`, where `*` does not cross a `/`.
fn matches_single_segment(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| !rest.contains('/'))
}

fn is_root_page(path: &str) -> bool {
    path == "/" || path == "/index.html"
}

/// Respond with 302 Found
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Socket peer address, never taken from headers
pub fn peer_ip(request: &Request) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Authentication middleware gating every control-plane route
///
/// # Usage
///
/// ```ignore
/// let app = auth.wrap(Router::new().route("/control/profile", get(profile)));
/// ```
pub async fn auth_middleware(
    State(auth): State<Arc<Auth>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !auth.needs_authentication() {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let peer = peer_ip(&request);

    if path == LOGIN_PAGE {
        return match resolve_identity(&auth, request.headers(), peer).await {
            Ok(Some(_)) => found("/"),
            _ => next.run(request).await,
        };
    }

    if is_public_resource(&path) {
        return next.run(request).await;
    }

    match resolve_identity(&auth, request.headers(), peer).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Ok(None) if is_root_page(&path) => match auth.glinet() {
            Some(_) => found(&vendor_login_url(request.headers())),
            None => found(LOGIN_PAGE),
        },
        Ok(None) => {
            tracing::debug!(path = %path, "Unauthenticated request rejected");
            AuthError::Unauthenticated.into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Resolve the caller's identity
///
/// `Ok(None)` means the request carries no valid credentials. Only a
/// malformed Basic header is an error.
pub async fn resolve_identity(
    auth: &Arc<Auth>,
    headers: &HeaderMap,
    peer: Option<IpAddr>,
) -> Result<Option<AuthenticatedUser>, AuthError> {
    if auth.glinet().is_some() {
        return Ok(vendor_identity(auth, headers).await);
    }

    if let Some(user) = session_identity(auth, headers) {
        return Ok(Some(user));
    }

    basic_identity(auth, headers, peer).await
}

async fn vendor_identity(auth: &Arc<Auth>, headers: &HeaderMap) -> Option<AuthenticatedUser> {
    let token = get_cookie_value(headers, GLINET_COOKIE_NAME)?;

    let auth = auth.clone();
    let valid = tokio::task::spawn_blocking(move || {
        auth.glinet()
            .is_some_and(|checker| checker.is_authenticated(&token))
    })
    .await
    .unwrap_or(false);

    valid.then_some(AuthenticatedUser {
        login: None,
        method: AuthMethod::Vendor,
    })
}

fn session_identity(auth: &Auth, headers: &HeaderMap) -> Option<AuthenticatedUser> {
    let value = get_cookie_value(headers, SESSION_COOKIE_NAME)?;
    let Some(token) = SessionToken::from_hex(&value) else {
        tracing::debug!("Malformed session cookie");
        return None;
    };

    let session = match auth.sessions().check_session(&token) {
        SessionCheck::Valid(session) => session,
        SessionCheck::Expired => {
            tracing::debug!(token = ?token, "Session cookie expired");
            return None;
        }
        SessionCheck::NotFound => return None,
    };

    // Sessions outliving their user resolve to nobody.
    let user = auth.users().by_login(session.login.as_str()).ok()?;

    Some(AuthenticatedUser {
        login: Some(user.login.clone()),
        method: AuthMethod::Session,
    })
}

async fn basic_identity(
    auth: &Arc<Auth>,
    headers: &HeaderMap,
    peer: Option<IpAddr>,
) -> Result<Option<AuthenticatedUser>, AuthError> {
    let Some(credentials) = parse_basic_auth(headers).map_err(|_| AuthError::MalformedCredentials)?
    else {
        return Ok(None);
    };

    // Without a socket peer there is no rate-limit bucket to charge.
    let Some(peer) = peer else {
        tracing::debug!("Basic credentials without peer address ignored");
        return Ok(None);
    };
    let identity = peer.to_string();

    let left = auth.rate_limiter().check(&identity);
    if left > chrono::Duration::zero() {
        auth.record_blocked();
        audit_log(&AuditEvent::LoginBlocked {
            ip_address: client_ip(headers, Some(peer), auth.trusted_proxies())
                .map(|ip| ip.to_string()),
            retry_after_secs: retry_after_secs(left),
        });
        return Ok(None);
    }

    let login = credentials.login.clone();
    let verifier = auth.clone();
    let user = tokio::task::spawn_blocking(move || {
        verifier
            .users()
            .verify(&credentials.login, &credentials.password)
    })
    .await
    .ok()
    .flatten();

    match user {
        Some(user) => {
            auth.rate_limiter().clear(&identity);
            Ok(Some(AuthenticatedUser {
                login: Some(user.login.clone()),
                method: AuthMethod::Basic,
            }))
        }
        None => {
            auth.rate_limiter().record_failure(&identity);
            audit_log(&AuditEvent::BasicAuthFailure {
                login,
                ip_address: client_ip(headers, Some(peer), auth.trusted_proxies())
                    .map(|ip| ip.to_string()),
            });
            Ok(None)
        }
    }
}

/// Login page of the vendor UI: the request host without its port
fn vendor_login_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    format!("http://{}", strip_port(host))
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}
