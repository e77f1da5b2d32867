//! API Integration Tests
//!
//! Every test builds its own router over a temporary sled store and a manual
//! clock, so they run in parallel without touching the filesystem outside
//! temp directories.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use homeguard_core::{AppConfig, Clock};
use homeguard_web::create_router_for_testing;
use homeguard_web::testing::{create_test_app, test_user, TestApp};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower::ServiceExt;

/// Helper to create a test request
fn create_json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Attach the socket peer the server would have recorded
fn from_peer(mut request: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

fn login_request(name: &str, password: &str, peer: &str) -> Request<Body> {
    from_peer(
        create_json_request(
            "POST",
            "/control/login",
            Some(json!({ "name": name, "password": password })),
        ),
        peer,
    )
}

fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn basic_request(uri: &str, credentials: &str, peer: &str) -> Request<Body> {
    from_peer(
        Request::builder()
            .uri(uri)
            .header(
                header::AUTHORIZATION,
                format!("Basic {}", STANDARD.encode(credentials)),
            )
            .body(Body::empty())
            .unwrap(),
        peer,
    )
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// `agh_session=<hex>` from a login response
fn session_cookie(response: &Response) -> String {
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn app_with_users(users: &[(&str, &str)]) -> TestApp {
    let config = AppConfig {
        users: users
            .iter()
            .map(|(name, password)| test_user(name, password))
            .collect(),
        ..AppConfig::default()
    };
    create_test_app(config, false)
}

async fn login(app: &TestApp, name: &str, password: &str) -> String {
    let response = app
        .router
        .clone()
        .oneshot(login_request(name, password, "192.168.1.10:50000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    session_cookie(&response)
}

// =============================================================================
// Login / Session Tests
// =============================================================================

#[tokio::test]
async fn test_login_then_profile() {
    let app = app_with_users(&[("alice", "secret")]);

    let response = app
        .router
        .clone()
        .oneshot(login_request("alice", "secret", "192.168.1.10:50000"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "no-store, no-cache, must-revalidate, proxy-revalidate"
    );
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("agh_session="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));

    let cookie = session_cookie(&response);
    let response = app
        .router
        .clone()
        .oneshot(get_with_cookie("/control/profile", &cookie))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["name"], "alice");
}

#[tokio::test]
async fn test_tampered_cookie_rejected() {
    let app = app_with_users(&[("alice", "secret")]);
    let cookie = login(&app, "alice", "secret").await;

    // Same length, different token.
    let hex = cookie.trim_start_matches("agh_session=");
    let flipped: String = hex
        .chars()
        .map(|c| if c == '0' { '1' } else { '0' })
        .collect();
    let response = app
        .router
        .clone()
        .oneshot(get_with_cookie(
            "/control/profile",
            &format!("agh_session={flipped}"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(get_with_cookie("/control/profile", "agh_session=not-hex"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_wrong_password_forbidden() {
    let app = app_with_users(&[("alice", "secret")]);

    let response = app
        .router
        .clone()
        .oneshot(login_request("alice", "wrong", "192.168.1.10:50000"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_login_malformed_body() {
    let app = create_router_for_testing();

    let request = from_peer(
        Request::builder()
            .method("POST")
            .uri("/control/login")
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
        "192.168.1.10:50000",
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_without_remote_address() {
    let app = create_router_for_testing();

    let request = create_json_request(
        "POST",
        "/control/login",
        Some(json!({ "name": "admin", "password": "password123" })),
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_session_expires() {
    let mut config = AppConfig {
        users: vec![test_user("alice", "secret")],
        ..AppConfig::default()
    };
    config.auth.session_ttl_hours = 1;
    let app = create_test_app(config, false);
    let cookie = login(&app, "alice", "secret").await;

    app.clock.advance(chrono::Duration::minutes(61));

    let response = app
        .router
        .clone()
        .oneshot(get_with_cookie("/control/profile", &cookie))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.state.auth.sessions().is_empty());
}

#[tokio::test]
async fn test_expired_cookie_falls_back_to_basic() {
    let mut config = AppConfig {
        users: vec![test_user("alice", "secret")],
        ..AppConfig::default()
    };
    config.auth.session_ttl_hours = 1;
    let app = create_test_app(config, false);
    let cookie = login(&app, "alice", "secret").await;

    app.clock.advance(chrono::Duration::minutes(61));

    let mut request = basic_request("/control/profile", "alice:secret", "10.0.0.5:1234");
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["name"], "alice");
    assert!(app.state.auth.sessions().is_empty());
}

#[tokio::test]
async fn test_logout_clears_session() {
    let app = app_with_users(&[("alice", "secret")]);
    let cookie = login(&app, "alice", "secret").await;

    let response = app
        .router
        .clone()
        .oneshot(get_with_cookie("/control/logout", &cookie))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/login.html");
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("agh_session=;"));
    assert!(set_cookie.contains("Expires=Thu, 01 Jan 1970 00:00:00 GMT"));

    let response = app
        .router
        .clone()
        .oneshot(get_with_cookie("/control/profile", &cookie))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Rate Limiting Tests
// =============================================================================

#[tokio::test]
async fn test_rate_limit_blocks_address() {
    let mut config = AppConfig {
        users: vec![test_user("alice", "secret")],
        ..AppConfig::default()
    };
    config.auth.auth_attempts = 5;
    config.auth.block_auth_min = 1;
    let app = create_test_app(config, false);

    for _ in 0..5 {
        let response = app
            .router
            .clone()
            .oneshot(login_request("alice", "wrong", "10.0.0.1:40000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    // Blocked even with the right password.
    let response = app
        .router
        .clone()
        .oneshot(login_request("alice", "secret", "10.0.0.1:40001"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "60");

    let response = app
        .router
        .clone()
        .oneshot(login_request("alice", "secret", "10.0.0.2:40000"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_lifts_after_block() {
    let mut config = AppConfig {
        users: vec![test_user("alice", "secret")],
        ..AppConfig::default()
    };
    config.auth.auth_attempts = 2;
    config.auth.block_auth_min = 1;
    let app = create_test_app(config, false);

    for _ in 0..2 {
        app.router
            .clone()
            .oneshot(login_request("alice", "wrong", "10.0.0.1:40000"))
            .await
            .unwrap();
    }

    app.clock.advance(chrono::Duration::seconds(61));

    let response = app
        .router
        .clone()
        .oneshot(login_request("alice", "secret", "10.0.0.1:40000"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Gate Tests
// =============================================================================

#[tokio::test]
async fn test_protected_route_requires_auth() {
    let app = create_router_for_testing();

    let response = app.oneshot(get("/control/profile")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["status"], 401);
}

#[tokio::test]
async fn test_root_redirects_to_login_page() {
    let app = create_router_for_testing();

    let response = app.oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/login.html");
}

#[tokio::test]
async fn test_login_page_redirects_authenticated_user() {
    let app = app_with_users(&[("alice", "secret")]);
    let cookie = login(&app, "alice", "secret").await;

    let response = app
        .router
        .clone()
        .oneshot(get_with_cookie("/login.html", &cookie))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/");
}

#[tokio::test]
async fn test_public_resources_pass_through() {
    let app = create_router_for_testing();

    // No page is mounted, so the fallback answers instead of the gate.
    for uri in ["/login.html", "/assets/app.js", "/install.html"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn test_basic_auth() {
    let app = app_with_users(&[("alice", "secret")]);
    let credentials = STANDARD.encode("alice:secret");

    let request = from_peer(
        Request::builder()
            .uri("/control/profile")
            .header(header::AUTHORIZATION, format!("Basic {credentials}"))
            .body(Body::empty())
            .unwrap(),
        "10.0.0.5:1234",
    );
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["name"], "alice");

    let wrong = STANDARD.encode("alice:nope");
    let request = from_peer(
        Request::builder()
            .uri("/control/profile")
            .header(header::AUTHORIZATION, format!("Basic {wrong}"))
            .body(Body::empty())
            .unwrap(),
        "10.0.0.5:1234",
    );
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_basic_auth_shares_login_rate_limit() {
    let mut config = AppConfig {
        users: vec![test_user("alice", "secret")],
        ..AppConfig::default()
    };
    config.auth.auth_attempts = 3;
    config.auth.block_auth_min = 1;
    let app = create_test_app(config, false);

    for _ in 0..3 {
        let response = app
            .router
            .clone()
            .oneshot(basic_request("/control/profile", "alice:nope", "10.0.0.7:1000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Right credentials, blocked address.
    let response = app
        .router
        .clone()
        .oneshot(basic_request("/control/profile", "alice:secret", "10.0.0.7:1001"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(login_request("alice", "secret", "10.0.0.7:1002"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = app
        .router
        .clone()
        .oneshot(basic_request("/control/profile", "alice:secret", "10.0.0.8:1000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Both refusals are counted: one at the gate, one at the login endpoint.
    let response = app
        .router
        .clone()
        .oneshot(basic_request("/control/metrics", "alice:secret", "10.0.0.8:1001"))
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("homeguard_auth_rate_limited_total 2"));
    assert!(text.contains("homeguard_login_attempts_total{outcome=\"blocked\"} 1"));
}

#[tokio::test]
async fn test_malformed_basic_auth() {
    let app = create_router_for_testing();

    let request = from_peer(
        Request::builder()
            .uri("/control/profile")
            .header(header::AUTHORIZATION, "Basic !!!not-base64")
            .body(Body::empty())
            .unwrap(),
        "10.0.0.5:1234",
    );
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_no_users_bypasses_auth() {
    let app = create_test_app(AppConfig::default(), false);

    let response = app
        .router
        .clone()
        .oneshot(get("/control/profile"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["name"], "");
}

// =============================================================================
// Install Tests
// =============================================================================

#[tokio::test]
async fn test_install_creates_first_user() {
    let app = create_test_app(AppConfig::default(), true);

    let response = app
        .router
        .clone()
        .oneshot(get("/control/profile"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let short = from_peer(
        create_json_request(
            "POST",
            "/control/install/configure",
            Some(json!({ "username": "admin", "password": "short" })),
        ),
        "192.168.1.10:50000",
    );
    let response = app.router.clone().oneshot(short).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(app.state.auth.is_first_run());

    let request = from_peer(
        create_json_request(
            "POST",
            "/control/install/configure",
            Some(json!({ "username": "admin", "password": "long-enough" })),
        ),
        "192.168.1.10:50000",
    );
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!app.state.auth.is_first_run());
    assert_eq!(app.state.auth.users().len(), 1);

    // Installed: the gate is on and install is closed.
    let response = app
        .router
        .clone()
        .oneshot(get("/control/profile"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let again = from_peer(
        create_json_request(
            "POST",
            "/control/install/configure",
            Some(json!({ "username": "other", "password": "long-enough" })),
        ),
        "192.168.1.10:50000",
    );
    let response = app.router.clone().oneshot(again).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let cookie = login(&app, "admin", "long-enough").await;
    assert!(cookie.starts_with("agh_session="));
}

// =============================================================================
// Metrics Tests
// =============================================================================

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = app_with_users(&[("alice", "secret")]);
    let cookie = login(&app, "alice", "secret").await;

    let response = app
        .router
        .clone()
        .oneshot(get_with_cookie("/control/metrics", &cookie))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("homeguard_login_attempts_total{outcome=\"success\"} 1"));
    assert!(text.contains("homeguard_active_sessions 1"));
}

#[tokio::test]
async fn test_metrics_requires_auth() {
    let app = create_router_for_testing();

    let response = app.oneshot(get("/control/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Vendor Token Tests
// =============================================================================

#[tokio::test]
async fn test_vendor_token() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig {
        users: vec![test_user("alice", "secret")],
        ..AppConfig::default()
    };
    config.auth.glinet_mode = true;
    config.auth.glinet_token_prefix = format!("{}/gl_token_", dir.path().display());
    let app = create_test_app(config, false);

    let issued = app.clock.now().timestamp() + 60;
    let mut data = b"opaque".to_vec();
    data.extend_from_slice(&(issued as u32).to_ne_bytes());
    std::fs::write(dir.path().join("gl_token_abc123"), data).unwrap();

    let response = app
        .router
        .clone()
        .oneshot(get_with_cookie("/control/profile", "Admin-Token=abc123"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(get_with_cookie("/control/profile", "Admin-Token=missing"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Root goes to the vendor UI on the same host.
    let request = Request::builder()
        .uri("/")
        .header(header::HOST, "192.168.8.1:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "http://192.168.8.1");
}
