//! Endpoint HTTP client tests against a mock endpoint.
//!
//! Covers:
//! - Login against remote and local endpoints
//! - Credential placement (token header for remote, cookie for local)
//! - 401 handling and session expiry
//! - Session CRUD request and response shapes

mod common;

use client::{ClientError, Endpoint, EndpointClient};
use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{closed_port_url, test_context};

fn remote_on(server: &MockServer, token: Option<&str>) -> Endpoint {
    let mut endpoint = Endpoint::remote("lab", &server.uri());
    endpoint.token = token.map(str::to_string);
    endpoint
}

fn has_header(request: &wiremock::Request, name: &str) -> bool {
    request.headers.contains_key(name)
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_authenticate_remote_stores_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .and(body_json(json!({ "password": "hunter2" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "token": "tok-1", "success": true })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    let mut endpoint = remote_on(&server, None);

    ctx.api().authenticate(&mut endpoint, "hunter2").await.unwrap();

    assert_eq!(endpoint.token.as_deref(), Some("tok-1"));
    assert!(endpoint.connected);
    assert!(!ctx.api().has_local_session());
}

#[tokio::test]
async fn test_authenticate_rejected_password() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    let mut endpoint = remote_on(&server, None);

    let err = ctx
        .api()
        .authenticate(&mut endpoint, "wrong")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Authentication { .. }));
    assert!(endpoint.token.is_none());
    assert!(!endpoint.connected);
}

#[tokio::test]
async fn test_authenticate_unreachable_endpoint() {
    let address = closed_port_url().await;
    let (ctx, _dir) = test_context(&address);
    let mut endpoint = Endpoint::remote("gone", &address);

    let err = ctx
        .api()
        .authenticate(&mut endpoint, "pw")
        .await
        .unwrap_err();

    assert!(err.is_connectivity(), "unexpected error: {:?}", err);
    assert!(endpoint.token.is_none());
}

#[tokio::test]
async fn test_authenticate_empty_token_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "token": "", "success": false })),
        )
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    let mut endpoint = remote_on(&server, None);

    let err = ctx.api().authenticate(&mut endpoint, "pw").await.unwrap_err();
    assert!(matches!(err, ClientError::Authentication { .. }));
}

#[tokio::test]
async fn test_login_local_sets_cookie_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "token": "cookie-tok", "success": true })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sessions"))
        .and(header("cookie", "ai_conductor_session=cookie-tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    ctx.api().login_local("pw").await.unwrap();
    assert!(ctx.api().has_local_session());

    let sessions = ctx.api().list_sessions(&Endpoint::local()).await.unwrap();
    assert!(sessions.is_empty());

    let requests = server.received_requests().await.unwrap();
    let list = requests.iter().find(|r| r.method.as_str() == "GET").unwrap();
    assert!(!has_header(list, "x-session-token"));
}

// ============================================================================
// Credential Placement
// ============================================================================

#[tokio::test]
async fn test_remote_calls_carry_token_header_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sessions"))
        .and(header("X-Session-Token", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "s1", "name": "build", "createdAt": "2024-05-01T10:00:00Z" },
            { "id": "s2", "name": "" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    // A local session must never leak to a remote endpoint.
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "token": "local", "success": true })),
        )
        .mount(&server)
        .await;
    ctx.api().login_local("pw").await.unwrap();

    let endpoint = remote_on(&server, Some("abc"));
    let sessions = ctx.api().list_sessions(&endpoint).await.unwrap();

    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, "s1");
    assert!(sessions[0].created_at.is_some());
    assert!(sessions[1].created_at.is_none());

    let requests = server.received_requests().await.unwrap();
    let list = requests.iter().find(|r| r.method.as_str() == "GET").unwrap();
    assert!(!has_header(list, "cookie"));
}

#[tokio::test]
async fn test_generic_request_returns_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "busy": true })))
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    let endpoint = remote_on(&server, Some("t"));

    let response = ctx
        .api()
        .request(&endpoint, Method::GET, "/api/status", None)
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 503);
    assert_eq!(response.body, Some(json!({ "busy": true })));
}

// ============================================================================
// Unauthorized Handling
// ============================================================================

#[tokio::test]
async fn test_remote_401_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    let endpoint = remote_on(&server, Some("stale"));

    match ctx.api().list_sessions(&endpoint).await {
        Err(ClientError::Unauthorized { endpoint_id }) => assert_eq!(endpoint_id, endpoint.id),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_local_401_expires_local_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "token": "t", "success": true })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    ctx.api().login_local("pw").await.unwrap();

    let err = ctx
        .api()
        .list_sessions(&Endpoint::local())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::SessionExpired));
    assert!(!ctx.api().has_local_session());
}

// ============================================================================
// Session Operations
// ============================================================================

#[tokio::test]
async fn test_list_sessions_null_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::Value::Null))
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    let endpoint = remote_on(&server, Some("t"));

    assert!(ctx.api().list_sessions(&endpoint).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_sessions_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sessions": 3 })))
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    let endpoint = remote_on(&server, Some("t"));

    let err = ctx.api().list_sessions(&endpoint).await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
}

#[tokio::test]
async fn test_create_session_posts_empty_object() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .and(body_json(json!({})))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "new-1", "name": "shell" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    let endpoint = remote_on(&server, Some("t"));

    let created = ctx.api().create_session(&endpoint).await.unwrap();
    assert_eq!(created.id, "new-1");
}

#[tokio::test]
async fn test_rename_and_delete_session() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/sessions/s1"))
        .and(body_json(json!({ "name": "deploy" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/sessions/s1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/sessions/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    let endpoint = remote_on(&server, Some("t"));

    ctx.api()
        .rename_session(&endpoint, "s1", "deploy")
        .await
        .unwrap();
    ctx.api().delete_session(&endpoint, "s1").await.unwrap();

    let err = ctx.api().delete_session(&endpoint, "gone").await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
}

#[tokio::test]
async fn test_server_error_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (ctx, _dir) = test_context(&server.uri());
    let endpoint = remote_on(&server, Some("t"));

    match ctx.api().create_session(&endpoint).await {
        Err(ClientError::Status { status, .. }) => assert_eq!(status, 500),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_client_rejects_invalid_local_url() {
    let mut config = client::Config::default();
    config.local.url = "not a url".to_string();
    assert!(EndpointClient::new(&config).is_err());
}
