// Integration tests for `UnifiClient` using wiremock.

use guardian_core::config::RouterConfig;
use guardian_core::model::MacAddress;
use guardian_core::traits::{AuthContext, RouterClient};
use guardian_core::Error;
use guardian_router_unifi::UnifiClient;
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, UnifiClient) {
    let server = MockServer::start().await;
    let config = RouterConfig {
        host: server.uri(),
        username: "admin".to_string(),
        password: SecretString::from("test-password".to_string()),
        ..RouterConfig::default()
    };
    let client = UnifiClient::new(&config).unwrap();
    (server, client)
}

fn ctx() -> AuthContext {
    AuthContext::new(Some("csrf-123".to_string()))
}

fn mac(s: &str) -> MacAddress {
    MacAddress::parse(s).unwrap()
}

// ── Authentication tests ────────────────────────────────────────────

#[tokio::test]
async fn test_login_captures_csrf_token() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({"username": "admin", "password": "test-password"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Csrf-Token", "csrf-123")
                .set_body_json(json!({})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let ctx = client.login().await.unwrap();
    assert_eq!(ctx.csrf_token.as_deref(), Some("csrf-123"));
}

#[tokio::test]
async fn test_login_failure() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let result = client.login().await;
    assert!(matches!(result, Err(Error::Auth(_))), "expected Auth error, got: {result:?}");
}

// ── Client list tests ───────────────────────────────────────────────

#[tokio::test]
async fn test_list_clients() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/proxy/network/api/s/default/stat/sta"))
        .and(header("x-csrf-token", "csrf-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"rc": "ok"},
            "data": [
                {"mac": "AA:BB:CC:DD:EE:01", "ip": "10.0.0.5", "hostname": "laptop"},
                {"mac": "aa:bb:cc:dd:ee:02", "ip": "10.0.0.6", "name": "Living Room TV"},
                {"mac": "aa:bb:cc:dd:ee:03"},
                {"mac": "not-a-mac", "ip": "10.0.0.8"}
            ]
        })))
        .mount(&server)
        .await;

    let clients = client.list_clients(&ctx()).await.unwrap();

    assert_eq!(clients.len(), 3);
    assert_eq!(clients[0].mac, mac("aa:bb:cc:dd:ee:01"));
    assert_eq!(clients[0].hostname.as_deref(), Some("laptop"));
    assert_eq!(clients[1].hostname.as_deref(), Some("Living Room TV"));
    assert_eq!(clients[2].ip, None);
    assert_eq!(clients[2].display_name(), "Unknown");
}

#[tokio::test]
async fn test_list_clients_expired_session() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/proxy/network/api/s/default/stat/sta"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client.list_clients(&ctx()).await;
    assert!(matches!(result, Err(Error::Fetch(_))), "expected Fetch error, got: {result:?}");
}

#[tokio::test]
async fn test_list_clients_malformed_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/proxy/network/api/s/default/stat/sta"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    assert!(matches!(client.list_clients(&ctx()).await, Err(Error::Fetch(_))));
}

// ── Station manager tests ───────────────────────────────────────────

#[tokio::test]
async fn test_block_and_unblock_commands() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/proxy/network/api/s/default/cmd/stamgr"))
        .and(header("x-csrf-token", "csrf-123"))
        .and(body_json(json!({"cmd": "block-sta", "mac": "aa:bb:cc:dd:ee:01"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"meta": {"rc": "ok"}, "data": []})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/proxy/network/api/s/default/cmd/stamgr"))
        .and(body_json(json!({"cmd": "unblock-sta", "mac": "aa:bb:cc:dd:ee:02"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"meta": {"rc": "ok"}, "data": []})))
        .expect(1)
        .mount(&server)
        .await;

    client.set_blocked(&ctx(), &mac("aa:bb:cc:dd:ee:01"), true).await.unwrap();
    client.set_blocked(&ctx(), &mac("aa:bb:cc:dd:ee:02"), false).await.unwrap();
}

#[tokio::test]
async fn test_block_http_failure() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/proxy/network/api/s/default/cmd/stamgr"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let result = client.set_blocked(&ctx(), &mac("aa:bb:cc:dd:ee:01"), true).await;
    match result {
        Err(Error::Enforcement { mac, message }) => {
            assert_eq!(mac, "aa:bb:cc:dd:ee:01");
            assert!(message.contains("500"), "{message}");
        }
        other => panic!("expected Enforcement error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_block_rejected_in_envelope() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/proxy/network/api/s/default/cmd/stamgr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"rc": "error", "msg": "api.err.UnknownStation"},
            "data": []
        })))
        .mount(&server)
        .await;

    let result = client.set_blocked(&ctx(), &mac("aa:bb:cc:dd:ee:01"), true).await;
    assert!(
        matches!(&result, Err(Error::Enforcement { message, .. }) if message.contains("UnknownStation")),
        "got: {result:?}"
    );
}

// ── Shared session tests ────────────────────────────────────────────

/// Controller login handler: every login starts a new session with its own
/// cookie and anti-forgery token, invalidating the previous pair.
struct RotatingLogin {
    sessions: Arc<AtomicUsize>,
}

impl Respond for RotatingLogin {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        ResponseTemplate::new(200)
            .insert_header("X-Csrf-Token", format!("csrf-{}", session).as_str())
            .insert_header("Set-Cookie", format!("TOKEN=t{}; Path=/", session).as_str())
            .set_body_json(json!({}))
    }
}

/// Station manager that only accepts the token/cookie pair of the latest login
struct SessionBoundStamgr {
    sessions: Arc<AtomicUsize>,
}

impl Respond for SessionBoundStamgr {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let session = self.sessions.load(Ordering::SeqCst);
        let token = request
            .headers
            .get("x-csrf-token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let cookie = request
            .headers
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if token == format!("csrf-{}", session) && cookie.contains(&format!("TOKEN=t{}", session)) {
            ResponseTemplate::new(200).set_body_json(json!({"meta": {"rc": "ok"}, "data": []}))
        } else {
            ResponseTemplate::new(403).set_body_string("Forbidden")
        }
    }
}

async fn mount_session_bound(server: &MockServer) {
    let sessions = Arc::new(AtomicUsize::new(0));
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(RotatingLogin { sessions: sessions.clone() })
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/proxy/network/api/s/default/cmd/stamgr"))
        .respond_with(SessionBoundStamgr { sessions })
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_block_after_another_login_uses_current_session() {
    let (server, client) = setup().await;
    mount_session_bound(&server).await;

    // The engine logs in and caches its context...
    let engine_ctx = client.login().await.unwrap();
    // ...then the firewall sync logs in through the same client.
    let sync_ctx = client.login().await.unwrap();
    assert_ne!(engine_ctx.csrf_token, sync_ctx.csrf_token);

    client
        .set_blocked(&engine_ctx, &mac("aa:bb:cc:dd:ee:01"), true)
        .await
        .unwrap();
    client
        .set_blocked(&sync_ctx, &mac("aa:bb:cc:dd:ee:01"), false)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stale_session_block_rejected_without_shared_token() {
    let (server, client) = setup().await;
    mount_session_bound(&server).await;
    client.login().await.unwrap();

    // A second client owns a different cookie jar and logs in afterwards
    let config = RouterConfig {
        host: server.uri(),
        username: "admin".to_string(),
        password: SecretString::from("test-password".to_string()),
        ..RouterConfig::default()
    };
    let other = UnifiClient::new(&config).unwrap();
    other.login().await.unwrap();

    let result = client
        .set_blocked(&ctx(), &mac("aa:bb:cc:dd:ee:01"), true)
        .await;
    assert!(matches!(result, Err(Error::Enforcement { .. })));
}

#[tokio::test]
async fn test_rotated_token_used_for_next_request() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/proxy/network/api/s/default/stat/sta"))
        .and(header("x-csrf-token", "csrf-123"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Updated-CSRF-Token", "csrf-rotated")
                .set_body_json(json!({"data": []})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/proxy/network/api/s/default/cmd/stamgr"))
        .and(header("x-csrf-token", "csrf-rotated"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"meta": {"rc": "ok"}})))
        .expect(1)
        .mount(&server)
        .await;

    client.list_clients(&ctx()).await.unwrap();
    client
        .set_blocked(&ctx(), &mac("aa:bb:cc:dd:ee:01"), true)
        .await
        .unwrap();
}
