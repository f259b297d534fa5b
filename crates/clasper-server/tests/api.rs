// clasper-server/tests/api.rs
// ============================================================================
// Module: HTTP API Integration Tests
// Description: Exercises the `/v1` route table end-to-end over a real
// SQLite-backed AppState, without a bound socket.
// Purpose: Catch wiring mistakes between handlers, the store, and the
// identity verifier that unit tests inside each handler module cannot see.
// Dependencies: clasper-core, clasper-config, clasper-providers,
// clasper-server, axum, tower, jsonwebtoken
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions and fixtures are permitted."
)]

use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use clasper_config::ClasperConfig;
use clasper_config::DevConfig;
use clasper_config::IdentityConfig;
use clasper_config::TlsConfig;
use clasper_server::api;
use clasper_server::state::AppState;
use http_body_util::BodyExt;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use serde_json::Value;
use serde_json::json;
use tower::ServiceExt;

const AGENT_SECRET: &str = "test-agent-secret";

/// Keeps the temp directory alive for the life of an [`AppState`] under test.
struct TestApp {
    _dir: tempfile::TempDir,
    state: AppState,
}

fn test_config(dir: &std::path::Path) -> ClasperConfig {
    ClasperConfig {
        identity: IdentityConfig { agent_jwt_secret: Some(AGENT_SECRET.to_string()), ..IdentityConfig::default() },
        decision_token_secret: Some("decision-token-secret".to_string()),
        tool_token_secret: Some("tool-token-secret".to_string()),
        telemetry_signature_mode: clasper_config::EnforcementMode::Warn,
        telemetry_max_skew_seconds: 300,
        tool_auth_mode: clasper_config::EnforcementMode::Warn,
        policy_path: None,
        db_path: dir.join("clasper.sqlite3"),
        dev: DevConfig { no_auth: false, is_production: false },
        bind_addr: "127.0.0.1:0".parse::<SocketAddr>().expect("addr"),
        tls: TlsConfig::default(),
        max_payload_bytes: 1_048_576,
        approval_ttl_seconds: 3_600,
        grant_ttl_seconds: 3_600,
        store_retry_attempts: 3,
        jwks_cache_ttl_seconds: 300,
    }
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let state = AppState::new(config).expect("app state");
    TestApp { _dir: dir, state }
}

fn router(app: &TestApp) -> Router {
    api::router(app.state.clone())
}

/// Mints a well-formed HS256 backend token scoped to `tenant`.
fn backend_token(tenant: &str) -> String {
    let claims = json!({
        "exp": 9_999_999_999i64,
        "tenant_id": tenant,
        "token_kind": "backend",
        "roles": ["ops"],
    });
    jsonwebtoken::encode(&Header::new(jsonwebtoken::Algorithm::HS256), &claims, &EncodingKey::from_secret(AGENT_SECRET.as_bytes()))
        .expect("mint token")
}

fn request(method: &str, uri: &str, tenant: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(tenant) = tenant {
        builder = builder.header("authorization", format!("Bearer {}", backend_token(tenant)));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&value).expect("serialize body"))
        }
        None => Body::empty(),
    };
    builder.body(body).expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.expect("collect body").to_bytes();
    serde_json::from_slice(&bytes).expect("parse json body")
}

fn adapter_registration(tenant: &str, adapter: &str) -> Value {
    json!({
        "tenant_id": tenant,
        "adapter_id": adapter,
        "version": "1.0.0",
        "display_name": "Test Adapter",
        "risk_class": "low",
        "capabilities": ["fs.read"],
        "enabled": true,
        "active_key": null,
    })
}

fn empty_conditions() -> Value {
    json!({
        "tool": null,
        "adapter_risk_class": null,
        "skill_state": null,
        "risk_level": null,
        "min_cost": null,
        "max_cost": null,
        "capability": null,
        "context": null,
        "provenance": null,
    })
}

fn execution_request(tenant: &str, adapter: &str) -> Value {
    json!({
        "execution_id": "exec-1",
        "adapter_id": adapter,
        "tenant_id": tenant,
        "workspace_id": "ws-1",
        "skill_id": null,
        "requested_capabilities": ["fs.read"],
        "intent": "read a file",
        "context": null,
        "provenance": null,
        "estimated_cost": null,
        "tool_count": null,
        "environment": null,
    })
}

#[tokio::test]
async fn missing_bearer_token_is_rejected() {
    let app = test_app();
    let response = router(&app).oneshot(request("GET", "/v1/policies", None, None)).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn policy_upsert_then_list_round_trips() {
    let app = test_app();
    let policy = json!({
        "policy_id": "p-1",
        "scope": {"tenant_id": "tenant-a", "workspace_id": null, "environment": null},
        "subject": {"type": "adapter", "name": null},
        "conditions": empty_conditions(),
        "effect": "deny",
        "required_role": null,
        "enabled": true,
    });

    let upsert = router(&app).oneshot(request("PUT", "/v1/policies", Some("tenant-a"), Some(policy))).await.expect("response");
    assert_eq!(upsert.status(), StatusCode::OK);

    let list = router(&app).oneshot(request("GET", "/v1/policies", Some("tenant-a"), None)).await.expect("response");
    assert_eq!(list.status(), StatusCode::OK);
    let body = json_body(list).await;
    let entries = body.as_array().expect("array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["policy_id"], "p-1");
}

#[tokio::test]
async fn policy_upsert_rejects_tenant_mismatch() {
    let app = test_app();
    let policy = json!({
        "policy_id": "p-1",
        "scope": {"tenant_id": "tenant-b", "workspace_id": null, "environment": null},
        "subject": {"type": "adapter", "name": null},
        "conditions": empty_conditions(),
        "effect": "allow",
        "required_role": null,
        "enabled": true,
    });

    let response = router(&app).oneshot(request("PUT", "/v1/policies", Some("tenant-a"), Some(policy))).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn adapter_lifecycle_enroll_disable_and_key_rotation() {
    let app = test_app();
    let registration = adapter_registration("tenant-a", "adapter-1");

    let enroll = router(&app).oneshot(request("PUT", "/v1/adapters", Some("tenant-a"), Some(registration))).await.expect("response");
    assert_eq!(enroll.status(), StatusCode::OK);

    let list = router(&app).oneshot(request("GET", "/v1/adapters", Some("tenant-a"), None)).await.expect("response");
    let body = json_body(list).await;
    assert_eq!(body.as_array().expect("array").len(), 1);

    let set_key = json!({"algorithm": "ED25519", "public_jwk": {"kty": "OKP"}});
    let key_response = router(&app)
        .oneshot(request("PUT", "/v1/adapters/adapter-1/key", Some("tenant-a"), Some(set_key)))
        .await
        .expect("response");
    assert_eq!(key_response.status(), StatusCode::OK);

    let revoke = router(&app).oneshot(request("POST", "/v1/adapters/adapter-1/key/revoke", Some("tenant-a"), None)).await.expect("response");
    assert_eq!(revoke.status(), StatusCode::OK);

    let disable = router(&app).oneshot(request("POST", "/v1/adapters/adapter-1/disable", Some("tenant-a"), None)).await.expect("response");
    assert_eq!(disable.status(), StatusCode::OK);
}

#[tokio::test]
async fn execution_decide_grants_for_an_enrolled_low_risk_adapter() {
    let app = test_app();
    let registration = adapter_registration("tenant-a", "adapter-1");
    let enroll = router(&app).oneshot(request("PUT", "/v1/adapters", Some("tenant-a"), Some(registration))).await.expect("response");
    assert_eq!(enroll.status(), StatusCode::OK);

    let decide = router(&app)
        .oneshot(request("POST", "/v1/executions/decide", Some("tenant-a"), Some(execution_request("tenant-a", "adapter-1"))))
        .await
        .expect("response");
    assert_eq!(decide.status(), StatusCode::OK);
    let body = json_body(decide).await;
    assert_eq!(body["allowed"], true);
    assert!(body["granted_scope"].is_object());
}

#[tokio::test]
async fn execution_decide_rejects_an_unregistered_adapter() {
    let app = test_app();
    let decide = router(&app)
        .oneshot(request("POST", "/v1/executions/decide", Some("tenant-a"), Some(execution_request("tenant-a", "ghost-adapter"))))
        .await
        .expect("response");
    assert_eq!(decide.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn policy_dry_run_previews_the_same_verdict_decide_would_reach() {
    let app = test_app();
    let registration = adapter_registration("tenant-a", "adapter-1");
    router(&app).oneshot(request("PUT", "/v1/adapters", Some("tenant-a"), Some(registration))).await.expect("response");

    let dry_run = router(&app)
        .oneshot(request("POST", "/v1/policies/dry-run", Some("tenant-a"), Some(execution_request("tenant-a", "adapter-1"))))
        .await
        .expect("response");
    assert_eq!(dry_run.status(), StatusCode::OK);
    let body = json_body(dry_run).await;
    assert_eq!(body["would_allow"], true);
    assert_eq!(body["would_block"], false);
}

#[tokio::test]
async fn audit_export_observes_the_entry_decide_appends() {
    let app = test_app();
    let registration = adapter_registration("tenant-a", "adapter-1");
    router(&app).oneshot(request("PUT", "/v1/adapters", Some("tenant-a"), Some(registration))).await.expect("response");
    router(&app)
        .oneshot(request("POST", "/v1/executions/decide", Some("tenant-a"), Some(execution_request("tenant-a", "adapter-1"))))
        .await
        .expect("response");

    let export = router(&app).oneshot(request("GET", "/v1/audit", Some("tenant-a"), None)).await.expect("response");
    assert_eq!(export.status(), StatusCode::OK);
    let body = json_body(export).await;
    assert!(!body["entries"].as_array().expect("array").is_empty());
    assert!(body["chain_breaks"].as_array().expect("array").is_empty());
}

#[tokio::test]
async fn tool_token_issue_then_consume_round_trips_and_is_single_use() {
    let app = test_app();
    let issue_body = json!({
        "tenant_id": "tenant-a",
        "workspace_id": "ws-1",
        "adapter_id": "adapter-1",
        "execution_id": "exec-1",
        "tool": "fs.read",
        "scope": {"path": "/tmp/file.txt"},
        "ttl_seconds": 60,
    });
    let issue = router(&app).oneshot(request("POST", "/v1/tool-tokens", Some("tenant-a"), Some(issue_body))).await.expect("response");
    assert_eq!(issue.status(), StatusCode::OK);
    let issued = json_body(issue).await;
    let token = issued["token"].as_str().expect("token string").to_string();

    let consume_first = router(&app)
        .oneshot(request("POST", "/v1/tool-tokens/consume", Some("tenant-a"), Some(json!({"token": token}))))
        .await
        .expect("response");
    assert_eq!(consume_first.status(), StatusCode::OK);
    let first_body = json_body(consume_first).await;
    assert_eq!(first_body["consumed"], true);

    let consume_second = router(&app)
        .oneshot(request("POST", "/v1/tool-tokens/consume", Some("tenant-a"), Some(json!({"token": token}))))
        .await
        .expect("response");
    assert_eq!(consume_second.status(), StatusCode::OK);
    let second_body = json_body(consume_second).await;
    assert_eq!(second_body["consumed"], false);
}

#[tokio::test]
async fn cross_tenant_tool_token_consume_is_rejected() {
    let app = test_app();
    let issue_body = json!({
        "tenant_id": "tenant-a",
        "workspace_id": "ws-1",
        "adapter_id": "adapter-1",
        "execution_id": "exec-1",
        "tool": "fs.read",
        "scope": {"path": "/tmp/file.txt"},
        "ttl_seconds": 60,
    });
    let issue = router(&app).oneshot(request("POST", "/v1/tool-tokens", Some("tenant-a"), Some(issue_body))).await.expect("response");
    let issued = json_body(issue).await;
    let token = issued["token"].as_str().expect("token string").to_string();

    let consume = router(&app)
        .oneshot(request("POST", "/v1/tool-tokens/consume", Some("tenant-b"), Some(json!({"token": token}))))
        .await
        .expect("response");
    assert_eq!(consume.status(), StatusCode::FORBIDDEN);
}
