//! End-to-end HTTP surface tests driven through `tower::ServiceExt::oneshot` rather than a
//! bound TCP listener.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use grace_gateway::{boot, build_app};
use serde_json::{json, Value};
use tower::ServiceExt;

/// `boot()` loads `config/mesh_routes.toml` and `config/governance_policies.toml` relative
/// to the process working directory; point it at the workspace root regardless of which
/// package directory `cargo test` happens to run the binary from.
fn chdir_to_workspace_root() {
    let manifest_dir = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let workspace_root = manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("add-ons/grace-gateway is two levels under the workspace root");
    std::env::set_current_dir(workspace_root).expect("workspace root is accessible");
}

async fn test_app() -> axum::Router {
    chdir_to_workspace_root();
    let tmp = tempfile::tempdir().expect("temp data dir");
    let core = grace_core::CoreConfig {
        data_dir: tmp.path().to_string_lossy().to_string(),
        ..Default::default()
    };
    let gateway = grace_gateway::config::GatewayConfig::default();
    let state = boot::boot(&core, &gateway).await;
    // Leak the tempdir so sled keeps the directory alive for the lifetime of the test.
    std::mem::forget(tmp);
    build_app(state)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_responds_ok() {
    let app = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// S1 — low-risk config update reaches `distributed` (observation handoff) quickly, with
/// audit entries recorded along the way.
#[tokio::test]
async fn low_risk_config_update_reaches_distributed() {
    let app = test_app().await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/logic-hub/updates/config")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "component_targets": ["metrics_collector"],
                        "content": {"aggregation_interval": 60},
                        "created_by": "integration_test",
                        "risk_level": "low",
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let update_id = body["update_id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/logic-hub/updates/{update_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "observing");
    assert!(body["audit_refs"].as_array().unwrap().len() >= 2);
}

/// S2 — gated fetch with a matching governance-allow policy returns approved results whose
/// fetch session later verifies.
#[tokio::test]
async fn gated_fetch_with_governance_allow_verifies() {
    let app = test_app().await;

    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/memory/store")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "user": "alice",
                        "domain": "knowledge",
                        "content": {"text": "meeting notes from standup"},
                        "metadata": {},
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/memory/fetch")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "user": "alice",
                        "domain": "knowledge",
                        "query": "meeting",
                        "limit": 5,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["governance_approved"], true);
    assert!(body["total_results"].as_u64().unwrap() <= 5);
    let session_id = body["fetch_session_id"].as_str().unwrap().to_string();
    let signature = body["signature"].clone();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/memory/verify-fetch")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({ "session_id": session_id, "signature": signature }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["valid"], true);
}

/// S3 — gated fetch against a domain the policy set explicitly denies.
#[tokio::test]
async fn gated_fetch_with_governance_deny_is_rejected() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/memory/fetch")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "user": "alice",
                        "domain": "unknown",
                        "query": "anything",
                        "limit": 5,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "memory_access_denied");
}
