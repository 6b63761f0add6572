// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests driving the admin API and the reverse proxy surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use backendbuddy::config::BbConfig;
use backendbuddy::config_store::{ConfigSnapshot, MemoryConfigStore};
use backendbuddy::state::AppState;
use backendbuddy::transport::build_router;

fn admin_test_state() -> Arc<AppState> {
    AppState::new(BbConfig::default(), Arc::new(MemoryConfigStore::new()), CancellationToken::new())
}

// -- Admin API (no ConnectInfo required) -------------------------------------

#[tokio::test]
async fn get_config_defaults_when_nothing_persisted() {
    let state = admin_test_state();
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).expect("create test server");

    let resp = server.get("/api/config").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["name"], "My Project");
    assert_eq!(body["queue_enabled"], true);
}

#[tokio::test]
async fn put_config_patches_only_named_fields() {
    let state = admin_test_state();
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).expect("create test server");

    server.put("/api/config").json(&serde_json::json!({ "command": "npm start", "port": 3000 })).await;
    let second = server.put("/api/config").json(&serde_json::json!({ "port": 4000 })).await;
    second.assert_status(StatusCode::OK);
    let body: serde_json::Value = second.json();
    assert_eq!(body["command"], "npm start");
    assert_eq!(body["port"], 4000);
}

#[tokio::test]
async fn server_action_without_configured_directory_is_unavailable() {
    let state = admin_test_state();
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).expect("create test server");

    let resp = server.post("/api/server").json(&serde_json::json!({ "action": "start" })).await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn queue_join_leave_round_trip_over_http() {
    let state = admin_test_state();
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).expect("create test server");

    let join = server.post("/api/queue/join").json(&serde_json::json!({})).await;
    join.assert_status(StatusCode::OK);
    let decision: serde_json::Value = join.json();
    let session = decision["session"].as_str().expect("session present").to_owned();
    assert_eq!(decision["status"], "active");

    let status = server.get(&format!("/api/queue/status/{session}")).await;
    status.assert_status(StatusCode::OK);

    let leave = server.post("/api/queue/leave").json(&serde_json::json!({ "session": session })).await;
    leave.assert_status(StatusCode::OK);

    let status_after = server.get(&format!("/api/queue/status/{session}")).await;
    status_after.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn queue_status_unknown_session_is_not_found() {
    let state = admin_test_state();
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).expect("create test server");

    let resp = server.get("/api/queue/status/does-not-exist").await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn traffic_clear_then_metrics_reports_zero() {
    let state = admin_test_state();
    state.traffic.record("GET", "/x", 200, 2.0, "127.0.0.1", "ua", 0, 0);
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).expect("create test server");

    server.delete("/api/traffic/clear").await.assert_status(StatusCode::OK);
    let metrics = server.get("/api/traffic/metrics").await;
    let body: serde_json::Value = metrics.json();
    assert_eq!(body["total_requests"], 0);
}

#[tokio::test]
async fn links_without_configured_port_is_unavailable() {
    let state = admin_test_state();
    let app = build_router(state);
    let server = axum_test::TestServer::new(app).expect("create test server");

    let resp = server.get("/api/links").await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

// -- Reverse proxy: needs a real socket for `ConnectInfo<SocketAddr>` --------

async fn spawn_target(body: &'static str) -> u16 {
    let app = Router::new().route("/", get(move || async move { body }));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind target");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    port
}

async fn spawn_backendbuddy(store: Arc<MemoryConfigStore>) -> u16 {
    let config_store: Arc<dyn backendbuddy::config_store::ConfigStore> = store;
    let state = AppState::new(BbConfig::default(), config_store, CancellationToken::new());
    let app = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind admin");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await;
    });
    port
}

#[tokio::test]
async fn proxy_forwards_root_to_target_when_queue_disabled() {
    let target_port = spawn_target("hello from target").await;
    let store = Arc::new(MemoryConfigStore::seeded(ConfigSnapshot {
        port: Some(target_port),
        queue_enabled: false,
        ..Default::default()
    }));
    let admin_port = spawn_backendbuddy(store).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://127.0.0.1:{admin_port}/"))
        .header("host", "example.com")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status().as_u16(), 200);
    let text = resp.text().await.expect("body");
    assert_eq!(text, "hello from target");
}

#[tokio::test]
async fn proxy_returns_bad_gateway_when_target_unreachable() {
    let store = Arc::new(MemoryConfigStore::seeded(ConfigSnapshot {
        port: Some(1), // nothing listens on port 1
        queue_enabled: false,
        ..Default::default()
    }));
    let admin_port = spawn_backendbuddy(store).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://127.0.0.1:{admin_port}/"))
        .header("host", "example.com")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status().as_u16(), 502);
    let body: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(body["error"], "Target application not responding");
    assert_eq!(body["target"], "http://127.0.0.1:1/");
}

#[tokio::test]
async fn proxy_root_on_loopback_host_returns_status_json_without_forwarding() {
    let store = Arc::new(MemoryConfigStore::seeded(ConfigSnapshot { port: Some(1), ..Default::default() }));
    let admin_port = spawn_backendbuddy(store).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("http://127.0.0.1:{admin_port}/"))
        .header("host", "localhost")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(body["listening"], true);
}

#[tokio::test]
async fn traffic_requests_do_not_record_themselves() {
    let store = Arc::new(MemoryConfigStore::seeded(ConfigSnapshot { port: Some(1), ..Default::default() }));
    let admin_port = spawn_backendbuddy(store).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{admin_port}");
    client.get(format!("{base}/api/traffic/requests")).send().await.expect("request 1");
    let metrics_resp =
        client.get(format!("{base}/api/traffic/metrics")).send().await.expect("request 2");
    let metrics: serde_json::Value = metrics_resp.json().await.expect("json");
    assert_eq!(metrics["total_requests"], 0, "traffic endpoints must not record themselves");
}
