// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport: admin API, admin WebSockets, and the reverse
//! proxy surface, assembled into one axum `Router` on the admin port.

pub mod http;
pub mod middleware;
pub mod proxy;
pub mod ws;

use std::sync::Arc;

use axum::middleware as axum_middleware;
use axum::routing::{any, delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full router: admin API, admin WebSockets, and the proxy
/// fallback surface (root / `/preview` / asset paths), per spec §6.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // -- Admin API (spec §6) -------------------------------------------
        .route("/api/config", get(http::get_config).put(http::put_config))
        .route("/api/server", post(http::server_action))
        .route("/api/server/status", get(http::server_status))
        .route("/api/server/logs", get(http::server_logs))
        .route("/api/links", get(http::links))
        .route("/api/ngrok", post(http::ngrok_action))
        .route("/api/cloudflare", post(http::cloudflare_action))
        .route("/api/queue/join", post(http::queue_join))
        .route("/api/queue/leave", post(http::queue_leave))
        .route("/api/queue/heartbeat", post(http::queue_heartbeat))
        .route("/api/queue/status", get(http::queue_status))
        .route("/api/queue/status/{session}", get(http::queue_status_one))
        .route("/api/traffic/metrics", get(http::traffic_metrics))
        .route("/api/traffic/requests", get(http::traffic_requests))
        .route("/api/traffic/endpoints", get(http::traffic_endpoints))
        .route("/api/traffic/connections", get(http::traffic_connections))
        .route("/api/traffic/clear", delete(http::traffic_clear))
        // -- Admin WebSockets (spec §6) --------------------------------------
        .route("/ws/logs", get(ws::logs_handler))
        .route("/ws/queue", get(ws::queue_handler))
        .route("/ws/traffic", get(ws::traffic_handler))
        // -- Reverse proxy surface (spec §4.6) -------------------------------
        .route("/preview", any(proxy::handle_preview))
        .route("/preview/{*rest}", any(proxy::handle_preview))
        .route("/assets/{*rest}", any(proxy::handle_asset))
        .route("/static/{*rest}", any(proxy::handle_asset))
        .route("/favicon.ico", any(proxy::handle_asset))
        .route("/manifest.json", any(proxy::handle_asset))
        .route("/robots.txt", any(proxy::handle_asset))
        .route("/sitemap.xml", any(proxy::handle_asset))
        .route("/", any(proxy::handle_root))
        .layer(axum_middleware::from_fn_with_state(Arc::clone(&state), middleware::record_traffic))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
