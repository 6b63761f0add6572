// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admin API handlers (spec §6): project configuration, process control,
//! tunnels, the waiting-room queue, and traffic introspection.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::config_store::ConfigPatch;
use crate::error::AppError;
use crate::links;
use crate::state::AppState;
use crate::tunnel::{self, Brand};

// -- /api/config --------------------------------------------------------

pub async fn get_config(State(state): State<Arc<AppState>>) -> Response {
    match state.store.current().await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => Json(crate::config_store::ConfigSnapshot::default()).into_response(),
    }
}

pub async fn put_config(State(state): State<Arc<AppState>>, Json(patch): Json<ConfigPatch>) -> Response {
    match state.store.apply_patch(patch).await {
        Ok(snapshot) => {
            state.sync_admission_config(snapshot.max_concurrent_users, snapshot.prioritize_localhost);
            Json(snapshot).into_response()
        }
        Err(err) => {
            tracing::warn!("config patch failed: {err:#}");
            AppError::Internal.into_response()
        }
    }
}

// -- /api/server* --------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerAction {
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Deserialize)]
pub struct ServerActionRequest {
    pub action: ServerAction,
}

pub async fn server_action(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ServerActionRequest>,
) -> Response {
    let Some(config) = state.store.current().await else {
        return AppError::ConfigurationAbsent.into_response();
    };
    let (Some(directory), Some(command)) = (config.directory.clone(), config.command.clone()) else {
        return AppError::ConfigurationAbsent.into_response();
    };
    let dir = PathBuf::from(directory);
    let fe_dir = config.frontend_directory.clone().map(PathBuf::from);
    let fe_command = config.frontend_command.clone();

    let outcome = match req.action {
        ServerAction::Start => {
            state.process.start(&dir, &command, fe_dir.as_deref(), fe_command.as_deref()).await
        }
        ServerAction::Restart => {
            state.process.restart(&dir, &command, fe_dir.as_deref(), fe_command.as_deref()).await
        }
        ServerAction::Stop => {
            let outcome = state.process.stop().await;
            return Json(outcome).into_response();
        }
    };
    Json(outcome).into_response()
}

pub async fn server_status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.process.status()).into_response()
}

#[derive(Debug, Deserialize, Default)]
pub struct TailQuery {
    pub lines: Option<usize>,
}

pub async fn server_logs(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(q): axum::extract::Query<TailQuery>,
) -> Response {
    let n = q.lines.unwrap_or(200);
    Json(state.process.recent_logs(n)).into_response()
}

// -- /api/links ------------------------------------------------------------

pub async fn links(State(state): State<Arc<AppState>>) -> Response {
    let Some(config) = state.store.current().await else {
        return AppError::ConfigurationAbsent.into_response();
    };
    let Some(port) = config.port else {
        return AppError::ConfigurationAbsent.into_response();
    };
    let ngrok_status = state.tunnels.ngrok.status();
    let cloudflare_status = state.tunnels.cloudflare.status();

    let response = links::generate_links(
        port,
        config.lan_ip.as_deref(),
        config.lan_enabled,
        config.ngrok_enabled,
        ngrok_status.url.as_deref(),
        config.cloudflare_enabled,
        cloudflare_status.url.as_deref(),
    );
    Json(response).into_response()
}

// -- /api/ngrok, /api/cloudflare --------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelAction {
    Start,
    Stop,
}

#[derive(Debug, Deserialize)]
pub struct TunnelActionRequest {
    pub action: TunnelAction,
}

pub async fn ngrok_action(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TunnelActionRequest>,
) -> Response {
    tunnel_action(state, Brand::Ngrok, req).await
}

pub async fn cloudflare_action(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TunnelActionRequest>,
) -> Response {
    tunnel_action(state, Brand::Cloudflare, req).await
}

async fn tunnel_action(state: Arc<AppState>, brand: Brand, req: TunnelActionRequest) -> Response {
    let agent = match brand {
        Brand::Ngrok => Arc::clone(&state.tunnels.ngrok),
        Brand::Cloudflare => Arc::clone(&state.tunnels.cloudflare),
    };

    match req.action {
        TunnelAction::Stop => Json(agent.stop().await).into_response(),
        TunnelAction::Start => {
            let Some(config) = state.store.current().await else {
                return AppError::ConfigurationAbsent.into_response();
            };
            let Some(target_port) = config.port else {
                return AppError::ConfigurationAbsent.into_response();
            };
            let internal_port =
                tunnel::effective_internal_port(config.queue_enabled, state.config.port, target_port);
            Json(agent.start(internal_port).await).into_response()
        }
    }
}

// -- /api/queue/* (admin API: localhost bypass is unconditional) -----------

#[derive(Debug, Deserialize, Default)]
pub struct SessionRequest {
    pub session: Option<String>,
}

pub async fn queue_join(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionRequest>,
) -> Response {
    let (decision, changed) = state.admission.join(req.session, true);
    if changed {
        state.hub.queue.send(state.admission.snapshot());
    }
    Json(decision).into_response()
}

pub async fn queue_heartbeat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionRequest>,
) -> Response {
    let Some(session) = req.session.filter(|s| !s.is_empty()) else {
        return AppError::BadRequest.into_response();
    };
    match state.admission.heartbeat(&session) {
        Some(status) => Json(status).into_response(),
        None => AppError::NotFound.into_response(),
    }
}

pub async fn queue_leave(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionRequest>,
) -> Response {
    let Some(session) = req.session.filter(|s| !s.is_empty()) else {
        return AppError::BadRequest.into_response();
    };
    let changed = state.admission.leave(&session);
    if changed {
        state.hub.queue.send(state.admission.snapshot());
    }
    Json(serde_json::json!({ "left": changed })).into_response()
}

pub async fn queue_status(State(state): State<Arc<AppState>>) -> Response {
    Json(state.admission.snapshot()).into_response()
}

pub async fn queue_status_one(
    State(state): State<Arc<AppState>>,
    AxumPath(session): AxumPath<String>,
) -> Response {
    match state.admission.status(&session) {
        Some(status) => Json(status).into_response(),
        None => AppError::NotFound.into_response(),
    }
}

// -- /api/traffic/* ----------------------------------------------------------

pub async fn traffic_metrics(State(state): State<Arc<AppState>>) -> Response {
    let active_connections = state.admission.snapshot().active_count as u64;
    Json(state.traffic.metrics(active_connections)).into_response()
}

#[derive(Debug, Deserialize, Default)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

pub async fn traffic_requests(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(q): axum::extract::Query<RecentQuery>,
) -> Response {
    let n = q.limit.unwrap_or(50);
    Json(state.traffic.recent(n)).into_response()
}

pub async fn traffic_endpoints(State(state): State<Arc<AppState>>) -> Response {
    Json(state.traffic.endpoints()).into_response()
}

#[derive(Debug, serde::Serialize)]
pub struct ConnectionsView {
    pub active_connections: u64,
}

/// A Traffic Recorder view (spec §6 groups `/connections` with
/// `/metrics`/`/requests`/`/endpoints`), reusing the same
/// active-connections figure `metrics()` reports rather than exposing the
/// Admission Controller's queue internals under a traffic-prefixed route.
pub async fn traffic_connections(State(state): State<Arc<AppState>>) -> Response {
    let active_connections = state.admission.snapshot().active_count as u64;
    Json(ConnectionsView { active_connections: state.traffic.metrics(active_connections).active_connections })
        .into_response()
}

pub async fn traffic_clear(State(state): State<Arc<AppState>>) -> Response {
    state.traffic.clear();
    Json(serde_json::json!({ "cleared": true })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::MemoryConfigStore;
    use tokio_util::sync::CancellationToken;

    fn state() -> Arc<AppState> {
        AppState::new(
            crate::config::BbConfig::default(),
            Arc::new(MemoryConfigStore::new()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn get_config_returns_default_when_unset() {
        let state = state();
        let resp = get_config(State(state)).await;
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn queue_join_without_session_mints_one_and_broadcasts() {
        let state = state();
        let mut rx = state.hub.queue.subscribe().expect("subscribe");
        let resp = queue_join(State(state), Json(SessionRequest::default())).await;
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
        let snapshot = rx.recv().await.expect("snapshot broadcast");
        assert_eq!(snapshot.active_count, 1);
    }

    #[tokio::test]
    async fn queue_heartbeat_unknown_session_is_not_found() {
        let state = state();
        let resp = queue_heartbeat(
            State(state),
            Json(SessionRequest { session: Some("nope".to_owned()) }),
        )
        .await;
        assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn server_action_without_config_is_service_unavailable() {
        let state = state();
        let resp = server_action(State(state), Json(ServerActionRequest { action: ServerAction::Start })).await;
        assert_eq!(resp.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn traffic_connections_reports_active_admission_count() {
        let state = state();
        let (decision, _) = state.admission.join(None, true);
        assert_eq!(decision.status, crate::admission::SessionStatus::Active);

        let resp = traffic_connections(State(Arc::clone(&state))).await;
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["active_connections"], 1);
    }

    #[tokio::test]
    async fn traffic_clear_resets_metrics() {
        let state = state();
        state.traffic.record("GET", "/x", 200, 1.0, "127.0.0.1", "test", 0, 0);
        let resp = traffic_clear(State(Arc::clone(&state))).await;
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
        assert_eq!(state.traffic.metrics(0).total_requests, 0);
    }
}
