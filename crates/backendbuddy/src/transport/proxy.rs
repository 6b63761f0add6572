// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reverse Proxy: the admin port's HTTP entrypoint for everything that
//! isn't the admin API or admin WebSockets. Classifies requests by Host and
//! path, consults the Admission Controller, and forwards to the target
//! (spec §4.6).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;

pub const SESSION_COOKIE: &str = "bb_session_id";
const SESSION_COOKIE_MAX_AGE: u64 = 3600;

const WAITING_ROOM_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>You're in line</title>
<style>
body { font-family: system-ui, sans-serif; background: #0b0d12; color: #e6e8ee; display: flex;
       align-items: center; justify-content: center; height: 100vh; margin: 0; }
.card { text-align: center; }
h1 { font-size: 1.4rem; }
</style>
</head>
<body>
<div class="card">
<h1>You're in the waiting room</h1>
<p>Hang tight &mdash; we'll let you through as soon as a slot opens up.</p>
</div>
</body>
</html>
"#;

/// `GET /` (or any method on root): loopback hosts get a small JSON status
/// body; everything else falls through to proxying (target root `/`).
pub async fn handle_root(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
) -> Response {
    if is_loopback_host(req.headers()) {
        return Json(json!({
            "status": "backendbuddy",
            "listening": true,
        }))
        .into_response();
    }
    forward(state, peer, req, "/".to_owned()).await
}

/// `/preview` and `/preview/*`: only this family has its prefix stripped
/// before forwarding.
pub async fn handle_preview(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
) -> Response {
    let path = req.uri().path();
    let computed = path.strip_prefix("/preview").unwrap_or("");
    let computed = if computed.is_empty() { "/".to_owned() } else { computed.to_owned() };
    forward(state, peer, req, computed).await
}

/// Asset paths (`/assets/*`, `/static/*`, `/favicon.ico`, ...): pass through
/// verbatim, no prefix stripped.
pub async fn handle_asset(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
) -> Response {
    let computed = req.uri().path().to_owned();
    forward(state, peer, req, computed).await
}

/// Shared forwarding path (spec §4.6 steps 1-7).
async fn forward(state: Arc<AppState>, peer: SocketAddr, req: axum::extract::Request, computed_path: String) -> Response {
    let Some(config) = state.store.current().await else {
        return crate::error::AppError::ConfigurationAbsent.into_response();
    };
    let Some(target_port) = config.port else {
        return crate::error::AppError::ConfigurationAbsent.into_response();
    };

    let client = resolve_client(req.headers(), peer);
    let is_localhost = client.map(|ip| ip.is_loopback()).unwrap_or(false);

    let (mut session, minted) = read_or_mint_session(req.headers());

    if config.queue_enabled {
        state.sync_admission_config(config.max_concurrent_users, config.prioritize_localhost);
        let (decision, changed) = state.admission.join(Some(session.clone()), is_localhost);
        session = decision.session.clone();
        if changed {
            state.hub.queue.send(state.admission.snapshot());
        }

        if decision.status == crate::admission::SessionStatus::Waiting {
            return waiting_room_response(&session, minted);
        }
        state.admission.heartbeat(&session);
    }

    let query = req.uri().query().map(|q| format!("?{q}")).unwrap_or_default();
    let target_url = format!("http://127.0.0.1:{target_port}{computed_path}{query}");
    let target_base = format!("http://127.0.0.1:{target_port}/");

    let method = req.method().clone();
    let headers = forward_headers(req.headers());
    let body_bytes = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return crate::error::AppError::Internal.into_response(),
    };

    let upstream_req = state
        .forward_client
        .request(to_reqwest_method(&method), &target_url)
        .headers(headers)
        .body(body_bytes.to_vec());

    match upstream_req.send().await {
        Ok(resp) => relay_response(resp, &session, minted).await,
        Err(err) if err.is_timeout() => timeout_response(&target_base),
        Err(_) => target_unreachable_response(&target_base),
    }
}

fn waiting_room_response(session: &str, minted: bool) -> Response {
    let marker = "</head>";
    let script = format!(r#"<script>window.__BACKENDBUDDY_SESSION__ = "{session}";</script>"#);
    let html = WAITING_ROOM_HTML.replacen(marker, &format!("{script}{marker}"), 1);

    let mut response = (StatusCode::OK, [("content-type", "text/html; charset=utf-8")], html).into_response();
    if minted {
        set_session_cookie(response.headers_mut(), session);
    }
    response
}

async fn relay_response(resp: reqwest::Response, session: &str, minted: bool) -> Response {
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut headers = HeaderMap::new();
    for (name, value) in resp.headers() {
        if is_regenerated_header(name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }

    let body = match resp.bytes().await {
        Ok(b) => b,
        Err(_) => return crate::error::AppError::Internal.into_response(),
    };

    let mut response = Response::builder().status(status).body(Body::from(body)).unwrap_or_default();
    *response.headers_mut() = headers;
    if minted {
        set_session_cookie(response.headers_mut(), session);
    }
    response
}

/// Connection refused (spec §4.6 step 7 / §7 Scenario E): fixed error text,
/// target carried as its own field.
fn target_unreachable_response(target: &str) -> Response {
    crate::error::AppError::TargetRefused
        .with_target("Target application not responding", target)
        .into_response()
}

/// Timed out after the forwarding client's fixed deadline.
fn timeout_response(target: &str) -> Response {
    crate::error::AppError::TargetTimeout.with_target("Target application timed out", target).into_response()
}

/// Copy all request headers except `Host` and `Content-Length` (spec §4.6
/// step 5); the forwarding client regenerates both.
fn forward_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let lower = name.as_str().to_ascii_lowercase();
        if lower == "host" || lower == "content-length" {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }
    out
}

/// Response headers the host stack regenerates; never relayed verbatim
/// (spec §4.6 step 6).
fn is_regenerated_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "content-encoding" | "content-length" | "transfer-encoding" | "connection"
    )
}

fn to_reqwest_method(method: &Method) -> reqwest::Method {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET)
}

/// `X-Forwarded-For`'s first element wins; else the socket peer.
pub fn resolve_client(headers: &HeaderMap, peer: SocketAddr) -> Option<IpAddr> {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    Some(peer.ip())
}

fn is_loopback_host(headers: &HeaderMap) -> bool {
    let Some(host) = headers.get("host").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let host = host.split(':').next().unwrap_or(host);
    matches!(host, "127.0.0.1" | "localhost" | "::1")
}

fn read_or_mint_session(headers: &HeaderMap) -> (String, bool) {
    if let Some(cookie_header) = headers.get("cookie").and_then(|v| v.to_str().ok()) {
        for pair in cookie_header.split(';') {
            let pair = pair.trim();
            if let Some(value) = pair.strip_prefix(&format!("{SESSION_COOKIE}=")) {
                if !value.is_empty() {
                    return (value.to_owned(), false);
                }
            }
        }
    }
    (Uuid::new_v4().to_string(), true)
}

fn set_session_cookie(headers: &mut HeaderMap, session: &str) {
    let cookie = format!(
        "{SESSION_COOKIE}={session}; HttpOnly; SameSite=Lax; Max-Age={SESSION_COOKIE_MAX_AGE}; Path=/"
    );
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        headers.append(axum::http::header::SET_COOKIE, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_host_detection() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("localhost:1338"));
        assert!(is_loopback_host(&headers));

        headers.insert("host", HeaderValue::from_static("example.com"));
        assert!(!is_loopback_host(&headers));
    }

    #[test]
    fn resolve_client_prefers_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let peer: SocketAddr = "127.0.0.1:9999".parse().expect("valid addr");
        let ip = resolve_client(&headers, peer).expect("resolved");
        assert_eq!(ip.to_string(), "203.0.113.9");
    }

    #[test]
    fn resolve_client_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.168.1.5:9999".parse().expect("valid addr");
        let ip = resolve_client(&headers, peer).expect("resolved");
        assert_eq!(ip.to_string(), "192.168.1.5");
    }

    #[test]
    fn read_or_mint_session_reuses_existing_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_static("bb_session_id=abc123; other=1"));
        let (session, minted) = read_or_mint_session(&headers);
        assert_eq!(session, "abc123");
        assert!(!minted);
    }

    #[test]
    fn read_or_mint_session_mints_when_absent() {
        let headers = HeaderMap::new();
        let (session, minted) = read_or_mint_session(&headers);
        assert!(!session.is_empty());
        assert!(minted);
    }

    #[test]
    fn preview_prefix_strip_leaves_root_for_bare_preview() {
        let path = "/preview";
        let computed = path.strip_prefix("/preview").unwrap_or("");
        let computed = if computed.is_empty() { "/".to_owned() } else { computed.to_owned() };
        assert_eq!(computed, "/");
    }
}
