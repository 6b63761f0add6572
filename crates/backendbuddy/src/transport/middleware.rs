// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traffic-recording middleware: wraps every request through the router,
//! measuring latency and byte counts, excluding the traffic surface itself
//! from recursion (spec §4.2).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;
use crate::traffic::is_self_excluded;
use crate::transport::proxy::resolve_client;

pub async fn record_traffic(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    if is_self_excluded(&path) {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let headers = req.headers().clone();
    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let bytes_in = content_length(&headers);
    let user_agent = headers.get("user-agent").and_then(|v| v.to_str().ok()).unwrap_or("").to_owned();

    let client = peer.and_then(|p| resolve_client(&headers, p)).map(|ip| ip.to_string()).unwrap_or_default();

    let start = Instant::now();
    let response = next.run(req).await;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    let status = response.status().as_u16();
    let bytes_out = content_length(response.headers());

    state.traffic.record(&method, &path, status, latency_ms, &client, &user_agent, bytes_in, bytes_out);

    response
}

fn content_length(headers: &HeaderMap) -> u64 {
    headers.get("content-length").and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_parses_present_header() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", "42".parse().expect("valid header value"));
        assert_eq!(content_length(&headers), 42);
    }

    #[test]
    fn content_length_defaults_to_zero_when_absent() {
        let headers = HeaderMap::new();
        assert_eq!(content_length(&headers), 0);
    }
}
