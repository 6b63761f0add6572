// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admin WebSockets: live fan-out of logs, queue-state deltas, and traffic
//! events over the three `BroadcastHub` channels (spec §4.1, §6).

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;

use crate::broadcast::to_json_text;
use crate::state::AppState;

const TOO_MANY_CONNECTIONS: CloseFrame =
    CloseFrame { code: 1013, reason: std::borrow::Cow::Borrowed("Too many connections") };

pub async fn logs_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_logs(socket, state))
}

pub async fn queue_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_queue(socket, state))
}

pub async fn traffic_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_traffic(socket, state))
}

async fn handle_logs(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = match state.hub.logs.subscribe() {
        Ok(rx) => rx,
        Err(_) => {
            reject(&mut socket).await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            msg = rx.recv() => {
                match msg {
                    Ok(line) => {
                        if socket.send(Message::Text(line.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
}

/// First frame is always a full snapshot (spec §4.1), then deltas as they
/// are broadcast.
async fn handle_queue(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = match state.hub.queue.subscribe() {
        Ok(rx) => rx,
        Err(_) => {
            reject(&mut socket).await;
            return;
        }
    };

    if let Some(text) = to_json_text(&state.admission.snapshot()) {
        if socket.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            msg = rx.recv() => {
                match msg {
                    Ok(snapshot) => {
                        let Some(text) = to_json_text(&snapshot) else { continue };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
}

async fn handle_traffic(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = match state.hub.traffic.subscribe() {
        Ok(rx) => rx,
        Err(_) => {
            reject(&mut socket).await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            msg = rx.recv() => {
                match msg {
                    Ok(event) => {
                        let Some(text) = to_json_text(&event) else { continue };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                if incoming.is_none() {
                    break;
                }
            }
        }
    }
}

async fn reject(socket: &mut WebSocket) {
    let _ = socket.send(Message::Close(Some(TOO_MANY_CONNECTIONS))).await;
}
