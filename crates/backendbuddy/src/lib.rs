// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! BackendBuddy: a developer-facing front door that supervises a child
//! application process and gates externally-originated requests through a
//! waiting-room admission controller.

pub mod admission;
pub mod broadcast;
pub mod config;
pub mod config_store;
pub mod error;
pub mod links;
pub mod process;
pub mod state;
pub mod tasks;
pub mod tls;
pub mod traffic;
pub mod transport;
pub mod tunnel;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::BbConfig;
use crate::config_store::{ConfigStore, SqliteConfigStore};
use crate::state::AppState;
use crate::tasks::{spawn_reaper, spawn_tunnel_ensure};
use crate::transport::build_router;

/// Run the admin server until shutdown. Only initialization failures
/// (cannot open persistence, cannot bind) abort the process (spec §6 exit
/// codes / §7 propagation policy).
pub async fn run(config: BbConfig) -> anyhow::Result<()> {
    let store: Arc<dyn ConfigStore> = Arc::new(SqliteConfigStore::connect(&config.db).await?);
    run_with_store(config, store).await
}

/// Entry point that accepts a pre-built `ConfigStore`, used by `run` and by
/// integration tests that want an in-memory store instead of sqlite.
pub async fn run_with_store(config: BbConfig, store: Arc<dyn ConfigStore>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let use_https = config.use_https;
    let tls_cert = config.tls_cert.clone();
    let tls_key = config.tls_key.clone();

    let state = AppState::new(config, store, shutdown.clone());

    spawn_reaper(Arc::clone(&state));
    spawn_tunnel_ensure(Arc::clone(&state));
    spawn_signal_handler(shutdown.clone());

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    info!("backendbuddy listening on {addr}");

    if use_https {
        if rustls::crypto::ring::default_provider().install_default().is_err() {
            tracing::debug!("rustls default crypto provider already installed");
        }
        match crate::tls::load_or_warn(&tls_cert, &tls_key) {
            Some(acceptor) => serve_tls(listener, router, acceptor, shutdown).await?,
            None => serve_plain(listener, router, shutdown).await?,
        }
    } else {
        serve_plain(listener, router, shutdown).await?;
    }

    Ok(())
}

async fn serve_plain(
    listener: TcpListener,
    router: axum::Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

/// Manual accept loop for TLS: `axum::serve` has no TLS knob of its own, so
/// each accepted connection is handed to `hyper_util`'s auto builder after
/// the rustls handshake.
async fn serve_tls(
    listener: TcpListener,
    router: axum::Router,
    acceptor: tokio_rustls::TlsAcceptor,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut make_svc = router.into_make_service_with_connect_info::<SocketAddr>();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accept = listener.accept() => {
                let (stream, peer_addr) = match accept {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::debug!("tcp accept error: {err}");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let svc_future = <_ as tower::Service<_>>::call(&mut make_svc, peer_addr);
                tokio::spawn(async move {
                    let Ok(svc) = svc_future.await;
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(err) => {
                            tracing::debug!("tls handshake failed: {err}");
                            return;
                        }
                    };
                    let io = hyper_util::rt::TokioIo::new(tls_stream);
                    let hyper_svc = hyper_util::service::TowerToHyperService::new(svc);
                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                        .serve_connection_with_upgrades(io, hyper_svc)
                        .await
                    {
                        tracing::debug!("connection error: {err}");
                    }
                });
            }
        }
    }
    Ok(())
}

/// SIGTERM/SIGINT handling: first signal triggers graceful shutdown via the
/// cancellation token, a second forces immediate exit.
#[cfg(unix)]
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM");
            }
            _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM again, forcing exit");
            }
            _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT again, forcing exit");
            }
        }
        std::process::exit(130);
    });
}

#[cfg(not(unix))]
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });
}
