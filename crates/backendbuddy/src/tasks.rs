// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background tasks: the admission reaper and the tunnel "ensure" loop.
//!
//! Shaped like a standard periodic health-checker: one `tokio::spawn`, one
//! `tokio::time::interval` with `MissedTickBehavior::Skip`, and a
//! `tokio::select!` against the shared shutdown token.

use std::sync::Arc;

use tracing::debug;

use crate::state::AppState;
use crate::tunnel::effective_internal_port;

/// Spawn the reaper task (spec §4.3 `reap()`, every `reap_interval`).
/// Evicts zombie sessions and promotes from the waiting-list; broadcasts a
/// fresh snapshot over the `queue` channel whenever something changed.
pub fn spawn_reaper(state: Arc<AppState>) {
    let interval = state.config.reap_interval();
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            if state.admission.reap() {
                let snapshot = state.admission.snapshot();
                debug!(active = snapshot.active_count, waiting = snapshot.queue_length, "reaper evicted zombies");
                state.hub.queue.send(snapshot);
            }
        }
    });
}

/// Spawn the tunnel "ensure" task (spec §4.5 survivability note): a
/// Process Supervisor restart must never implicitly stop tunnels, but a
/// tunnel whose child has died and whose configuration flag is still set
/// should come back on its own.
pub fn spawn_tunnel_ensure(state: Arc<AppState>) {
    let interval = state.config.ensure_interval();
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let Some(config) = state.store.current().await else { continue };
            let Some(target_port) = config.port else { continue };
            let admin_port = state.config.port;
            let internal_port = effective_internal_port(config.queue_enabled, admin_port, target_port);

            if config.ngrok_enabled && !state.tunnels.ngrok.status().running {
                let outcome = state.tunnels.ngrok.start(internal_port).await;
                debug!(success = outcome.success, "tunnel ensure: ngrok");
            }
            if config.cloudflare_enabled && !state.tunnels.cloudflare.status().running {
                let outcome = state.tunnels.cloudflare.start(internal_port).await;
                debug!(success = outcome.success, "tunnel ensure: cloudflare");
            }
        }
    });
}
