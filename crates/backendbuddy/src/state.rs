// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state, threaded through the router as `Arc<AppState>`.
//!
//! One struct bundling the process configuration, the persistence seam, and
//! every component from §4, wrapped once in an `Arc` and cloned cheaply per
//! request.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionController;
use crate::broadcast::BroadcastHub;
use crate::config::BbConfig;
use crate::config_store::ConfigStore;
use crate::process::ProcessSupervisor;
use crate::traffic::TrafficRecorder;
use crate::tunnel::TunnelSupervisor;

/// Everything the transport layer needs to answer a request.
pub struct AppState {
    pub config: BbConfig,
    pub store: Arc<dyn ConfigStore>,
    pub hub: Arc<BroadcastHub>,
    pub admission: Arc<AdmissionController>,
    pub process: Arc<ProcessSupervisor>,
    pub tunnels: Arc<TunnelSupervisor>,
    pub traffic: Arc<TrafficRecorder>,
    pub shutdown: CancellationToken,
    /// Client used to forward proxied requests to the target application.
    /// No redirect following (spec §4.6 step 5): redirects pass back to the
    /// caller verbatim.
    pub forward_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: BbConfig, store: Arc<dyn ConfigStore>, shutdown: CancellationToken) -> Arc<Self> {
        let hub = Arc::new(BroadcastHub::new(config.max_subscribers_per_channel));
        let admission =
            Arc::new(AdmissionController::new(1, true, config.heartbeat_timeout()));
        let process = Arc::new(ProcessSupervisor::new(config.process_log_capacity, hub.logs.sender()));
        let traffic = Arc::new(TrafficRecorder::new(config.traffic_ring_capacity, hub.traffic.sender()));
        let tunnels = Arc::new(TunnelSupervisor::new());
        let forward_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();

        Arc::new(Self {
            config,
            store,
            hub,
            admission,
            process,
            tunnels,
            traffic,
            shutdown,
            forward_client,
        })
    }

    /// Re-apply the persisted concurrency cap / localhost-priority flag to
    /// the admission controller. Spec §4.3 reads configuration "at each
    /// admission decision"; rather than thread a config lookup through every
    /// queue operation, the proxy calls this once per request immediately
    /// before `join`/`heartbeat`, keeping the controller itself free of any
    /// dependency on persistence.
    pub fn sync_admission_config(&self, max_concurrent_users: i64, prioritize_localhost: bool) {
        let cap = usize::try_from(max_concurrent_users).unwrap_or(1);
        self.admission.configure(cap, prioritize_localhost);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::MemoryConfigStore;

    #[test]
    fn new_builds_state_with_default_admission_cap() {
        let state = AppState::new(BbConfig::default(), Arc::new(MemoryConfigStore::new()), CancellationToken::new());
        let snapshot = state.admission.snapshot();
        assert_eq!(snapshot.max_concurrent, 1);
    }

    #[test]
    fn sync_admission_config_coerces_negative_cap_to_one() {
        let state = AppState::new(BbConfig::default(), Arc::new(MemoryConfigStore::new()), CancellationToken::new());
        state.sync_admission_config(-5, false);
        assert_eq!(state.admission.snapshot().max_concurrent, 1);
    }
}
