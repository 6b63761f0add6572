// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-level configuration for the `backendbuddy` binary.
//!
//! This is distinct from the [`crate::config_store::ConfigSnapshot`] project
//! record: `BbConfig` governs how the *binary itself* runs (what port it
//! binds, where its database lives); the project record governs what it
//! supervises and exposes.

use std::time::Duration;

/// Command-line/environment configuration for the admin server.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "backendbuddy", version, about = "Waiting-room front door for a dev app")]
pub struct BbConfig {
    /// Host to bind the admin port on.
    #[arg(long, default_value = "0.0.0.0", env = "BACKENDBUDDY_HOST")]
    pub host: String,

    /// Admin port: serves the admin API, admin WebSockets, and the reverse proxy.
    #[arg(long, default_value_t = 1338, env = "BACKENDBUDDY_PORT")]
    pub port: u16,

    /// Path to the sqlite database file backing the project configuration record.
    #[arg(long, default_value = "backendbuddy.db", env = "BACKENDBUDDY_DB")]
    pub db: String,

    /// Enable TLS (self-signed cert pair) on the admin port.
    #[arg(long, default_value_t = false, env = "USE_HTTPS")]
    pub use_https: bool,

    /// Path to the TLS certificate (PEM), used only when `use_https` is set.
    #[arg(long, default_value = "cert.pem", env = "BACKENDBUDDY_TLS_CERT")]
    pub tls_cert: String,

    /// Path to the TLS private key (PEM), used only when `use_https` is set.
    #[arg(long, default_value = "key.pem", env = "BACKENDBUDDY_TLS_KEY")]
    pub tls_key: String,

    /// Liveness timeout for queued/active sessions, in seconds.
    #[arg(long, default_value_t = 30, env = "BACKENDBUDDY_HEARTBEAT_TIMEOUT_SECS")]
    pub heartbeat_timeout_secs: u64,

    /// Reaper tick cadence, in seconds.
    #[arg(long, default_value_t = 10, env = "BACKENDBUDDY_REAP_INTERVAL_SECS")]
    pub reap_interval_secs: u64,

    /// Health-check / tunnel-ensure tick cadence, in seconds.
    #[arg(long, default_value_t = 10, env = "BACKENDBUDDY_ENSURE_INTERVAL_SECS")]
    pub ensure_interval_secs: u64,

    /// Capacity of the request-log ring buffer (Traffic Recorder).
    #[arg(long, default_value_t = 500, env = "BACKENDBUDDY_TRAFFIC_RING_CAPACITY")]
    pub traffic_ring_capacity: usize,

    /// Capacity of each process log ring (backend/frontend, separately).
    #[arg(long, default_value_t = 1000, env = "BACKENDBUDDY_PROCESS_LOG_CAPACITY")]
    pub process_log_capacity: usize,

    /// Maximum concurrent subscribers per broadcast channel (logs/queue/traffic).
    #[arg(long, default_value_t = 10, env = "BACKENDBUDDY_MAX_SUBSCRIBERS")]
    pub max_subscribers_per_channel: usize,
}

impl BbConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn ensure_interval(&self) -> Duration {
        Duration::from_secs(self.ensure_interval_secs)
    }
}

impl Default for BbConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 1338,
            db: "backendbuddy.db".to_owned(),
            use_https: false,
            tls_cert: "cert.pem".to_owned(),
            tls_key: "key.pem".to_owned(),
            heartbeat_timeout_secs: 30,
            reap_interval_secs: 10,
            ensure_interval_secs: 10,
            traffic_ring_capacity: 500,
            process_log_capacity: 1000,
            max_subscribers_per_channel: 10,
        }
    }
}
