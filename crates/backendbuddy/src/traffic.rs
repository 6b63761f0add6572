// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traffic Recorder: per-request observations, incremental aggregates, and
//! live fan-out over the `traffic` broadcast channel.
//!
//! Grounded on `original_source/backend/traffic_monitor.py`'s
//! `TrafficMonitor`: one mutex guarding a bounded ring plus running totals
//! and a per-endpoint histogram, reworked onto a `std::collections::VecDeque`
//! ring guarded the same way `AdmissionController` (`admission.rs`) guards
//! its lists — a single `std::sync::Mutex`, never held across I/O or channel
//! dispatch.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::broadcast;

const USER_AGENT_MAX_LEN: usize = 100;
const RECENT_TIMESTAMPS_WINDOW: usize = 500;
const RECENT_CLAMP: usize = 200;

/// A single completed request, as retained in the ring buffer.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLog {
    pub timestamp_ms: u64,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: f64,
    pub client: String,
    pub user_agent: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Event shape pushed to the `traffic` broadcast channel: identical to
/// `RequestLog`, kept as a distinct type so the wire contract can diverge
/// from the ring's storage representation without a ripple.
pub type TrafficEvent = RequestLog;

#[derive(Debug, Clone, Serialize)]
pub struct TrafficMetrics {
    pub total_requests: u64,
    pub requests_per_second: f64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub bytes_in_total: u64,
    pub bytes_out_total: u64,
    pub active_connections: u64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub endpoint: String,
    pub method: String,
    pub path: String,
    pub count: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
}

#[derive(Default)]
struct EndpointAccumulator {
    method: String,
    path: String,
    count: u64,
    errors: u64,
    total_latency_ms: f64,
}

struct Inner {
    ring: VecDeque<RequestLog>,
    ring_capacity: usize,
    endpoints: std::collections::HashMap<String, EndpointAccumulator>,
    total_requests: u64,
    total_errors: u64,
    total_latency_ms: f64,
    bytes_in_total: u64,
    bytes_out_total: u64,
    recent_timestamps: VecDeque<Instant>,
    start: Instant,
}

/// Owns the request ring and all derived aggregates. No other component may
/// mutate this state (spec §3 ownership rules).
pub struct TrafficRecorder {
    inner: Mutex<Inner>,
    tx: broadcast::Sender<TrafficEvent>,
}

impl TrafficRecorder {
    pub fn new(ring_capacity: usize, tx: broadcast::Sender<TrafficEvent>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(ring_capacity.max(1)),
                ring_capacity: ring_capacity.max(1),
                endpoints: std::collections::HashMap::new(),
                total_requests: 0,
                total_errors: 0,
                total_latency_ms: 0.0,
                bytes_in_total: 0,
                bytes_out_total: 0,
                recent_timestamps: VecDeque::with_capacity(RECENT_TIMESTAMPS_WINDOW),
                start: Instant::now(),
            }),
            tx,
        }
    }

    /// Record a completed request. Appends to the ring, updates totals and
    /// the per-endpoint histogram under one lock, then pushes the event to
    /// the `traffic` channel (after the lock is released).
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        method: &str,
        path: &str,
        status: u16,
        latency_ms: f64,
        client: &str,
        user_agent: &str,
        bytes_in: u64,
        bytes_out: u64,
    ) {
        let path_no_query = strip_query(path);
        let user_agent: String = user_agent.chars().take(USER_AGENT_MAX_LEN).collect();
        let entry = RequestLog {
            timestamp_ms: epoch_ms(),
            method: method.to_owned(),
            path: path.to_owned(),
            status,
            latency_ms,
            client: client.to_owned(),
            user_agent,
            bytes_in,
            bytes_out,
        };

        let endpoint_key = format!("{method} {path_no_query}");
        let is_error = status >= 400;

        {
            let mut inner = match self.inner.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            if inner.ring.len() >= inner.ring_capacity {
                inner.ring.pop_front();
            }
            inner.ring.push_back(entry.clone());

            inner.total_requests += 1;
            inner.total_latency_ms += latency_ms;
            inner.bytes_in_total += bytes_in;
            inner.bytes_out_total += bytes_out;
            if is_error {
                inner.total_errors += 1;
            }

            if inner.recent_timestamps.len() >= RECENT_TIMESTAMPS_WINDOW {
                inner.recent_timestamps.pop_front();
            }
            inner.recent_timestamps.push_back(Instant::now());

            let acc = inner.endpoints.entry(endpoint_key).or_insert_with(|| EndpointAccumulator {
                method: method.to_owned(),
                path: path_no_query.to_owned(),
                count: 0,
                errors: 0,
                total_latency_ms: 0.0,
            });
            acc.count += 1;
            acc.total_latency_ms += latency_ms;
            if is_error {
                acc.errors += 1;
            }
        }

        self.tx.send(entry);
    }

    /// Up to `n` most recent records, reverse-chronological. `n` clamped to 200.
    pub fn recent(&self, n: usize) -> Vec<RequestLog> {
        let n = n.min(RECENT_CLAMP);
        let inner = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let n = n.min(inner.ring.len());
        inner.ring.iter().rev().take(n).cloned().collect()
    }

    pub fn metrics(&self, active_connections: u64) -> TrafficMetrics {
        let inner = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let now = Instant::now();
        let recent_count =
            inner.recent_timestamps.iter().filter(|t| now.duration_since(**t) < Duration::from_secs(60)).count();
        let rps = recent_count as f64 / 60.0;

        let avg_latency = if inner.total_requests > 0 {
            inner.total_latency_ms / inner.total_requests as f64
        } else {
            0.0
        };
        let error_rate = if inner.total_requests > 0 {
            (inner.total_errors as f64 / inner.total_requests as f64) * 100.0
        } else {
            0.0
        };

        TrafficMetrics {
            total_requests: inner.total_requests,
            requests_per_second: round2(rps),
            avg_latency_ms: round2(avg_latency),
            error_rate: round2(error_rate),
            bytes_in_total: inner.bytes_in_total,
            bytes_out_total: inner.bytes_out_total,
            active_connections,
            uptime_seconds: now.duration_since(inner.start).as_secs(),
        }
    }

    pub fn endpoints(&self) -> Vec<EndpointStats> {
        let inner = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let mut rows: Vec<EndpointStats> = inner
            .endpoints
            .iter()
            .map(|(key, acc)| {
                let avg_latency = if acc.count > 0 { acc.total_latency_ms / acc.count as f64 } else { 0.0 };
                let error_rate = if acc.count > 0 { (acc.errors as f64 / acc.count as f64) * 100.0 } else { 0.0 };
                EndpointStats {
                    endpoint: key.clone(),
                    method: acc.method.clone(),
                    path: acc.path.clone(),
                    count: acc.count,
                    errors: acc.errors,
                    avg_latency_ms: round2(avg_latency),
                    error_rate: round2(error_rate),
                }
            })
            .collect();
        rows.sort_by(|a, b| b.count.cmp(&a.count));
        rows
    }

    pub fn clear(&self) {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        inner.ring.clear();
        inner.endpoints.clear();
        inner.total_requests = 0;
        inner.total_errors = 0;
        inner.total_latency_ms = 0.0;
        inner.bytes_in_total = 0;
        inner.bytes_out_total = 0;
        inner.recent_timestamps.clear();
        inner.start = Instant::now();
    }
}

fn strip_query(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Path prefixes the proxy/middleware must never route through `record()`
/// (spec §4.2 recursion guard).
pub const TRAFFIC_API_PREFIX: &str = "/api/traffic";
pub const TRAFFIC_WS_PREFIX: &str = "/ws/traffic";

pub fn is_self_excluded(path: &str) -> bool {
    path.starts_with(TRAFFIC_API_PREFIX) || path.starts_with(TRAFFIC_WS_PREFIX)
}

#[cfg(test)]
#[path = "traffic_tests.rs"]
mod tests;
