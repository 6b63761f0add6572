// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Waiting-room admission controller.
//!
//! Owns the active-set and waiting-list for the single resource the whole
//! service gates: the target application. All mutation is serialized under
//! one mutex; the critical section never touches I/O (grounded on
//! `queue_manager.py`'s single-threaded list manipulation, reworked onto a
//! `std::sync::Mutex`-guarded state).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in the queue, active or waiting.
#[derive(Debug, Clone)]
struct QueueEntry {
    session: String,
    joined_at: Instant,
    last_heartbeat: Instant,
    is_localhost: bool,
}

/// Outcome of `join`/`heartbeat`/`status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Waiting,
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub session: String,
    pub status: SessionStatus,
    pub position: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStatus {
    pub session: String,
    pub status: SessionStatus,
    pub position: usize,
    pub queue_length: usize,
    /// Coarse, deliberately imprecise hint: `position * 30s`. Not a guarantee.
    pub estimated_wait_secs: Option<u64>,
}

/// Full queue snapshot, broadcast over the `queue` channel on every mutation.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub active_count: usize,
    pub max_concurrent: usize,
    pub active_sessions: Vec<String>,
    pub queue_length: usize,
    pub waiting: Vec<WaitingSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitingSnapshot {
    pub session: String,
    pub position: usize,
    pub wait_secs: u64,
}

struct Inner {
    active: Vec<QueueEntry>,
    waiting: Vec<QueueEntry>,
    max_concurrent: usize,
    prioritize_localhost: bool,
    heartbeat_timeout: Duration,
}

/// Admission controller: the only component with write access to queue state.
pub struct AdmissionController {
    inner: Mutex<Inner>,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(1, true, Duration::from_secs(30))
    }
}

impl AdmissionController {
    pub fn new(max_concurrent: usize, prioritize_localhost: bool, heartbeat_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                active: Vec::new(),
                waiting: Vec::new(),
                max_concurrent: max_concurrent.max(1),
                prioritize_localhost,
                heartbeat_timeout,
            }),
        }
    }

    /// `join(session, is_localhost) -> Decision`. See spec §4.3 for the
    /// resolution order. Returns `(decision, changed)`, where `changed`
    /// indicates a state-changing branch that should be broadcast.
    pub fn join(&self, session: Option<String>, is_localhost: bool) -> (Decision, bool) {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let session = session.filter(|s| !s.is_empty()).unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Instant::now();

        if inner.active.iter().any(|e| e.session == session) {
            return (Decision { session, status: SessionStatus::Active, position: 0 }, false);
        }
        if let Some(pos) = inner.waiting.iter().position(|e| e.session == session) {
            return (Decision { session, status: SessionStatus::Waiting, position: pos + 1 }, false);
        }

        if is_localhost && inner.prioritize_localhost {
            inner.active.push(QueueEntry {
                session: session.clone(),
                joined_at: now,
                last_heartbeat: now,
                is_localhost: true,
            });
            return (Decision { session, status: SessionStatus::Active, position: 0 }, true);
        }

        if inner.active.len() < inner.max_concurrent {
            inner.active.push(QueueEntry {
                session: session.clone(),
                joined_at: now,
                last_heartbeat: now,
                is_localhost,
            });
            return (Decision { session, status: SessionStatus::Active, position: 0 }, true);
        }

        inner.waiting.push(QueueEntry {
            session: session.clone(),
            joined_at: now,
            last_heartbeat: now,
            is_localhost,
        });
        let position = inner.waiting.len();
        (Decision { session, status: SessionStatus::Waiting, position }, true)
    }

    /// Refresh liveness for a known session. Never promotes/demotes/reorders.
    pub fn heartbeat(&self, session: &str) -> Option<UserStatus> {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let now = Instant::now();

        if let Some(entry) = inner.active.iter_mut().find(|e| e.session == session) {
            entry.last_heartbeat = now;
            return Some(UserStatus {
                session: session.to_owned(),
                status: SessionStatus::Active,
                position: 0,
                queue_length: inner.waiting.len(),
                estimated_wait_secs: None,
            });
        }
        if let Some(pos) = inner.waiting.iter().position(|e| e.session == session) {
            inner.waiting[pos].last_heartbeat = now;
            let position = pos + 1;
            return Some(UserStatus {
                session: session.to_owned(),
                status: SessionStatus::Waiting,
                position,
                queue_length: inner.waiting.len(),
                estimated_wait_secs: Some(position as u64 * 30),
            });
        }
        None
    }

    /// Remove a session from wherever it is. Promotes the waiting head if an
    /// active slot freed up. Returns `true` if anything changed.
    pub fn leave(&self, session: &str) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if let Some(pos) = inner.active.iter().position(|e| e.session == session) {
            inner.active.remove(pos);
            promote(&mut inner);
            return true;
        }
        if let Some(pos) = inner.waiting.iter().position(|e| e.session == session) {
            inner.waiting.remove(pos);
            renumber(&mut inner);
            return true;
        }
        false
    }

    /// Read-only lookup.
    pub fn status(&self, session: &str) -> Option<UserStatus> {
        let inner = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if inner.active.iter().any(|e| e.session == session) {
            return Some(UserStatus {
                session: session.to_owned(),
                status: SessionStatus::Active,
                position: 0,
                queue_length: inner.waiting.len(),
                estimated_wait_secs: None,
            });
        }
        inner.waiting.iter().position(|e| e.session == session).map(|pos| {
            let position = pos + 1;
            UserStatus {
                session: session.to_owned(),
                status: SessionStatus::Waiting,
                position,
                queue_length: inner.waiting.len(),
                estimated_wait_secs: Some(position as u64 * 30),
            }
        })
    }

    /// Evict zombies (heartbeat older than the timeout) and promote from the
    /// waiting-list head to fill any freed slots. Returns `true` if the state
    /// changed (one snapshot should be emitted).
    pub fn reap(&self) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let now = Instant::now();
        let timeout = inner.heartbeat_timeout;

        let before_active = inner.active.len();
        let before_waiting = inner.waiting.len();
        inner.active.retain(|e| now.duration_since(e.last_heartbeat) <= timeout);
        inner.waiting.retain(|e| now.duration_since(e.last_heartbeat) <= timeout);
        let evicted = before_active != inner.active.len() || before_waiting != inner.waiting.len();

        if evicted {
            promote(&mut inner);
        }
        evicted
    }

    /// `cap` is coerced to at least 1. Reducing it never evicts already-active
    /// sessions; new admissions use the new cap.
    pub fn configure(&self, max_concurrent: usize, prioritize_localhost: bool) {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        inner.max_concurrent = max_concurrent.max(1);
        inner.prioritize_localhost = prioritize_localhost;
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = match self.inner.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        snapshot_locked(&inner)
    }
}

fn promote(inner: &mut Inner) {
    while inner.active.len() < inner.max_concurrent && !inner.waiting.is_empty() {
        let next = inner.waiting.remove(0);
        inner.active.push(next);
    }
    renumber(inner);
}

fn renumber(_inner: &mut Inner) {
    // Positions are derived from list order at read time; nothing to store.
}

fn snapshot_locked(inner: &Inner) -> QueueSnapshot {
    let now = Instant::now();
    QueueSnapshot {
        active_count: inner.active.len(),
        max_concurrent: inner.max_concurrent,
        active_sessions: inner.active.iter().map(|e| e.session.clone()).collect(),
        queue_length: inner.waiting.len(),
        waiting: inner
            .waiting
            .iter()
            .enumerate()
            .map(|(i, e)| WaitingSnapshot {
                session: e.session.clone(),
                position: i + 1,
                wait_secs: now.duration_since(e.joined_at).as_secs(),
            })
            .collect(),
    }
}

#[cfg(test)]
#[path = "admission_tests.rs"]
mod tests;
