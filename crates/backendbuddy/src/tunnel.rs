// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tunnel Supervisor: runs two external tunnel agents as children, extracts
//! their public URL, and keeps them alive independently of the Process
//! Supervisor's restart cycle.
//!
//! Grounded on `original_source/backend/network_manager.py`'s
//! `start_ngrok`/`start_cloudflare` pair, with the HTTP polling reworked
//! onto a small `reqwest::Client` wrapper with a fixed timeout rather than a
//! bespoke one-off request.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};

const NGROK_LOCAL_API: &str = "http://127.0.0.1:4040/api/tunnels";
const NGROK_WAIT: Duration = Duration::from_secs(2);
const CLOUDFLARE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const CLOUDFLARE_POLL_ATTEMPTS: u32 = 20; // 20 * 500ms = 10s
const STOP_GRACE: Duration = Duration::from_secs(2);

fn cloudflare_url_pattern() -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"https://[a-zA-Z0-9-]+\.trycloudflare\.com").unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Brand {
    Ngrok,
    Cloudflare,
}

impl Brand {
    fn program(self) -> &'static str {
        match self {
            Brand::Ngrok => "ngrok",
            Brand::Cloudflare => "cloudflared",
        }
    }
}

/// Build the argv for starting `brand` against `internal_port`. ngrok takes
/// a bare port (`ngrok http 8000`); `cloudflared tunnel --url` requires a
/// full URL, not a bare port (`cloudflared tunnel --url http://127.0.0.1:8000`).
fn build_argv(brand: Brand, internal_port: u16) -> (&'static str, Vec<String>) {
    match brand {
        Brand::Ngrok => (brand.program(), vec!["http".to_owned(), internal_port.to_string()]),
        Brand::Cloudflare => (
            brand.program(),
            vec!["tunnel".to_owned(), "--url".to_owned(), format!("http://127.0.0.1:{internal_port}")],
        ),
    }
}

#[derive(Debug, Serialize)]
pub struct TunnelOutcome {
    pub success: bool,
    pub url: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TunnelStatus {
    pub running: bool,
    pub url: Option<String>,
}

struct Handle {
    child: Child,
    url: Option<String>,
    port: u16,
}

/// One tunnel agent (ngrok-style or cloudflare-style). Each brand is an
/// independent instance of this type; the Tunnel Supervisor proper is just
/// two of these plus the shared "ensure" policy (see `crate::state`).
pub struct TunnelAgent {
    brand: Brand,
    handle: Mutex<Option<Handle>>,
    http: reqwest::Client,
}

impl TunnelAgent {
    pub fn new(brand: Brand) -> Self {
        Self {
            brand,
            handle: Mutex::new(None),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Start the tunnel pointed at `internal_port`. Idempotent if a URL is
    /// already known.
    pub async fn start(self: &Arc<Self>, internal_port: u16) -> TunnelOutcome {
        {
            let guard = match self.handle.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            if let Some(handle) = guard.as_ref() {
                if handle.url.is_some() {
                    return TunnelOutcome {
                        success: true,
                        url: handle.url.clone(),
                        message: Some("already running".to_owned()),
                    };
                }
            }
        }

        let (program, args) = build_argv(self.brand, internal_port);

        let mut cmd = Command::new(program);
        cmd.args(&args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(brand = ?self.brand, "tunnel agent not installed or failed to spawn: {err}");
                return TunnelOutcome {
                    success: false,
                    url: None,
                    message: Some(format!("{program} not available: {err}")),
                };
            }
        };

        let url = match self.brand {
            Brand::Ngrok => {
                tokio::time::sleep(NGROK_WAIT).await;
                self.fetch_ngrok_url().await
            }
            Brand::Cloudflare => {
                let stdout = child.stdout.take();
                let stderr = child.stderr.take();
                self.scan_cloudflare_output(stdout, stderr).await
            }
        };

        {
            let mut guard = match self.handle.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            *guard = Some(Handle {
                child,
                url: url.clone(),
                port: internal_port,
            });
        }

        match url {
            Some(url) => {
                info!(brand = ?self.brand, %url, "tunnel established");
                TunnelOutcome {
                    success: true,
                    url: Some(url),
                    message: None,
                }
            }
            None => TunnelOutcome {
                success: false,
                url: None,
                message: Some("timed out waiting for public URL".to_owned()),
            },
        }
    }

    async fn fetch_ngrok_url(&self) -> Option<String> {
        let resp = self.http.get(NGROK_LOCAL_API).send().await.ok()?;
        let body: serde_json::Value = resp.json().await.ok()?;
        body.get("tunnels")?.as_array()?.first()?.get("public_url")?.as_str().map(str::to_owned)
    }

    async fn scan_cloudflare_output(
        &self,
        stdout: Option<tokio::process::ChildStdout>,
        stderr: Option<tokio::process::ChildStderr>,
    ) -> Option<String> {
        let pattern = cloudflare_url_pattern();
        let found = Arc::new(tokio::sync::Mutex::new(None::<String>));

        if let Some(stdout) = stdout {
            spawn_scanner(stdout, pattern.clone(), Arc::clone(&found));
        }
        if let Some(stderr) = stderr {
            spawn_scanner(stderr, pattern, Arc::clone(&found));
        }

        for _ in 0..CLOUDFLARE_POLL_ATTEMPTS {
            if let Some(url) = found.lock().await.clone() {
                return Some(url);
            }
            tokio::time::sleep(CLOUDFLARE_POLL_INTERVAL).await;
        }
        found.lock().await.clone()
    }

    /// Graceful signal, brief wait, then kill. Clears handle and URL.
    pub async fn stop(&self) -> TunnelOutcome {
        let handle = {
            let mut guard = match self.handle.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            guard.take()
        };

        let Some(mut handle) = handle else {
            return TunnelOutcome {
                success: true,
                url: None,
                message: Some("not running".to_owned()),
            };
        };

        #[cfg(unix)]
        if let Some(pid) = handle.child.id() {
            let pgid = nix::unistd::Pid::from_raw(pid as i32);
            let _ = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGTERM);
        }

        if tokio::time::timeout(STOP_GRACE, handle.child.wait()).await.is_err() {
            let _ = handle.child.start_kill();
            let _ = handle.child.wait().await;
        }

        TunnelOutcome {
            success: true,
            url: None,
            message: None,
        }
    }

    pub fn status(&self) -> TunnelStatus {
        let mut guard = match self.handle.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        match guard.as_mut() {
            Some(handle) => match handle.child.try_wait() {
                Ok(None) => TunnelStatus {
                    running: true,
                    url: handle.url.clone(),
                },
                _ => {
                    *guard = None;
                    TunnelStatus {
                        running: false,
                        url: None,
                    }
                }
            },
            None => TunnelStatus {
                running: false,
                url: None,
            },
        }
    }

    /// The port this tunnel was last started against, if running.
    pub fn current_port(&self) -> Option<u16> {
        let guard = match self.handle.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        guard.as_ref().map(|h| h.port)
    }
}

fn spawn_scanner<R>(stream: R, pattern: Regex, found: Arc<tokio::sync::Mutex<Option<String>>>)
where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if found.lock().await.is_some() {
                continue;
            }
            if let Some(m) = pattern.find(&line) {
                *found.lock().await = Some(m.as_str().to_owned());
            }
        }
    });
}

/// Resolve the effective internal port a tunnel should point at: the admin
/// port when the queue is enabled (so tunnel traffic passes through
/// admission), otherwise the target port directly.
pub fn effective_internal_port(queue_enabled: bool, admin_port: u16, target_port: u16) -> u16 {
    if queue_enabled {
        admin_port
    } else {
        target_port
    }
}

/// The two tunnels named in spec §4.5, bundled so callers (transport/http,
/// the "ensure" background task) can address either by brand.
pub struct TunnelSupervisor {
    pub ngrok: Arc<TunnelAgent>,
    pub cloudflare: Arc<TunnelAgent>,
}

impl TunnelSupervisor {
    pub fn new() -> Self {
        Self {
            ngrok: Arc::new(TunnelAgent::new(Brand::Ngrok)),
            cloudflare: Arc::new(TunnelAgent::new(Brand::Cloudflare)),
        }
    }
}

impl Default for TunnelSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tests;
