// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process Supervisor: launches, streams logs from, and tears down the
//! backend (and optional frontend) child process tree.
//!
//! Grounded on `original_source/backend/server_manager.py`'s `ServerManager`
//! (dangerous-pattern command filter, merged-stream line reader, 5-second
//! graceful-then-kill window), reworked onto process-group spawning: spawn
//! under a fresh process group, signal the whole group rather than trust the
//! direct child to forward signals, reap via a dedicated async task instead
//! of a blocking `waitpid`.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const DANGEROUS_PATTERNS: &[&str] = &["$(", "`", "|", ">", "<", ";", "\n", "\r"];
const GRACE_PERIOD: Duration = Duration::from_secs(5);
const RESTART_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Backend,
    Frontend,
}

impl Role {
    fn prefix(self) -> &'static str {
        match self {
            Role::Backend => "backend",
            Role::Frontend => "frontend",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartOutcome {
    pub success: bool,
    pub message: String,
    pub backend_pid: Option<u32>,
    pub frontend_pid: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ControlOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub uptime_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub backend: ProcessStatus,
    pub frontend: Option<ProcessStatus>,
}

struct ManagedChild {
    child: tokio::process::Child,
    pid: u32,
    started_at: Instant,
}

impl ManagedChild {
    /// Non-blocking liveness check backed by an actual `waitpid`, per spec
    /// §4.4 ("queries the OS directly, does not trust the running flag
    /// alone"). Returns `true` if the process is still running.
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

struct SupervisorState {
    backend: Option<ManagedChild>,
    frontend: Option<ManagedChild>,
    log: VecDeque<String>,
}

/// Owns both child handles and the combined log ring. Exclusively owned by
/// this component (spec §3 ownership rules): no other module may reach into
/// process state.
///
/// Always held behind an `Arc` by its owner: log-reader tasks hold a clone
/// of that `Arc` so they can append to the ring and rebroadcast after the
/// supervisor itself has moved on.
pub struct ProcessSupervisor {
    state: Mutex<SupervisorState>,
    log_capacity: usize,
    logs_tx: broadcast::Sender<String>,
}

impl ProcessSupervisor {
    pub fn new(log_capacity: usize, logs_tx: broadcast::Sender<String>) -> Self {
        Self {
            state: Mutex::new(SupervisorState {
                backend: None,
                frontend: None,
                log: VecDeque::with_capacity(log_capacity.max(1)),
            }),
            log_capacity: log_capacity.max(1),
            logs_tx,
        }
    }

    /// Start the backend (and, if given, a distinct frontend) process tree.
    /// Fails if a backend is already running. `fe_dir` equal to `dir` is
    /// refused (same-directory collapse would collide on the same port).
    pub async fn start(
        self: &Arc<Self>,
        dir: &Path,
        command: &str,
        fe_dir: Option<&Path>,
        fe_command: Option<&str>,
    ) -> StartOutcome {
        {
            let mut state = match self.state.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            if let Some(backend) = state.backend.as_mut() {
                if backend.is_alive() {
                    return StartOutcome {
                        success: false,
                        message: "a process is already running".to_owned(),
                        backend_pid: Some(backend.pid),
                        frontend_pid: state.frontend.as_ref().map(|f| f.pid),
                    };
                }
                state.backend = None;
            }
        }

        if !dir.is_dir() {
            return StartOutcome {
                success: false,
                message: format!("{} is not a directory", dir.display()),
                backend_pid: None,
                frontend_pid: None,
            };
        }
        if let Err(reason) = validate_command(command) {
            return StartOutcome {
                success: false,
                message: reason,
                backend_pid: None,
                frontend_pid: None,
            };
        }

        let spawn_frontend = match (fe_dir, fe_command) {
            (Some(fd), Some(fc)) if fd != dir => {
                if let Err(reason) = validate_command(fc) {
                    return StartOutcome {
                        success: false,
                        message: reason,
                        backend_pid: None,
                        frontend_pid: None,
                    };
                }
                Some((fd.to_path_buf(), fc.to_owned()))
            }
            (Some(fd), Some(_)) if fd == dir => {
                warn!("refusing same-directory frontend: {}", dir.display());
                None
            }
            _ => None,
        };

        let backend = match self.spawn_one(dir, command, Role::Backend) {
            Ok(child) => child,
            Err(err) => {
                return StartOutcome {
                    success: false,
                    message: format!("failed to start backend: {err}"),
                    backend_pid: None,
                    frontend_pid: None,
                }
            }
        };
        let backend_pid = backend.pid;
        info!(pid = backend_pid, dir = %dir.display(), "backend process started");

        let frontend = match spawn_frontend {
            Some((fd, fc)) => match self.spawn_one(&fd, &fc, Role::Frontend) {
                Ok(child) => {
                    info!(pid = child.pid, dir = %fd.display(), "frontend process started");
                    Some(child)
                }
                Err(err) => {
                    warn!("failed to start frontend: {err}");
                    None
                }
            },
            None => None,
        };
        let frontend_pid = frontend.as_ref().map(|f| f.pid);

        let mut state = match self.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        state.backend = Some(backend);
        state.frontend = frontend;

        StartOutcome {
            success: true,
            message: "started".to_owned(),
            backend_pid: Some(backend_pid),
            frontend_pid,
        }
    }

    fn spawn_one(self: &Arc<Self>, dir: &Path, command: &str, role: Role) -> std::io::Result<ManagedChild> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(dir)
            .env("PYTHONUNBUFFERED", "1")
            .env("NODE_NO_READLINE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id().unwrap_or_default();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        self.spawn_reader(stdout, stderr, role);

        Ok(ManagedChild {
            child,
            pid,
            started_at: Instant::now(),
        })
    }

    /// One reader task per child, interleaving stdout and stderr into a
    /// single merged log stream (the original's `stderr=subprocess.STDOUT`
    /// merge, reworked as an async select over both pipes instead of an OS
    /// level fd redirect). Decodes each line with `from_utf8_lossy` so a
    /// single malformed byte never ends the stream.
    fn spawn_reader(
        self: &Arc<Self>,
        stdout: Option<tokio::process::ChildStdout>,
        stderr: Option<tokio::process::ChildStderr>,
        role: Role,
    ) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut stdout_reader = stdout.map(BufReader::new);
            let mut stderr_reader = stderr.map(BufReader::new);

            loop {
                if stdout_reader.is_none() && stderr_reader.is_none() {
                    break;
                }

                tokio::select! {
                    line = read_line_lossy(&mut stdout_reader) => {
                        match line {
                            Some(line) => supervisor.emit_line(&line, role),
                            None => stdout_reader = None,
                        }
                    }
                    line = read_line_lossy(&mut stderr_reader) => {
                        match line {
                            Some(line) => supervisor.emit_line(&line, role),
                            None => stderr_reader = None,
                        }
                    }
                }
            }
        });
    }

    fn emit_line(&self, line: &str, role: Role) {
        let formatted = format!("[{}] [{}] {}", format_hms(epoch_secs()), role.prefix(), line);
        debug!(%formatted, "child output line");
        self.push_line(formatted);
    }

    fn push_line(&self, line: String) {
        let mut state = match self.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if state.log.len() >= self.log_capacity {
            state.log.pop_front();
        }
        state.log.push_back(line.clone());
        drop(state);
        self.logs_tx.send(line);
    }

    /// Terminate the entire process tree. Graceful `SIGTERM` to the process
    /// group, then `SIGKILL` after the grace period. Idempotent.
    pub async fn stop(&self) -> ControlOutcome {
        let (backend, frontend) = {
            let mut state = match self.state.lock() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            (state.backend.take(), state.frontend.take())
        };

        if backend.is_none() && frontend.is_none() {
            return ControlOutcome {
                success: true,
                message: "nothing running".to_owned(),
            };
        }

        if let Some(mut backend) = backend {
            terminate_tree(&mut backend).await;
        }
        if let Some(mut frontend) = frontend {
            terminate_tree(&mut frontend).await;
        }

        info!("process tree stopped");
        ControlOutcome {
            success: true,
            message: "stopped".to_owned(),
        }
    }

    /// `stop(); sleep 1s; start(...)`. The pause covers OS-level port release.
    pub async fn restart(
        self: &Arc<Self>,
        dir: &Path,
        command: &str,
        fe_dir: Option<&Path>,
        fe_command: Option<&str>,
    ) -> StartOutcome {
        let _ = self.stop().await;
        tokio::time::sleep(RESTART_SETTLE).await;
        self.start(dir, command, fe_dir, fe_command).await
    }

    pub fn status(&self) -> SupervisorStatus {
        let mut state = match self.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };

        let backend = match state.backend.as_mut() {
            Some(child) if child.is_alive() => ProcessStatus {
                running: true,
                pid: Some(child.pid),
                uptime_secs: Some(child.started_at.elapsed().as_secs()),
            },
            Some(_) => {
                state.backend = None;
                ProcessStatus {
                    running: false,
                    pid: None,
                    uptime_secs: None,
                }
            }
            None => ProcessStatus {
                running: false,
                pid: None,
                uptime_secs: None,
            },
        };

        let frontend_alive = state.frontend.as_mut().map(|child| child.is_alive());
        let frontend = match frontend_alive {
            Some(true) => {
                let child = state.frontend.as_ref().expect("checked Some above");
                Some(ProcessStatus {
                    running: true,
                    pid: Some(child.pid),
                    uptime_secs: Some(child.started_at.elapsed().as_secs()),
                })
            }
            Some(false) => {
                state.frontend = None;
                Some(ProcessStatus {
                    running: false,
                    pid: None,
                    uptime_secs: None,
                })
            }
            None => None,
        };

        SupervisorStatus { backend, frontend }
    }

    pub fn recent_logs(&self, n: usize) -> Vec<String> {
        let state = match self.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let n = n.min(state.log.len());
        state.log.iter().rev().take(n).rev().cloned().collect()
    }
}

/// Reject commands containing shell metacharacters that would let an
/// operator typo turn a single command into a pipeline, redirection, or
/// chained statement. A conservative filter, not a security boundary.
pub fn validate_command(command: &str) -> Result<(), String> {
    if command.trim().is_empty() {
        return Err("command must not be empty".to_owned());
    }
    for pattern in DANGEROUS_PATTERNS {
        if command.contains(pattern) {
            return Err(format!("command contains a disallowed sequence: {pattern:?}"));
        }
    }
    Ok(())
}

/// Read one line as raw bytes and decode it lossily, so a non-UTF-8 byte
/// from the child never kills the reader task. Returns `None` at EOF or on
/// an unrecoverable I/O error; `reader` being `None` pends forever so a
/// `tokio::select!` between two optional streams only ever resolves on the
/// one still open.
async fn read_line_lossy<R>(reader: &mut Option<BufReader<R>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return std::future::pending().await;
    };
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf).await {
        Ok(0) => None,
        Ok(_) => {
            while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                buf.pop();
            }
            Some(String::from_utf8_lossy(&buf).into_owned())
        }
        Err(_) => None,
    }
}

async fn terminate_tree(managed: &mut ManagedChild) {
    let pgid = Pid::from_raw(managed.pid as i32);
    if killpg(pgid, Signal::SIGTERM).is_err() {
        let _ = managed.child.start_kill();
    }

    let wait = tokio::time::timeout(GRACE_PERIOD, managed.child.wait()).await;
    if wait.is_err() {
        let _ = killpg(pgid, Signal::SIGKILL);
        let _ = managed.child.wait().await;
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn format_hms(epoch_secs: u64) -> String {
    let secs_of_day = epoch_secs % 86_400;
    let h = secs_of_day / 3600;
    let m = (secs_of_day % 3600) / 60;
    let s = secs_of_day % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
