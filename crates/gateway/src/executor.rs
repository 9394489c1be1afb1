// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandboxed executor for agent-submitted command scripts.
//!
//! Submitted code never runs in the gateway's address space. It is written
//! to a scratch file together with a small SDK prelude that talks back to
//! the gateway over HTTP, then run in a child process in its own process
//! group. The parent keeps the right to signal, terminate, and time out.
//! Every exit path ends with the arm holding and the base stopped.

use std::io::Write;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::AsyncReadExt;

use crate::backend::Backends;
use crate::error::{ApiError, GatewayError};
use crate::state::epoch_ms;
use crate::supervisor::spawn::is_process_alive;

const STOP_GRACE: Duration = Duration::from_secs(3);
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Executor settings, fixed at gateway startup.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub interpreter: String,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    /// Gateway base URL handed to the child SDK.
    pub gateway_url: String,
    /// Prepend the SDK prelude. Disabled runs the submitted file verbatim
    /// (debugging aid for non-Python payloads).
    pub wrap_sdk: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Stopped,
}

/// Record of the most recent execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub state: ExecutionState,
    pub started_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Live status for `GET /code/status`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub status: String,
    pub is_running: bool,
}

struct LiveExecution {
    execution_id: String,
    pid: u32,
    stop_requested: Arc<AtomicBool>,
}

/// At most one execution is live at a time.
pub struct CodeExecutor {
    config: ExecutorConfig,
    backends: Backends,
    record: Arc<Mutex<Option<ExecutionRecord>>>,
    live: Arc<Mutex<Option<LiveExecution>>>,
}

impl CodeExecutor {
    pub fn new(config: ExecutorConfig, backends: Backends) -> Self {
        Self { config, backends, record: Arc::new(Mutex::new(None)), live: Arc::new(Mutex::new(None)) }
    }

    /// Start an execution. Fails with `busy` while one is live.
    pub fn execute(
        &self,
        code: &str,
        timeout: Option<Duration>,
        lease_id: Option<&str>,
    ) -> Result<String, ApiError> {
        let mut live = self.live.lock();
        if live.is_some() {
            return Err(ApiError::new(GatewayError::Busy, "an execution is already running"));
        }

        let timeout = timeout.unwrap_or(self.config.default_timeout).min(self.config.max_timeout);
        let execution_id = uuid::Uuid::new_v4().to_string();

        let script = if self.config.wrap_sdk {
            format!("{PRELUDE}\n{code}\n")
        } else {
            code.to_owned()
        };
        let mut file = tempfile::Builder::new()
            .prefix("robogate-exec-")
            .suffix(".py")
            .tempfile()
            .map_err(ApiError::internal)?;
        file.write_all(script.as_bytes()).map_err(ApiError::internal)?;
        file.flush().map_err(ApiError::internal)?;

        let mut cmd = tokio::process::Command::new(&self.config.interpreter);
        cmd.arg(file.path());
        cmd.env("ROBOGATE_URL", &self.config.gateway_url);
        if let Some(lease) = lease_id {
            cmd.env("ROBOGATE_LEASE", lease);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                let record = ExecutionRecord {
                    execution_id: execution_id.clone(),
                    state: ExecutionState::Failed,
                    started_at_ms: epoch_ms(),
                    finished_at_ms: Some(epoch_ms()),
                    duration_s: Some(0.0),
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    error: Some(format!("failed to spawn interpreter: {e}")),
                };
                *self.record.lock() = Some(record);
                return Err(ApiError::internal(e));
            }
        };
        let Some(pid) = child.id() else {
            return Err(ApiError::internal("spawned child has no pid"));
        };

        let stop_requested = Arc::new(AtomicBool::new(false));
        let started_at_ms = epoch_ms();
        *self.record.lock() = Some(ExecutionRecord {
            execution_id: execution_id.clone(),
            state: ExecutionState::Running,
            started_at_ms,
            finished_at_ms: None,
            duration_s: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        });
        *live = Some(LiveExecution {
            execution_id: execution_id.clone(),
            pid,
            stop_requested: Arc::clone(&stop_requested),
        });
        drop(live);
        tracing::info!(execution_id = %execution_id, pid, ?timeout, "execution started");

        // Monitor task: collect output, enforce the timeout, settle the
        // record, and leave the robot in a safe state.
        let record = Arc::clone(&self.record);
        let live = Arc::clone(&self.live);
        let backends = self.backends.clone();
        let id = execution_id.clone();
        tokio::spawn(async move {
            // Keep the scratch file alive for the child's whole run.
            let _file = file;

            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let out_task = tokio::spawn(read_all(stdout));
            let err_task = tokio::spawn(read_all(stderr));

            let started = tokio::time::Instant::now();
            let (state, exit_code, error) =
                match tokio::time::timeout(timeout, child.wait()).await {
                    Ok(Ok(status)) => {
                        if stop_requested.load(Ordering::Relaxed) {
                            (ExecutionState::Stopped, status.code(), None)
                        } else if status.success() {
                            (ExecutionState::Completed, status.code(), None)
                        } else {
                            (
                                ExecutionState::Failed,
                                status.code(),
                                Some(format!("interpreter exited with {status}")),
                            )
                        }
                    }
                    Ok(Err(e)) => (ExecutionState::Failed, None, Some(e.to_string())),
                    Err(_) => {
                        tracing::warn!(execution_id = %id, "execution timed out, killing");
                        crate::supervisor::spawn::terminate_group(pid, KILL_REAP_TIMEOUT).await;
                        let _ = tokio::time::timeout(KILL_REAP_TIMEOUT, child.wait()).await;
                        (ExecutionState::Timeout, None, Some("execution timed out".to_owned()))
                    }
                };

            let stdout = out_task.await.unwrap_or_default();
            let stderr = err_task.await.unwrap_or_default();

            {
                let mut rec = record.lock();
                if let Some(rec) = rec.as_mut() {
                    rec.state = state;
                    rec.finished_at_ms = Some(epoch_ms());
                    rec.duration_s = Some(started.elapsed().as_secs_f64());
                    rec.exit_code = exit_code;
                    rec.stdout = stdout;
                    rec.stderr = stderr;
                    rec.error = error;
                }
            }
            *live.lock() = None;

            // Safety floor on every exit path.
            backends.safe_stop().await;
            tracing::info!(execution_id = %id, ?state, "execution finished");
        });

        Ok(execution_id)
    }

    /// Ask the running execution to stop: SIGTERM now, SIGKILL after the
    /// grace window. Returns false when nothing is running.
    pub fn stop(&self) -> bool {
        let live = self.live.lock();
        let Some(exec) = live.as_ref() else {
            return false;
        };
        exec.stop_requested.store(true, Ordering::Relaxed);
        let pid = exec.pid;
        tracing::info!(execution_id = %exec.execution_id, pid, "stopping execution");
        if let Ok(pid_i32) = i32::try_from(pid) {
            let _ = killpg(Pid::from_raw(pid_i32), Signal::SIGTERM);
        }
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE).await;
            if is_process_alive(pid) {
                tracing::warn!(pid, "execution ignored SIGTERM, killing");
                if let Ok(pid_i32) = i32::try_from(pid) {
                    let _ = killpg(Pid::from_raw(pid_i32), Signal::SIGKILL);
                }
            }
        });
        true
    }

    pub fn status(&self) -> ExecutorStatus {
        if let Some(exec) = self.live.lock().as_ref() {
            return ExecutorStatus {
                execution_id: Some(exec.execution_id.clone()),
                status: "running".to_owned(),
                is_running: true,
            };
        }
        match self.record.lock().as_ref() {
            Some(rec) => ExecutorStatus {
                execution_id: Some(rec.execution_id.clone()),
                status: state_str(rec.state).to_owned(),
                is_running: false,
            },
            None => ExecutorStatus { execution_id: None, status: "idle".to_owned(), is_running: false },
        }
    }

    pub fn result(&self) -> Option<ExecutionRecord> {
        self.record.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.live.lock().is_some()
    }
}

fn state_str(state: ExecutionState) -> &'static str {
    match state {
        ExecutionState::Pending => "pending",
        ExecutionState::Running => "running",
        ExecutionState::Completed => "completed",
        ExecutionState::Failed => "failed",
        ExecutionState::Timeout => "timeout",
        ExecutionState::Stopped => "stopped",
    }
}

async fn read_all<R: tokio::io::AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Python SDK prelude written ahead of the submitted code. Synchronous
/// blocking calls only; failures raise so control returns to the executor.
const PRELUDE: &str = r#"
import json as _json
import os as _os
import urllib.error as _uerr
import urllib.request as _urq


class RobotError(RuntimeError):
    pass


class Robot:
    """Blocking SDK over the gateway HTTP API."""

    def __init__(self):
        self._url = _os.environ.get("ROBOGATE_URL", "http://127.0.0.1:8800")
        self._lease = _os.environ.get("ROBOGATE_LEASE", "")

    def _call(self, method, path, body=None):
        data = _json.dumps(body).encode() if body is not None else None
        req = _urq.Request(self._url + path, data=data, method=method)
        req.add_header("Content-Type", "application/json")
        if self._lease:
            req.add_header("X-Lease-Id", self._lease)
        try:
            with _urq.urlopen(req, timeout=60) as resp:
                raw = resp.read()
        except _uerr.HTTPError as e:
            raise RobotError(f"{method} {path} -> {e.code}: {e.read().decode(errors='replace')}")
        except OSError as e:
            raise RobotError(f"{method} {path}: {e}")
        return _json.loads(raw) if raw else None

    # -- sensors (read-only) --------------------------------------------------

    def state(self):
        return self._call("GET", "/state")

    def joints(self):
        arm = (self.state() or {}).get("arm")
        if not arm:
            raise RobotError("arm state unavailable")
        return arm["value"]["joints"]

    def pose(self):
        arm = (self.state() or {}).get("arm")
        if not arm:
            raise RobotError("arm state unavailable")
        return arm["value"]["pose"]

    def base_pose(self):
        base = (self.state() or {}).get("base")
        if not base:
            raise RobotError("base state unavailable")
        return base["value"]["pose"]

    def gripper_width(self):
        gripper = (self.state() or {}).get("gripper")
        if not gripper:
            raise RobotError("gripper state unavailable")
        return gripper["value"]["width"]

    # -- arm ------------------------------------------------------------------

    def move_joints(self, values):
        self._call("POST", "/cmd/arm/move", {"mode": "joint_position", "values": list(values)})

    def move_pose(self, values):
        self._call("POST", "/cmd/arm/move", {"mode": "cartesian_pose", "values": list(values)})

    def move_joints_delta(self, delta):
        current = self.joints()
        self.move_joints([c + d for c, d in zip(current, delta)])

    def arm_stop(self):
        self._call("POST", "/cmd/arm/stop")

    # -- base -----------------------------------------------------------------

    def base_move(self, x, y, theta):
        self._call("POST", "/cmd/base/move", {"x": x, "y": y, "theta": theta})

    def base_velocity(self, vx, vy, wz, frame="local"):
        self._call("POST", "/cmd/base/move", {"vx": vx, "vy": vy, "wz": wz, "frame": frame})

    def base_move_delta(self, dx, dy, dtheta):
        pose = self.base_pose()
        self.base_move(pose["x"] + dx, pose["y"] + dy, pose["theta"] + dtheta)

    def base_stop(self):
        self._call("POST", "/cmd/base/stop")

    # -- gripper --------------------------------------------------------------

    def gripper(self, action, width=None, speed=None, force=None):
        body = {"action": action}
        if width is not None:
            body["width"] = width
        if speed is not None:
            body["speed"] = speed
        if force is not None:
            body["force"] = force
        return self._call("POST", "/cmd/gripper", body)

    def gripper_open(self):
        return self.gripper("open")

    def gripper_close(self):
        return self.gripper("close")

    def grasp(self, width=0.0, force=None):
        return self.gripper("grasp", width=width, force=force)

    # -- rewind ---------------------------------------------------------------

    def rewind(self, steps, dry_run=False):
        return self._call("POST", "/rewind/steps", {"steps": steps, "dry_run": dry_run})


robot = Robot()
"#;

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
