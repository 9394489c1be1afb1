// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the robogate gateway.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "robogate", about = "Hardware-control gateway for a mobile manipulator")]
pub struct GatewayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "ROBOGATE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8800, env = "ROBOGATE_PORT")]
    pub port: u16,

    /// Use simulated backends instead of connecting to real hardware.
    #[arg(long, env = "ROBOGATE_DRY_RUN")]
    pub dry_run: bool,

    /// Start all configured backend services at boot.
    #[arg(long, env = "ROBOGATE_AUTO_START_SERVICES")]
    pub auto_start_services: bool,

    /// Disable the backend service supervisor entirely.
    #[arg(long, env = "ROBOGATE_NO_SERVICE_MANAGER")]
    pub no_service_manager: bool,

    /// Path to the service definitions JSON file.
    #[arg(long, env = "ROBOGATE_SERVICES_CONFIG")]
    pub services_config: Option<PathBuf>,

    /// State directory (PID file, scratch). Defaults to a temp-dir subdir.
    #[arg(long, env = "ROBOGATE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Arm controller streaming socket address.
    #[arg(long, default_value = "127.0.0.1:8710", env = "ROBOGATE_ARM_ADDR")]
    pub arm_addr: String,

    /// Base RPC server URL.
    #[arg(long, default_value = "http://127.0.0.1:8720", env = "ROBOGATE_BASE_URL")]
    pub base_url: String,

    /// Gripper controller URL.
    #[arg(long, default_value = "http://127.0.0.1:8730", env = "ROBOGATE_GRIPPER_URL")]
    pub gripper_url: String,

    /// Camera stream URL.
    #[arg(long, default_value = "http://127.0.0.1:8740", env = "ROBOGATE_CAMERA_URL")]
    pub camera_url: String,

    /// Arm command stream rate in Hz.
    #[arg(long, default_value_t = 50, env = "ROBOGATE_ARM_STREAM_HZ")]
    pub arm_stream_hz: u32,

    /// Arm state poll interval in milliseconds.
    #[arg(long, default_value_t = 20, env = "ROBOGATE_ARM_POLL_MS")]
    pub arm_poll_ms: u64,

    /// Base state poll interval in milliseconds.
    #[arg(long, default_value_t = 100, env = "ROBOGATE_BASE_POLL_MS")]
    pub base_poll_ms: u64,

    /// Gripper state poll interval in milliseconds.
    #[arg(long, default_value_t = 100, env = "ROBOGATE_GRIPPER_POLL_MS")]
    pub gripper_poll_ms: u64,

    /// Snapshot publish interval in milliseconds.
    #[arg(long, default_value_t = 50, env = "ROBOGATE_PUBLISH_MS")]
    pub publish_ms: u64,

    /// Lease time-to-live in seconds.
    #[arg(long, default_value_t = 600, env = "ROBOGATE_LEASE_TTL_S")]
    pub lease_ttl_s: u64,

    /// Lease idle timeout in seconds.
    #[arg(long, default_value_t = 120, env = "ROBOGATE_LEASE_IDLE_S")]
    pub lease_idle_s: u64,

    /// Trajectory recorder capacity (waypoints).
    #[arg(long, default_value_t = 10_000, env = "ROBOGATE_TRAJECTORY_CAPACITY")]
    pub trajectory_capacity: usize,

    /// Default code execution timeout in seconds.
    #[arg(long, default_value_t = 300, env = "ROBOGATE_EXEC_TIMEOUT_S")]
    pub exec_timeout_s: u64,

    /// Maximum code execution timeout a client may request, in seconds.
    #[arg(long, default_value_t = 1800, env = "ROBOGATE_EXEC_TIMEOUT_MAX_S")]
    pub exec_timeout_max_s: u64,

    /// Interpreter used to run submitted scripts.
    #[arg(long, default_value = "python3", env = "ROBOGATE_EXEC_INTERPRETER")]
    pub exec_interpreter: String,

    /// Enable the auto-rewind safety monitor.
    #[arg(long, env = "ROBOGATE_AUTO_REWIND")]
    pub auto_rewind: bool,

    /// Supervisor health check interval in milliseconds.
    #[arg(long, default_value_t = 5000, env = "ROBOGATE_HEALTH_INTERVAL_MS")]
    pub health_interval_ms: u64,

    /// Per-service log ring capacity in lines.
    #[arg(long, default_value_t = 500, env = "ROBOGATE_LOG_RING_LINES")]
    pub log_ring_lines: usize,
}

impl GatewayConfig {
    pub fn arm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.arm_poll_ms)
    }

    pub fn base_poll_interval(&self) -> Duration {
        Duration::from_millis(self.base_poll_ms)
    }

    pub fn gripper_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gripper_poll_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_s)
    }

    pub fn lease_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_idle_s)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_s)
    }

    pub fn exec_timeout_max(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_max_s)
    }

    /// State directory, created on demand.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| std::env::temp_dir().join("robogate"))
    }

    /// Public base URL of this gateway (for the script SDK).
    pub fn public_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Runtime-adjustable rewind parameters (`GET|PUT /rewind/config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewindConfig {
    /// Maximum consecutive same-kind waypoints executed as one chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Seconds allotted to replay one chunk.
    #[serde(default = "default_chunk_duration")]
    pub chunk_duration_s: f64,
    /// Pause between chunks in seconds.
    #[serde(default = "default_settle_time")]
    pub settle_time_s: f64,
    /// Arm target stream rate during replay.
    #[serde(default = "default_stream_hz")]
    pub stream_hz: u32,
    /// Per-joint reached tolerance in radians.
    #[serde(default = "default_joint_tolerance")]
    pub joint_tolerance_rad: f64,
    /// Per-axis reached tolerance in meters.
    #[serde(default = "default_cartesian_tolerance")]
    pub cartesian_tolerance_m: f64,
    /// Steps replayed when the auto-rewind monitor fires.
    #[serde(default = "default_auto_rewind_steps")]
    pub auto_rewind_steps: usize,
}

fn default_chunk_size() -> usize {
    8
}
fn default_chunk_duration() -> f64 {
    2.0
}
fn default_settle_time() -> f64 {
    0.5
}
fn default_stream_hz() -> u32 {
    50
}
fn default_joint_tolerance() -> f64 {
    0.01
}
fn default_cartesian_tolerance() -> f64 {
    0.005
}
fn default_auto_rewind_steps() -> usize {
    10
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_duration_s: default_chunk_duration(),
            settle_time_s: default_settle_time(),
            stream_hz: default_stream_hz(),
            joint_tolerance_rad: default_joint_tolerance(),
            cartesian_tolerance_m: default_cartesian_tolerance(),
            auto_rewind_steps: default_auto_rewind_steps(),
        }
    }
}

impl RewindConfig {
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_duration_s.max(0.0))
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_secs_f64(self.settle_time_s.max(0.0))
    }

    pub fn stream_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.stream_hz.max(1)))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
