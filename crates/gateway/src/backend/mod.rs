// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed clients for the backend servers (arm, base, gripper, cameras).
//!
//! Each adapter owns its connection and serializes concurrent commands
//! FIFO. A command sent while the backend is unreachable fails with
//! [`AdapterError::NotConnected`]; that is never fatal to the gateway.

pub mod arm;
pub mod base;
pub mod camera;
pub mod gripper;
pub mod sim;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::command::{BasePose, ControlMode};
use crate::config::GatewayConfig;
use crate::state::epoch_ms;

pub use arm::ArmAdapter;
pub use base::BaseAdapter;
pub use camera::CameraAdapter;
pub use gripper::GripperAdapter;
pub use sim::SimRobot;

/// Adapter-level failures, translated to API errors at the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// The backend link is down.
    NotConnected,
    /// The round trip exceeded its deadline.
    Timeout,
    /// The controller is in the wrong mode for this command.
    WrongMode(ControlMode),
    /// The backend answered with something unusable.
    Protocol(String),
    /// Transport-level failure.
    Io(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => f.write_str("backend not connected"),
            Self::Timeout => f.write_str("backend request timed out"),
            Self::WrongMode(m) => write!(f, "controller is in mode {m}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::NotConnected
        } else {
            Self::Io(e.to_string())
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Connection health shared by all adapters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ok_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Mutable health tracker behind each adapter.
#[derive(Debug, Default)]
pub struct LinkHealth {
    inner: Mutex<BackendStatus>,
}

impl LinkHealth {
    pub fn mark_ok(&self) {
        let mut s = self.inner.lock();
        s.connected = true;
        s.last_ok_ms = Some(epoch_ms());
        s.last_error = None;
    }

    pub fn mark_err(&self, err: &AdapterError) {
        let mut s = self.inner.lock();
        s.connected = false;
        s.last_error = Some(err.to_string());
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    pub fn status(&self) -> BackendStatus {
        self.inner.lock().clone()
    }
}

/// Reported arm state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmState {
    pub joints: [f64; 7],
    /// End-effector pose `[x, y, z, qx, qy, qz, qw]`.
    pub pose: [f64; 7],
    pub mode: ControlMode,
    pub moving: bool,
}

impl Default for ArmState {
    fn default() -> Self {
        Self {
            joints: [0.0; 7],
            pose: [0.3, 0.0, 0.5, 0.0, 0.0, 0.0, 1.0],
            mode: ControlMode::Idle,
            moving: false,
        }
    }
}

/// Reported base state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BaseState {
    pub pose: BasePose,
    /// `[vx, vy, wz]` in the local frame.
    pub velocity: [f64; 3],
    pub moving: bool,
}

/// Reported gripper state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GripperState {
    pub width: f64,
    pub activated: bool,
    pub grasped: bool,
    pub moving: bool,
}

impl Default for GripperState {
    fn default() -> Self {
        Self { width: 0.08, activated: false, grasped: false, moving: false }
    }
}

/// All four adapters, cheaply cloneable.
#[derive(Clone)]
pub struct Backends {
    pub arm: Arc<ArmAdapter>,
    pub base: Arc<BaseAdapter>,
    pub gripper: Arc<GripperAdapter>,
    pub cameras: Arc<CameraAdapter>,
    /// Present when running against the simulated robot (`--dry-run`, tests).
    pub sim: Option<Arc<SimRobot>>,
}

impl Backends {
    /// Build simulated adapters around one shared robot model.
    pub fn simulated(cancel: &CancellationToken) -> Self {
        let sim = Arc::new(SimRobot::new());
        Self {
            arm: Arc::new(ArmAdapter::simulated(Arc::clone(&sim))),
            base: Arc::new(BaseAdapter::simulated(Arc::clone(&sim))),
            gripper: Arc::new(GripperAdapter::simulated(Arc::clone(&sim))),
            cameras: Arc::new(CameraAdapter::simulated(Arc::clone(&sim), cancel.clone())),
            sim: Some(sim),
        }
    }

    /// Connect real adapters. Backends that are down connect lazily; the
    /// arm link keeps retrying in the background.
    pub fn connect(cfg: &GatewayConfig, cancel: &CancellationToken) -> Self {
        Self {
            arm: Arc::new(ArmAdapter::connect(
                cfg.arm_addr.clone(),
                cfg.arm_stream_hz,
                cancel.clone(),
            )),
            base: Arc::new(BaseAdapter::connect(cfg.base_url.clone())),
            gripper: Arc::new(GripperAdapter::connect(cfg.gripper_url.clone())),
            cameras: Arc::new(CameraAdapter::connect(cfg.camera_url.clone(), cancel.clone())),
            sim: None,
        }
    }

    /// Connection status for `/health` and the snapshot.
    pub fn status_map(&self) -> BTreeMap<String, BackendStatus> {
        BTreeMap::from([
            ("arm".to_owned(), self.arm.status()),
            ("base".to_owned(), self.base.status()),
            ("gripper".to_owned(), self.gripper.status()),
            ("cameras".to_owned(), self.cameras.status()),
        ])
    }

    /// Best-effort safety floor: arm holds at current, base stops.
    pub async fn safe_stop(&self) {
        if let Err(e) = self.arm.stop() {
            tracing::debug!(err = %e, "arm hold on safety floor failed");
        }
        if let Err(e) = self.base.stop().await {
            tracing::debug!(err = %e, "base stop on safety floor failed");
        }
    }
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
