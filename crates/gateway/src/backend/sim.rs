// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory robot model backing the simulated adapters.
//!
//! Commands apply instantly so tests and `--dry-run` sessions observe
//! deterministic state. Per-subsystem connected flags let tests take one
//! backend down without touching the others.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::command::{ArmMove, BasePose, ControlMode, GripperAction, GripperCommand};

use super::{ArmState, BaseState, GripperState};

#[derive(Debug, Default)]
struct SimArm {
    state: ArmState,
}

#[derive(Debug, Default)]
struct SimBase {
    state: BaseState,
}

#[derive(Debug)]
struct SimGripper {
    state: GripperState,
}

/// Shared simulated robot.
pub struct SimRobot {
    arm: Mutex<SimArm>,
    base: Mutex<SimBase>,
    gripper: Mutex<SimGripper>,
    arm_connected: AtomicBool,
    base_connected: AtomicBool,
    gripper_connected: AtomicBool,
    cameras_connected: AtomicBool,
    /// Total accepted commands, across all subsystems. Tests use this to
    /// assert that a rejected or excluded path issued nothing.
    commands: AtomicU64,
}

impl SimRobot {
    pub fn new() -> Self {
        Self {
            arm: Mutex::new(SimArm::default()),
            base: Mutex::new(SimBase::default()),
            gripper: Mutex::new(SimGripper { state: GripperState::default() }),
            arm_connected: AtomicBool::new(true),
            base_connected: AtomicBool::new(true),
            gripper_connected: AtomicBool::new(true),
            cameras_connected: AtomicBool::new(true),
            commands: AtomicU64::new(0),
        }
    }

    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    // -- Arm ------------------------------------------------------------------

    pub fn arm_connected(&self) -> bool {
        self.arm_connected.load(Ordering::Relaxed)
    }

    pub fn set_arm_connected(&self, up: bool) {
        self.arm_connected.store(up, Ordering::Relaxed);
    }

    pub fn set_arm_mode(&self, mode: ControlMode) {
        self.arm.lock().state.mode = mode;
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn apply_arm(&self, m: &ArmMove) {
        let mut arm = self.arm.lock();
        match m {
            ArmMove::JointPosition(q) => {
                arm.state.joints = *q;
                arm.state.moving = false;
            }
            ArmMove::CartesianPose(p) => {
                arm.state.pose = *p;
                arm.state.moving = false;
            }
            ArmMove::JointVelocity(dq) => {
                arm.state.moving = dq.iter().any(|v| *v != 0.0);
            }
            ArmMove::CartesianVelocity(v) => {
                arm.state.moving = v.iter().any(|c| *c != 0.0);
            }
        }
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hold_arm(&self) {
        self.arm.lock().state.moving = false;
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn arm_state(&self) -> ArmState {
        self.arm.lock().state.clone()
    }

    /// Force a reported arm state (tests drive envelope violations with it).
    pub fn set_arm_state(&self, state: ArmState) {
        self.arm.lock().state = state;
    }

    // -- Base -----------------------------------------------------------------

    pub fn base_connected(&self) -> bool {
        self.base_connected.load(Ordering::Relaxed)
    }

    pub fn set_base_connected(&self, up: bool) {
        self.base_connected.store(up, Ordering::Relaxed);
    }

    pub fn apply_base_pose(&self, pose: BasePose) {
        let mut base = self.base.lock();
        base.state.pose = pose;
        base.state.velocity = [0.0; 3];
        base.state.moving = false;
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn apply_base_velocity(&self, vx: f64, vy: f64, wz: f64) {
        let mut base = self.base.lock();
        base.state.velocity = [vx, vy, wz];
        base.state.moving = vx != 0.0 || vy != 0.0 || wz != 0.0;
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn base_state(&self) -> BaseState {
        self.base.lock().state.clone()
    }

    // -- Gripper --------------------------------------------------------------

    pub fn gripper_connected(&self) -> bool {
        self.gripper_connected.load(Ordering::Relaxed)
    }

    pub fn set_gripper_connected(&self, up: bool) {
        self.gripper_connected.store(up, Ordering::Relaxed);
    }

    pub fn apply_gripper(&self, cmd: &GripperCommand) -> GripperState {
        let mut g = self.gripper.lock();
        match cmd.action {
            GripperAction::Activate | GripperAction::Calibrate => {
                g.state.activated = true;
            }
            GripperAction::Move => {
                if let Some(w) = cmd.width {
                    g.state.width = w;
                }
                g.state.grasped = false;
            }
            GripperAction::Open => {
                g.state.width = 0.08;
                g.state.grasped = false;
            }
            GripperAction::Close => {
                g.state.width = 0.0;
                g.state.grasped = false;
            }
            GripperAction::Grasp => {
                g.state.width = cmd.width.unwrap_or(0.0);
                g.state.grasped = true;
            }
            GripperAction::Stop => {
                g.state.moving = false;
            }
        }
        self.commands.fetch_add(1, Ordering::Relaxed);
        g.state.clone()
    }

    pub fn gripper_state(&self) -> GripperState {
        self.gripper.lock().state.clone()
    }

    // -- Cameras --------------------------------------------------------------

    pub fn cameras_connected(&self) -> bool {
        self.cameras_connected.load(Ordering::Relaxed)
    }

    pub fn set_cameras_connected(&self, up: bool) {
        self.cameras_connected.store(up, Ordering::Relaxed);
    }
}

impl Default for SimRobot {
    fn default() -> Self {
        Self::new()
    }
}
