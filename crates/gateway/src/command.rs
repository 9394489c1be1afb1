// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-format command types shared by the HTTP surface, the safety
//! envelope, and the backend adapters.
//!
//! Command bodies carry a `mode` discriminator with mode-dependent shapes;
//! unknown modes fail deserialization at the boundary.

use serde::{Deserialize, Serialize};

/// Arm controller mode. Setting the mode is a precondition for any move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    #[default]
    Idle,
    JointPosition,
    CartesianPose,
    JointVelocity,
    CartesianVelocity,
}

impl ControlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::JointPosition => "joint_position",
            Self::CartesianPose => "cartesian_pose",
            Self::JointVelocity => "joint_velocity",
            Self::CartesianVelocity => "cartesian_velocity",
        }
    }
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An arm move request: `{"mode": "...", "values": [...]}`.
///
/// Cartesian poses are `[x, y, z, qx, qy, qz, qw]`; Cartesian velocities are
/// `[vx, vy, vz, wx, wy, wz]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "values", rename_all = "snake_case")]
pub enum ArmMove {
    JointPosition([f64; 7]),
    CartesianPose([f64; 7]),
    JointVelocity([f64; 7]),
    CartesianVelocity([f64; 6]),
}

impl ArmMove {
    /// The control mode this move requires on the controller.
    pub fn mode(&self) -> ControlMode {
        match self {
            Self::JointPosition(_) => ControlMode::JointPosition,
            Self::CartesianPose(_) => ControlMode::CartesianPose,
            Self::JointVelocity(_) => ControlMode::JointVelocity,
            Self::CartesianVelocity(_) => ControlMode::CartesianVelocity,
        }
    }

    /// True for position-type targets (recorded as waypoints).
    pub fn is_position(&self) -> bool {
        matches!(self, Self::JointPosition(_) | Self::CartesianPose(_))
    }
}

/// A planar base pose in the odometry frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BasePose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// Reference frame for base velocity commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    #[default]
    Local,
    Global,
}

/// A base move request: either an absolute pose or a velocity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BaseMove {
    Pose(BasePose),
    Velocity {
        vx: f64,
        vy: f64,
        wz: f64,
        #[serde(default)]
        frame: Frame,
    },
}

/// Gripper verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GripperAction {
    Activate,
    Calibrate,
    Move,
    Open,
    Close,
    Grasp,
    Stop,
}

/// A gripper command. `width`/`speed`/`force` apply to the verbs that use
/// them; extras are ignored by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GripperCommand {
    pub action: GripperAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<f64>,
}

/// Any mutating command, for envelope validation and feedback events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Command {
    Arm(ArmMove),
    Base(BaseMove),
    Gripper(GripperCommand),
}

impl Command {
    /// Short label for logs and feedback events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Arm(m) => match m {
                ArmMove::JointPosition(_) => "arm/joint_position",
                ArmMove::CartesianPose(_) => "arm/cartesian_pose",
                ArmMove::JointVelocity(_) => "arm/joint_velocity",
                ArmMove::CartesianVelocity(_) => "arm/cartesian_velocity",
            },
            Self::Base(BaseMove::Pose(_)) => "base/pose",
            Self::Base(BaseMove::Velocity { .. }) => "base/velocity",
            Self::Gripper(_) => "gripper",
        }
    }
}
