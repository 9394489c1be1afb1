// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Safety envelope: pure validation of commands against workspace, velocity,
//! and force bounds.
//!
//! Position targets outside the envelope are rejected, never moved.
//! Velocities and gripper forces are clamped.

use serde::{Deserialize, Serialize};

use crate::command::{ArmMove, BaseMove, Command, GripperAction, GripperCommand};

/// Workspace, velocity, and force bounds enforced on every command.
///
/// Defaults model a 7-DoF Franka-class arm on a holonomic base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub joint_min: [f64; 7],
    pub joint_max: [f64; 7],
    /// Cartesian workspace box, `[x_min, y_min, z_min]`.
    pub workspace_min: [f64; 3],
    /// Cartesian workspace box, `[x_max, y_max, z_max]`.
    pub workspace_max: [f64; 3],
    pub max_joint_vel_rad_s: f64,
    pub max_linear_vel_m_s: f64,
    pub max_angular_vel_rad_s: f64,
    pub max_base_linear_vel_m_s: f64,
    pub max_base_angular_vel_rad_s: f64,
    pub max_gripper_width_m: f64,
    pub max_gripper_force_n: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            joint_min: [-2.8973, -1.7628, -2.8973, -3.0718, -2.8973, -0.0175, -2.8973],
            joint_max: [2.8973, 1.7628, 2.8973, -0.0698, 2.8973, 3.7525, 2.8973],
            workspace_min: [-0.8, -0.8, 0.0],
            workspace_max: [0.8, 0.8, 1.2],
            max_joint_vel_rad_s: 2.0,
            max_linear_vel_m_s: 0.5,
            max_angular_vel_rad_s: 1.5,
            max_base_linear_vel_m_s: 0.5,
            max_base_angular_vel_rad_s: 1.0,
            max_gripper_width_m: 0.08,
            max_gripper_force_n: 70.0,
        }
    }
}

/// Outcome of envelope validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Command is within bounds; issue as-is.
    Ok,
    /// Command was adjusted (velocity or force cap); issue the replacement.
    Clamped(Command),
    /// Command violates a position bound; do not issue.
    Reject(String),
}

/// Validate a command against the envelope.
pub fn validate(cmd: &Command, cfg: &SafetyConfig) -> Verdict {
    match cmd {
        Command::Arm(m) => validate_arm(m, cfg),
        Command::Base(m) => validate_base(m, cfg),
        Command::Gripper(g) => validate_gripper(g, cfg),
    }
}

fn validate_arm(m: &ArmMove, cfg: &SafetyConfig) -> Verdict {
    match m {
        ArmMove::JointPosition(q) => match check_joints(q, cfg) {
            Some(reason) => Verdict::Reject(reason),
            None => Verdict::Ok,
        },
        ArmMove::CartesianPose(p) => match check_workspace(p[0], p[1], p[2], cfg) {
            Some(reason) => Verdict::Reject(reason),
            None => Verdict::Ok,
        },
        ArmMove::JointVelocity(dq) => {
            let cap = cfg.max_joint_vel_rad_s;
            if dq.iter().all(|v| v.abs() <= cap) {
                return Verdict::Ok;
            }
            let mut clamped = *dq;
            for v in &mut clamped {
                *v = v.clamp(-cap, cap);
            }
            Verdict::Clamped(Command::Arm(ArmMove::JointVelocity(clamped)))
        }
        ArmMove::CartesianVelocity(v) => {
            let linear = norm3(v[0], v[1], v[2]);
            let angular = norm3(v[3], v[4], v[5]);
            let ls = scale_factor(linear, cfg.max_linear_vel_m_s);
            let as_ = scale_factor(angular, cfg.max_angular_vel_rad_s);
            if ls >= 1.0 && as_ >= 1.0 {
                return Verdict::Ok;
            }
            let mut clamped = *v;
            for c in &mut clamped[..3] {
                *c *= ls.min(1.0);
            }
            for c in &mut clamped[3..] {
                *c *= as_.min(1.0);
            }
            Verdict::Clamped(Command::Arm(ArmMove::CartesianVelocity(clamped)))
        }
    }
}

fn validate_base(m: &BaseMove, cfg: &SafetyConfig) -> Verdict {
    match m {
        BaseMove::Pose(p) => match check_workspace_xy(p.x, p.y, cfg) {
            Some(reason) => Verdict::Reject(reason),
            None => Verdict::Ok,
        },
        BaseMove::Velocity { vx, vy, wz, frame } => {
            let linear = norm3(*vx, *vy, 0.0);
            let ls = scale_factor(linear, cfg.max_base_linear_vel_m_s);
            let cap = cfg.max_base_angular_vel_rad_s;
            if ls >= 1.0 && wz.abs() <= cap {
                return Verdict::Ok;
            }
            Verdict::Clamped(Command::Base(BaseMove::Velocity {
                vx: vx * ls.min(1.0),
                vy: vy * ls.min(1.0),
                wz: wz.clamp(-cap, cap),
                frame: *frame,
            }))
        }
    }
}

fn validate_gripper(g: &GripperCommand, cfg: &SafetyConfig) -> Verdict {
    if matches!(g.action, GripperAction::Move | GripperAction::Grasp) {
        if let Some(w) = g.width {
            if !(0.0..=cfg.max_gripper_width_m).contains(&w) {
                return Verdict::Reject("safety:gripper_width_out_of_bounds".to_owned());
            }
        }
    }
    match g.force {
        Some(f) if f > cfg.max_gripper_force_n => {
            let mut clamped = g.clone();
            clamped.force = Some(cfg.max_gripper_force_n);
            Verdict::Clamped(Command::Gripper(clamped))
        }
        Some(f) if f < 0.0 => Verdict::Reject("safety:gripper_force_negative".to_owned()),
        _ => Verdict::Ok,
    }
}

/// Check a reported joint configuration against limits. Used by the
/// auto-rewind monitor on live state.
pub fn check_joints(q: &[f64; 7], cfg: &SafetyConfig) -> Option<String> {
    for (i, v) in q.iter().enumerate() {
        if *v < cfg.joint_min[i] || *v > cfg.joint_max[i] {
            return Some(format!("safety:joint_{i}_out_of_bounds"));
        }
    }
    None
}

/// Check a Cartesian point against the workspace box.
pub fn check_workspace(x: f64, y: f64, z: f64, cfg: &SafetyConfig) -> Option<String> {
    let axes = [("x", x), ("y", y), ("z", z)];
    for (i, (name, v)) in axes.iter().enumerate() {
        if *v < cfg.workspace_min[i] || *v > cfg.workspace_max[i] {
            return Some(format!("safety:{name}_out_of_bounds"));
        }
    }
    None
}

fn check_workspace_xy(x: f64, y: f64, cfg: &SafetyConfig) -> Option<String> {
    if x < cfg.workspace_min[0] || x > cfg.workspace_max[0] {
        return Some("safety:x_out_of_bounds".to_owned());
    }
    if y < cfg.workspace_min[1] || y > cfg.workspace_max[1] {
        return Some("safety:y_out_of_bounds".to_owned());
    }
    None
}

fn norm3(a: f64, b: f64, c: f64) -> f64 {
    (a * a + b * b + c * c).sqrt()
}

/// Multiplier that brings `magnitude` under `cap` (>= 1.0 means no scaling).
fn scale_factor(magnitude: f64, cap: f64) -> f64 {
    if magnitude <= cap || magnitude == 0.0 {
        f64::INFINITY
    } else {
        cap / magnitude
    }
}

#[cfg(test)]
#[path = "safety_tests.rs"]
mod tests;
