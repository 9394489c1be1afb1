// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::command::Frame;
use yare::parameterized;

fn cfg() -> SafetyConfig {
    SafetyConfig::default()
}

fn pose(x: f64, y: f64, z: f64) -> Command {
    Command::Arm(ArmMove::CartesianPose([x, y, z, 0.0, 0.0, 0.0, 1.0]))
}

#[parameterized(
    x_high = { 5.0, 0.0, 0.5, "safety:x_out_of_bounds" },
    y_low = { 0.0, -5.0, 0.5, "safety:y_out_of_bounds" },
    z_high = { 0.0, 0.0, 5.0, "safety:z_out_of_bounds" },
    z_low = { 0.0, 0.0, -0.1, "safety:z_out_of_bounds" },
)]
fn cartesian_pose_out_of_box_is_rejected(x: f64, y: f64, z: f64, reason: &str) {
    match validate(&pose(x, y, z), &cfg()) {
        Verdict::Reject(r) => assert_eq!(r, reason),
        other => panic!("expected reject, got {other:?}"),
    }
}

#[test]
fn cartesian_pose_inside_box_is_ok() {
    assert_eq!(validate(&pose(0.3, 0.2, 0.5), &cfg()), Verdict::Ok);
}

#[test]
fn joint_position_outside_limits_is_rejected() {
    let mut q = [0.0; 7];
    q[3] = -1.5; // joint 3 range is [-3.0718, -0.0698]
    assert_eq!(validate(&Command::Arm(ArmMove::JointPosition(q)), &cfg()), Verdict::Ok);

    q[3] = 1.0;
    match validate(&Command::Arm(ArmMove::JointPosition(q)), &cfg()) {
        Verdict::Reject(r) => assert_eq!(r, "safety:joint_3_out_of_bounds"),
        other => panic!("expected reject, got {other:?}"),
    }
}

#[test]
fn joint_velocity_is_clamped_not_rejected() {
    let dq = [5.0, 0.0, 0.0, 0.0, 0.0, 0.0, -5.0];
    match validate(&Command::Arm(ArmMove::JointVelocity(dq)), &cfg()) {
        Verdict::Clamped(Command::Arm(ArmMove::JointVelocity(c))) => {
            assert_eq!(c[0], 2.0);
            assert_eq!(c[6], -2.0);
            assert_eq!(c[1], 0.0);
        }
        other => panic!("expected clamp, got {other:?}"),
    }
}

#[test]
fn cartesian_velocity_scales_linear_and_angular_independently() {
    let v = [1.0, 0.0, 0.0, 0.0, 0.0, 0.5];
    match validate(&Command::Arm(ArmMove::CartesianVelocity(v)), &cfg()) {
        Verdict::Clamped(Command::Arm(ArmMove::CartesianVelocity(c))) => {
            assert!((c[0] - 0.5).abs() < 1e-9, "linear clamped to cap");
            assert!((c[5] - 0.5).abs() < 1e-9, "angular under cap untouched");
        }
        other => panic!("expected clamp, got {other:?}"),
    }
}

#[test]
fn base_pose_outside_box_is_rejected() {
    let m = Command::Base(BaseMove::Pose(crate::command::BasePose { x: 3.0, y: 0.0, theta: 0.0 }));
    match validate(&m, &cfg()) {
        Verdict::Reject(r) => assert_eq!(r, "safety:x_out_of_bounds"),
        other => panic!("expected reject, got {other:?}"),
    }
}

#[test]
fn base_velocity_is_clamped() {
    let m = Command::Base(BaseMove::Velocity { vx: 3.0, vy: 4.0, wz: 2.0, frame: Frame::Local });
    match validate(&m, &cfg()) {
        Verdict::Clamped(Command::Base(BaseMove::Velocity { vx, vy, wz, .. })) => {
            let norm = (vx * vx + vy * vy).sqrt();
            assert!((norm - 0.5).abs() < 1e-9);
            assert_eq!(wz, 1.0);
        }
        other => panic!("expected clamp, got {other:?}"),
    }
}

#[test]
fn gripper_force_is_clamped_width_is_rejected() {
    let g = GripperCommand {
        action: GripperAction::Grasp,
        width: Some(0.02),
        speed: None,
        force: Some(500.0),
    };
    match validate(&Command::Gripper(g), &cfg()) {
        Verdict::Clamped(Command::Gripper(c)) => assert_eq!(c.force, Some(70.0)),
        other => panic!("expected clamp, got {other:?}"),
    }

    let g = GripperCommand {
        action: GripperAction::Move,
        width: Some(0.5),
        speed: None,
        force: None,
    };
    match validate(&Command::Gripper(g), &cfg()) {
        Verdict::Reject(r) => assert_eq!(r, "safety:gripper_width_out_of_bounds"),
        other => panic!("expected reject, got {other:?}"),
    }
}

#[test]
fn live_joint_check_reports_first_violation() {
    let mut q = [0.0; 7];
    q[3] = -1.0;
    assert_eq!(check_joints(&q, &cfg()), None);
    q[0] = 9.0;
    assert_eq!(check_joints(&q, &cfg()), Some("safety:joint_0_out_of_bounds".to_owned()));
}
