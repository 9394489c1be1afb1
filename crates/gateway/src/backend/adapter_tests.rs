// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::command::{ArmMove, GripperAction, GripperCommand};
use tokio_util::sync::CancellationToken;

fn sim_backends() -> Backends {
    Backends::simulated(&CancellationToken::new())
}

#[tokio::test]
async fn arm_mode_is_a_precondition_for_moves() {
    let b = sim_backends();
    let m = ArmMove::JointPosition([0.1; 7]);

    // Controller boots in idle; a move without the right mode is refused.
    match b.arm.send(&m) {
        Err(AdapterError::WrongMode(ControlMode::Idle)) => {}
        other => panic!("expected wrong-mode error, got {other:?}"),
    }

    b.arm.set_mode(ControlMode::JointPosition).await.unwrap();
    b.arm.send(&m).unwrap();
    assert_eq!(b.arm.get_state().joints, [0.1; 7]);
}

#[tokio::test]
async fn disconnected_backend_rejects_commands_without_killing_others() {
    let b = sim_backends();
    let sim = b.sim.as_ref().unwrap();

    sim.set_arm_connected(false);
    assert_eq!(b.arm.set_mode(ControlMode::JointPosition).await, Err(AdapterError::NotConnected));
    assert!(!b.arm.is_connected());

    // The base is unaffected.
    b.base.move_to(BasePose { x: 0.2, y: 0.0, theta: 0.0 }).await.unwrap();
    assert_eq!(b.base.get_state().await.unwrap().pose.x, 0.2);

    let status = b.status_map();
    assert!(!status["arm"].connected);
    assert!(status["base"].connected);
}

#[tokio::test]
async fn gripper_verbs_update_state() {
    let b = sim_backends();
    let open = GripperCommand { action: GripperAction::Open, width: None, speed: None, force: None };
    let state = b.gripper.command(&open).await.unwrap();
    assert_eq!(state.width, 0.08);

    let grasp = GripperCommand {
        action: GripperAction::Grasp,
        width: Some(0.03),
        speed: None,
        force: Some(20.0),
    };
    let state = b.gripper.command(&grasp).await.unwrap();
    assert!(state.grasped);
    assert_eq!(state.width, 0.03);
}

#[tokio::test]
async fn safe_stop_holds_arm_and_zeroes_base() {
    let b = sim_backends();
    b.base.set_velocity(0.3, 0.0, 0.1, crate::command::Frame::Local).await.unwrap();
    assert!(b.base.get_state().await.unwrap().moving);

    b.safe_stop().await;
    let base = b.base.get_state().await.unwrap();
    assert_eq!(base.velocity, [0.0; 3]);
    assert!(!base.moving);
}

#[tokio::test]
async fn camera_subscribers_receive_frames() {
    let cancel = CancellationToken::new();
    let b = Backends::simulated(&cancel);
    let mut rx = b.cameras.subscribe();
    let frame = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(frame.starts_with(b"SIMFRAME"));
    cancel.cancel();
}

#[test]
fn command_count_tracks_accepted_commands() {
    let sim = SimRobot::new();
    assert_eq!(sim.command_count(), 0);
    sim.apply_arm(&ArmMove::JointPosition([0.0; 7]));
    sim.apply_base_velocity(0.1, 0.0, 0.0);
    assert_eq!(sim.command_count(), 2);
}
