// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::backend::Backends;
use std::time::Duration;

struct Rig {
    engine: Arc<RewindEngine>,
    recorder: Arc<TrajectoryRecorder>,
    backends: Backends,
    cancel: CancellationToken,
}

fn rig_with(config: RewindConfig) -> Rig {
    let cancel = CancellationToken::new();
    let backends = Backends::simulated(&cancel);
    let recorder = Arc::new(TrajectoryRecorder::new(64));
    let safety = Arc::new(RwLock::new(SafetyConfig::default()));
    let engine = Arc::new(RewindEngine::new(
        Arc::clone(&recorder),
        backends.clone(),
        safety,
        config,
    ));
    Rig { engine, recorder, backends, cancel }
}

fn fast_rig() -> Rig {
    rig_with(RewindConfig {
        chunk_duration_s: 0.02,
        settle_time_s: 0.0,
        chunk_size: 8,
        ..RewindConfig::default()
    })
}

fn joint(v: f64) -> WaypointData {
    WaypointData::ArmJoint([v; 7])
}

fn record_joints(rig: &Rig, values: &[f64]) {
    for v in values {
        rig.recorder.record(joint(*v), WaypointSource::Command);
    }
}

#[tokio::test]
async fn dry_run_visits_reversed_targets_without_adapter_calls() {
    let rig = fast_rig();
    record_joints(&rig, &[0.0, 0.1, 0.2, 0.3]);
    let sim = rig.backends.sim.as_ref().unwrap();
    let before = sim.command_count();

    let outcome = rig.engine.rewind(RewindScope::Steps(3), true).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.state, RewindState::Completed);
    assert_eq!(outcome.steps_rewound, 3);
    assert_eq!(outcome.trace, vec![joint(0.3), joint(0.2), joint(0.1)]);

    // Dry runs issue nothing and record nothing.
    assert_eq!(sim.command_count(), before);
    assert_eq!(rig.recorder.len(), 4);
    rig.cancel.cancel();
}

#[tokio::test]
async fn full_dry_rewind_visits_everything_in_reverse() {
    let rig = fast_rig();
    record_joints(&rig, &[0.0, 0.1, 0.2]);
    let outcome = rig.engine.rewind(RewindScope::Steps(99), true).await.unwrap();
    assert_eq!(outcome.trace, vec![joint(0.2), joint(0.1), joint(0.0)]);
    rig.cancel.cancel();
}

#[tokio::test]
async fn live_rewind_streams_and_records_replayed_waypoints() {
    let rig = fast_rig();
    record_joints(&rig, &[0.0, 0.1, 0.2]);

    let outcome = rig.engine.rewind(RewindScope::Steps(2), false).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.steps_rewound, 2);

    // The arm ended on the oldest replayed target.
    assert_eq!(rig.backends.arm.get_state().joints, [0.1; 7]);
    assert_eq!(rig.backends.arm.mode(), crate::command::ControlMode::JointPosition);

    // Replayed waypoints are recorded with the rewind source.
    let snap = rig.recorder.snapshot();
    assert_eq!(snap.len(), 5);
    assert_eq!(snap[3].source, WaypointSource::Rewind);
    assert_eq!(snap[3].data, joint(0.2));
    assert_eq!(snap[4].data, joint(0.1));
    rig.cancel.cancel();
}

#[tokio::test]
async fn mixed_kinds_split_into_chunks_and_replay() {
    let rig = fast_rig();
    rig.recorder.record(joint(0.1), WaypointSource::Command);
    rig.recorder.record(
        WaypointData::BasePose(crate::command::BasePose { x: 0.2, y: 0.1, theta: 0.0 }),
        WaypointSource::Command,
    );
    rig.recorder.record(WaypointData::GripperWidth(0.04), WaypointSource::Command);

    let outcome = rig.engine.rewind(RewindScope::Steps(3), false).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.steps_rewound, 3);
    assert_eq!(rig.backends.gripper.get_state().await.unwrap().width, 0.04);
    assert_eq!(rig.backends.base.get_state().await.unwrap().pose.x, 0.2);
    rig.cancel.cancel();
}

#[tokio::test]
async fn second_rewind_is_busy_and_issues_nothing() {
    let rig = rig_with(RewindConfig {
        chunk_duration_s: 0.5,
        settle_time_s: 0.1,
        chunk_size: 4,
        ..RewindConfig::default()
    });
    record_joints(&rig, &[0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]);

    let engine = Arc::clone(&rig.engine);
    let first = tokio::spawn(async move { engine.rewind(RewindScope::Steps(8), false).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rig.engine.is_rewinding());

    let sim = rig.backends.sim.as_ref().unwrap();
    let before = sim.command_count();
    let second = rig.engine.rewind(RewindScope::Steps(1), false).await;
    match second {
        Err(e) => assert_eq!(e.code, GatewayError::Busy),
        Ok(_) => panic!("second rewind should be busy"),
    }
    assert_eq!(sim.command_count(), before, "busy rewind must not touch adapters");

    rig.engine.stop();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.state, RewindState::Stopped);
    assert!(!outcome.success);
    rig.cancel.cancel();
}

#[tokio::test]
async fn safety_reject_aborts_with_partial_count() {
    let rig = fast_rig();
    record_joints(&rig, &[0.1, 0.2]);
    // An out-of-workspace Cartesian entry, as if limits were tightened
    // after it was recorded.
    rig.recorder.record(
        WaypointData::ArmCartesian([0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 1.0]),
        WaypointSource::Command,
    );

    let outcome = rig.engine.rewind(RewindScope::Steps(3), false).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.state, RewindState::Aborted);
    assert_eq!(outcome.steps_rewound, 0);
    assert_eq!(outcome.aborted_at, Some(0));
    assert_eq!(outcome.reason.as_deref(), Some("safety:z_out_of_bounds"));
    rig.cancel.cancel();
}

#[tokio::test]
async fn percentage_and_index_scopes_resolve() {
    let rig = fast_rig();
    record_joints(&rig, &[0.0, 0.1, 0.2, 0.3]);

    let outcome = rig.engine.rewind(RewindScope::Percentage(50.0), true).await.unwrap();
    assert_eq!(outcome.steps_rewound, 2);

    let outcome = rig.engine.rewind(RewindScope::ToIndex(1), true).await.unwrap();
    assert_eq!(outcome.trace, vec![joint(0.3), joint(0.2), joint(0.1)]);

    let err = rig.engine.rewind(RewindScope::Percentage(150.0), true).await.unwrap_err();
    assert_eq!(err.code, GatewayError::InvalidArgument);
    let err = rig.engine.rewind(RewindScope::ToIndex(9), true).await.unwrap_err();
    assert_eq!(err.code, GatewayError::InvalidArgument);
    rig.cancel.cancel();
}

#[tokio::test]
async fn to_last_safe_skips_now_unsafe_waypoints() {
    let rig = fast_rig();
    record_joints(&rig, &[0.1]);
    rig.recorder.record(
        WaypointData::ArmCartesian([0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 1.0]),
        WaypointSource::Command,
    );

    let outcome = rig.engine.rewind(RewindScope::ToLastSafe, true).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.trace, vec![joint(0.1)]);
    rig.cancel.cancel();
}

#[tokio::test]
async fn status_tracks_progress_and_last_result() {
    let rig = fast_rig();
    record_joints(&rig, &[0.0, 0.1]);
    assert!(!rig.engine.is_rewinding());

    let outcome = rig.engine.rewind(RewindScope::Steps(2), true).await.unwrap();
    let status = rig.engine.status();
    assert!(!status.is_rewinding);
    assert_eq!(status.steps_total, 2);
    assert_eq!(status.steps_done, 2);
    assert_eq!(status.last_result.unwrap().steps_rewound, outcome.steps_rewound);
    rig.cancel.cancel();
}

#[tokio::test]
async fn rewinding_an_empty_recorder_succeeds_trivially() {
    let rig = fast_rig();
    let outcome = rig.engine.rewind(RewindScope::Steps(5), false).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.steps_rewound, 0);
    assert!(outcome.trace.is_empty());
    rig.cancel.cancel();
}

#[test]
fn smoothstep_is_monotonic_with_clamped_ends() {
    assert_eq!(smoothstep(0.0), 0.0);
    assert_eq!(smoothstep(1.0), 1.0);
    assert_eq!(smoothstep(-1.0), 0.0);
    assert_eq!(smoothstep(2.0), 1.0);
    let mut last = 0.0;
    for k in 0..=100 {
        let s = smoothstep(f64::from(k) / 100.0);
        assert!(s >= last);
        last = s;
    }
}

#[test]
fn partition_splits_on_kind_and_size() {
    let mk = |v: f64| Waypoint { t: v, data: joint(v), source: WaypointSource::Command };
    let base = Waypoint {
        t: 9.0,
        data: WaypointData::BasePose(crate::command::BasePose::default()),
        source: WaypointSource::Command,
    };
    let wps = vec![mk(5.0), mk(4.0), mk(3.0), base, mk(1.0)];

    let chunks = partition(&wps, 2);
    let sizes: Vec<usize> = chunks.iter().map(|c| c.waypoints.len()).collect();
    assert_eq!(sizes, vec![2, 1, 1, 1]);
    assert_eq!(chunks[0].kind, WaypointKind::ArmJoint);
    assert_eq!(chunks[2].kind, WaypointKind::BasePose);
    assert_eq!(chunks[0].t_min, 4.0);
    assert_eq!(chunks[0].t_max, 5.0);
}

#[tokio::test]
async fn auto_monitor_triggers_on_envelope_violation() {
    let rig = fast_rig();
    record_joints(&rig, &[0.0, 0.1]);
    let sim = rig.backends.sim.as_ref().unwrap().clone();

    use clap::Parser;
    let config = crate::config::GatewayConfig::parse_from([
        "robogate",
        "--arm-poll-ms",
        "5",
        "--publish-ms",
        "5",
    ]);
    let aggregator =
        crate::aggregator::spawn_aggregator(rig.backends.clone(), &config, rig.cancel.clone());
    spawn_auto_monitor(Arc::clone(&rig.engine), aggregator, rig.cancel.clone());

    // Drive the reported state out of the joint envelope.
    let mut bad = rig.backends.arm.get_state();
    bad.joints[0] = 9.0;
    sim.set_arm_state(bad);

    // The monitor should fire a rewind that replays the recorded joints,
    // which resets the sim arm onto a recorded (safe) configuration.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let joints = rig.backends.arm.get_state().joints;
        if joints[0] != 9.0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "auto-rewind never fired");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    rig.cancel.cancel();
}
