// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::command::ControlMode;
use clap::Parser;
use std::time::Duration;

fn fast_config() -> GatewayConfig {
    GatewayConfig::parse_from([
        "robogate",
        "--arm-poll-ms",
        "5",
        "--base-poll-ms",
        "5",
        "--gripper-poll-ms",
        "5",
        "--publish-ms",
        "5",
    ])
}

async fn wait_for<F: Fn(&Snapshot) -> bool>(agg: &Aggregator, pred: F) -> Arc<Snapshot> {
    let mut rx = agg.subscribe();
    for _ in 0..200 {
        {
            let snap = rx.borrow();
            if pred(&snap) {
                return Arc::clone(&snap);
            }
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
    panic!("condition not reached; last snapshot: {:?}", agg.latest());
}

#[tokio::test]
async fn snapshot_carries_all_subsystems() {
    let cancel = CancellationToken::new();
    let backends = Backends::simulated(&cancel);
    let agg = spawn_aggregator(backends.clone(), &fast_config(), cancel.clone());

    let snap = wait_for(&agg, |s| s.arm.is_some() && s.base.is_some() && s.gripper.is_some()).await;
    assert!(!snap.arm.as_ref().unwrap().stale);
    assert_eq!(snap.arm.as_ref().unwrap().value.mode, ControlMode::Idle);
    assert!(snap.backends["cameras"].connected);
    cancel.cancel();
}

#[tokio::test]
async fn timestamps_are_monotonic_for_a_subscriber() {
    let cancel = CancellationToken::new();
    let backends = Backends::simulated(&cancel);
    let agg = spawn_aggregator(backends, &fast_config(), cancel.clone());

    let mut rx = agg.subscribe();
    let mut last = 0u64;
    for _ in 0..20 {
        rx.changed().await.unwrap();
        let ts = rx.borrow().ts_ms;
        assert!(ts >= last, "snapshot went backwards: {ts} < {last}");
        last = ts;
    }
    cancel.cancel();
}

#[tokio::test]
async fn disconnected_backend_goes_stale_others_keep_serving() {
    let cancel = CancellationToken::new();
    let backends = Backends::simulated(&cancel);
    let sim = backends.sim.as_ref().unwrap().clone();
    let agg = spawn_aggregator(backends.clone(), &fast_config(), cancel.clone());

    wait_for(&agg, |s| s.base.is_some()).await;
    sim.set_base_connected(false);

    let snap = wait_for(&agg, |s| s.base.as_ref().is_some_and(|b| b.stale)).await;
    // Last known value survives, marked stale.
    assert!(snap.base.as_ref().unwrap().stale);
    assert!(!snap.backends["base"].connected);
    // Arm keeps refreshing unaffected.
    assert!(snap.arm.as_ref().is_some_and(|a| !a.stale));
    cancel.cancel();
}

#[tokio::test]
async fn latest_is_available_without_awaiting() {
    let cancel = CancellationToken::new();
    let backends = Backends::simulated(&cancel);
    let agg = spawn_aggregator(backends, &fast_config(), cancel.clone());

    // Immediately readable (possibly the empty snapshot).
    let first = agg.latest();
    assert!(first.ts_ms == 0 || first.backends.contains_key("arm"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let later = agg.latest();
    assert!(later.ts_ms >= first.ts_ms);
    cancel.cancel();
}
