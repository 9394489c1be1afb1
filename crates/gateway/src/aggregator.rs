// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background pollers and snapshot publisher.
//!
//! One task per backend polls at its own rate into a per-subsystem slot; a
//! publisher composes the latest slots into an immutable snapshot on a
//! `watch` channel. Readers always see either the previous snapshot or the
//! new one, never a partial update, and slow readers conflate for free.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::{ArmState, BackendStatus, Backends, BaseState, GripperState};
use crate::config::GatewayConfig;
use crate::state::epoch_ms;

/// Latest value for one subsystem. `stale` is set while its backend is
/// unreachable; the value is the last known good one.
#[derive(Debug, Clone, Serialize)]
pub struct SubsystemView<T> {
    pub value: T,
    pub stale: bool,
    pub updated_ms: u64,
}

/// Immutable composite of the most recent per-backend states.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub ts_ms: u64,
    pub arm: Option<SubsystemView<ArmState>>,
    pub base: Option<SubsystemView<BaseState>>,
    pub gripper: Option<SubsystemView<GripperState>>,
    pub backends: BTreeMap<String, BackendStatus>,
}

impl Snapshot {
    fn empty() -> Self {
        Self { ts_ms: 0, arm: None, base: None, gripper: None, backends: BTreeMap::new() }
    }
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    stale: bool,
    updated_ms: u64,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self { value: None, stale: false, updated_ms: 0 }
    }
}

impl<T: Clone> Slot<T> {
    fn store(&mut self, value: T) {
        self.value = Some(value);
        self.stale = false;
        self.updated_ms = epoch_ms();
    }

    fn mark_stale(&mut self) {
        self.stale = true;
    }

    fn view(&self) -> Option<SubsystemView<T>> {
        self.value.as_ref().map(|v| SubsystemView {
            value: v.clone(),
            stale: self.stale,
            updated_ms: self.updated_ms,
        })
    }
}

/// Handle to the published snapshot stream.
#[derive(Clone)]
pub struct Aggregator {
    snapshot_rx: watch::Receiver<Arc<Snapshot>>,
}

impl Aggregator {
    /// The most recent snapshot.
    pub fn latest(&self) -> Arc<Snapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// A receiver for awaiting new snapshots. Each subscriber throttles
    /// itself; lagging behind just skips to the latest value.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_rx.clone()
    }
}

/// Spawn the per-backend pollers and the snapshot publisher.
pub fn spawn_aggregator(
    backends: Backends,
    config: &GatewayConfig,
    cancel: CancellationToken,
) -> Aggregator {
    let arm_slot: Arc<Mutex<Slot<ArmState>>> = Arc::new(Mutex::new(Slot::default()));
    let base_slot: Arc<Mutex<Slot<BaseState>>> = Arc::new(Mutex::new(Slot::default()));
    let gripper_slot: Arc<Mutex<Slot<GripperState>>> = Arc::new(Mutex::new(Slot::default()));

    // Arm poller: reads the adapter's cached stream state.
    {
        let backends = backends.clone();
        let slot = Arc::clone(&arm_slot);
        let interval = config.arm_poll_interval();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                let mut slot = slot.lock();
                if backends.arm.is_connected() {
                    slot.store(backends.arm.get_state());
                } else {
                    slot.mark_stale();
                }
            }
        });
    }

    // Base poller.
    {
        let backends = backends.clone();
        let slot = Arc::clone(&base_slot);
        let interval = config.base_poll_interval();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                match backends.base.get_state().await {
                    Ok(state) => slot.lock().store(state),
                    Err(e) => {
                        tracing::debug!(err = %e, "base poll failed");
                        slot.lock().mark_stale();
                    }
                }
            }
        });
    }

    // Gripper poller.
    {
        let backends = backends.clone();
        let slot = Arc::clone(&gripper_slot);
        let interval = config.gripper_poll_interval();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                match backends.gripper.get_state().await {
                    Ok(state) => slot.lock().store(state),
                    Err(e) => {
                        tracing::debug!(err = %e, "gripper poll failed");
                        slot.lock().mark_stale();
                    }
                }
            }
        });
    }

    // Publisher: compose slots into an immutable snapshot.
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Snapshot::empty()));
    {
        let interval = config.publish_interval();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last_ts = 0u64;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }
                // Wall clock can step backwards; published timestamps don't.
                let ts_ms = epoch_ms().max(last_ts);
                last_ts = ts_ms;
                let snapshot = Snapshot {
                    ts_ms,
                    arm: arm_slot.lock().view(),
                    base: base_slot.lock().view(),
                    gripper: gripper_slot.lock().view(),
                    backends: backends.status_map(),
                };
                snapshot_tx.send_replace(Arc::new(snapshot));
            }
        });
    }

    Aggregator { snapshot_rx }
}

#[cfg(test)]
#[path = "aggregator_tests.rs"]
mod tests;
