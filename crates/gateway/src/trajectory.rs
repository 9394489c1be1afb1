// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only ring of executed waypoints, the source material for rewind.
//!
//! Bounded to a fixed capacity with oldest-first eviction. Time stamps come
//! from a monotonic clock owned by the recorder and never decrease.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::command::BasePose;

/// Who caused a waypoint to be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointSource {
    Command,
    Rewind,
    Script,
}

/// A recorded command target. Payload shape is fixed per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum WaypointData {
    ArmJoint([f64; 7]),
    ArmCartesian([f64; 7]),
    BasePose(BasePose),
    GripperWidth(f64),
}

/// Discriminant of [`WaypointData`], used for chunk partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaypointKind {
    ArmJoint,
    ArmCartesian,
    BasePose,
    GripperWidth,
}

impl WaypointData {
    pub fn kind(&self) -> WaypointKind {
        match self {
            Self::ArmJoint(_) => WaypointKind::ArmJoint,
            Self::ArmCartesian(_) => WaypointKind::ArmCartesian,
            Self::BasePose(_) => WaypointKind::BasePose,
            Self::GripperWidth(_) => WaypointKind::GripperWidth,
        }
    }
}

/// One executed command target with its monotonic timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Seconds since the recorder was created (monotonic).
    pub t: f64,
    #[serde(flatten)]
    pub data: WaypointData,
    pub source: WaypointSource,
}

struct RecorderInner {
    entries: VecDeque<Waypoint>,
    last_t: f64,
}

/// Bounded recorder of executed waypoints.
pub struct TrajectoryRecorder {
    inner: Mutex<RecorderInner>,
    capacity: usize,
    epoch: Instant,
}

impl TrajectoryRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RecorderInner { entries: VecDeque::new(), last_t: 0.0 }),
            capacity: capacity.max(1),
            epoch: Instant::now(),
        }
    }

    /// Append a waypoint, stamped now. Called only after the backend
    /// accepted the command.
    pub fn record(&self, data: WaypointData, source: WaypointSource) -> Waypoint {
        let mut t = self.epoch.elapsed().as_secs_f64();
        let mut inner = self.inner.lock();
        // Clamp a lagging clock read so time never decreases.
        if t < inner.last_t {
            t = inner.last_t;
        }
        inner.last_t = t;
        let wp = Waypoint { t, data, source };
        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(wp.clone());
        wp
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Copy of the full trajectory, oldest first.
    pub fn snapshot(&self) -> Vec<Waypoint> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Copy of entries in `[from, to)` by index, clipped to bounds.
    pub fn slice(&self, from: usize, to: usize) -> Vec<Waypoint> {
        let inner = self.inner.lock();
        let to = to.min(inner.entries.len());
        if from >= to {
            return Vec::new();
        }
        inner.entries.range(from..to).cloned().collect()
    }

    /// The last `n` waypoints, newest first.
    pub fn reverse_slice(&self, n: usize) -> Vec<Waypoint> {
        let inner = self.inner.lock();
        inner.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn last(&self) -> Option<Waypoint> {
        self.inner.lock().entries.back().cloned()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

#[cfg(test)]
#[path = "trajectory_tests.rs"]
mod tests;
