// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reverse-replay of recorded waypoints through the backend adapters.
//!
//! The reversed waypoint list is partitioned into same-kind chunks. Arm
//! chunks stream interpolated targets at the configured rate; base chunks
//! are absolute pose targets with a settle wait; gripper widths replay as
//! discrete targets. Adjacent arm and base chunks whose source times
//! overlap run concurrently and both must finish before the replay
//! advances. Every target passes the safety envelope first.
//!
//! Only one rewind runs per process; a second start fails with `busy`
//! before touching any adapter.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::aggregator::Aggregator;
use crate::backend::Backends;
use crate::command::{ArmMove, BaseMove, Command, GripperAction, GripperCommand};
use crate::config::RewindConfig;
use crate::error::{ApiError, GatewayError};
use crate::safety::{self, SafetyConfig, Verdict};
use crate::trajectory::{
    TrajectoryRecorder, Waypoint, WaypointData, WaypointKind, WaypointSource,
};

/// How far back to replay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RewindScope {
    /// The last `n` waypoints.
    Steps(usize),
    /// A percentage of the recorded trajectory, `0.0..=100.0`.
    Percentage(f64),
    /// Back to (and including) the waypoint at this index.
    ToIndex(usize),
    /// Back to the most recent waypoint that passes the current envelope.
    ToLastSafe,
}

/// Terminal state of one rewind run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewindState {
    Completed,
    Aborted,
    Stopped,
}

/// Result of a rewind run.
#[derive(Debug, Clone, Serialize)]
pub struct RewindOutcome {
    pub success: bool,
    pub state: RewindState,
    pub steps_rewound: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub dry_run: bool,
    /// Targets visited (or validated, in a dry run), in replay order.
    pub trace: Vec<WaypointData>,
}

/// Live status for `GET /rewind/status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RewindStatus {
    pub is_rewinding: bool,
    pub steps_total: usize,
    pub steps_done: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<RewindOutcome>,
}

/// One contiguous same-kind run of reversed waypoints.
#[derive(Debug)]
struct Chunk {
    kind: WaypointKind,
    waypoints: Vec<Waypoint>,
    t_min: f64,
    t_max: f64,
}

impl Chunk {
    fn overlaps(&self, other: &Chunk) -> bool {
        self.t_min <= other.t_max && other.t_min <= self.t_max
    }

    fn is_arm(&self) -> bool {
        matches!(self.kind, WaypointKind::ArmJoint | WaypointKind::ArmCartesian)
    }
}

/// How a run ended mid-flight.
enum Interrupt {
    Cancelled,
    Rejected { reason: String },
}

/// Progress through a chunk: waypoints executed plus targets traced.
type Progress = (usize, Vec<WaypointData>);
/// A chunk ended early: partial progress plus the cause.
type Halted = (usize, Vec<WaypointData>, Interrupt);

/// The reverse-replay engine.
pub struct RewindEngine {
    recorder: Arc<TrajectoryRecorder>,
    backends: Backends,
    safety: Arc<RwLock<SafetyConfig>>,
    config: RwLock<RewindConfig>,
    /// Process-wide exclusion: `try_lock` failure means `busy`.
    active: tokio::sync::Mutex<()>,
    current_cancel: Mutex<Option<CancellationToken>>,
    status: Mutex<RewindStatus>,
}

impl RewindEngine {
    pub fn new(
        recorder: Arc<TrajectoryRecorder>,
        backends: Backends,
        safety: Arc<RwLock<SafetyConfig>>,
        config: RewindConfig,
    ) -> Self {
        Self {
            recorder,
            backends,
            safety,
            config: RwLock::new(config),
            active: tokio::sync::Mutex::new(()),
            current_cancel: Mutex::new(None),
            status: Mutex::new(RewindStatus::default()),
        }
    }

    pub fn config(&self) -> RewindConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: RewindConfig) {
        *self.config.write() = config;
    }

    pub fn status(&self) -> RewindStatus {
        self.status.lock().clone()
    }

    pub fn is_rewinding(&self) -> bool {
        self.status.lock().is_rewinding
    }

    /// Cancel the active rewind, if any.
    pub fn stop(&self) -> bool {
        match self.current_cancel.lock().as_ref() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Run a rewind. Fails fast with `busy` if one is already active.
    pub async fn rewind(&self, scope: RewindScope, dry_run: bool) -> Result<RewindOutcome, ApiError> {
        let guard = match self.active.try_lock() {
            Ok(g) => g,
            Err(_) => {
                return Err(ApiError::new(GatewayError::Busy, "a rewind is already active"));
            }
        };

        let waypoints = self.resolve(scope)?;
        let config = self.config.read().clone();
        let cancel = CancellationToken::new();
        *self.current_cancel.lock() = Some(cancel.clone());
        {
            let mut status = self.status.lock();
            status.is_rewinding = true;
            status.steps_total = waypoints.len();
            status.steps_done = 0;
        }
        tracing::info!(steps = waypoints.len(), dry_run, "rewind started");

        let outcome = self.run(&waypoints, &config, dry_run, &cancel).await;

        {
            let mut status = self.status.lock();
            status.is_rewinding = false;
            status.last_result = Some(outcome.clone());
        }
        *self.current_cancel.lock() = None;
        drop(guard);
        tracing::info!(
            state = ?outcome.state,
            steps = outcome.steps_rewound,
            "rewind finished"
        );
        Ok(outcome)
    }

    /// Resolve a scope into the reversed waypoint list.
    fn resolve(&self, scope: RewindScope) -> Result<Vec<Waypoint>, ApiError> {
        match scope {
            RewindScope::Steps(n) => Ok(self.recorder.reverse_slice(n)),
            RewindScope::Percentage(p) => {
                if !(0.0..=100.0).contains(&p) {
                    return Err(ApiError::new(
                        GatewayError::InvalidArgument,
                        "percentage must be within 0..=100",
                    ));
                }
                let len = self.recorder.len();
                let n = ((len as f64) * p / 100.0).round() as usize;
                Ok(self.recorder.reverse_slice(n))
            }
            RewindScope::ToIndex(i) => {
                let len = self.recorder.len();
                if i >= len {
                    return Err(ApiError::new(
                        GatewayError::InvalidArgument,
                        format!("index {i} out of range (len {len})"),
                    ));
                }
                Ok(self.recorder.reverse_slice(len - i))
            }
            RewindScope::ToLastSafe => {
                // Drive straight back to the most recent waypoint that still
                // passes the envelope; newer waypoints that no longer pass
                // are skipped rather than replayed into an abort.
                let reversed = self.recorder.reverse_slice(self.recorder.len());
                let safety = self.safety.read().clone();
                let safe = reversed.into_iter().find(|wp| {
                    matches!(safety::validate(&to_command(&wp.data), &safety), Verdict::Ok)
                });
                match safe {
                    Some(wp) => Ok(vec![wp]),
                    None => Err(ApiError::new(
                        GatewayError::InvalidArgument,
                        "no recorded waypoint passes the current envelope",
                    )),
                }
            }
        }
    }

    async fn run(
        &self,
        waypoints: &[Waypoint],
        config: &RewindConfig,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> RewindOutcome {
        let chunks = partition(waypoints, config.chunk_size);
        let mut trace: Vec<WaypointData> = Vec::with_capacity(waypoints.len());
        let mut done = 0usize;
        let mut interrupt: Option<Interrupt> = None;

        let mut i = 0;
        while i < chunks.len() {
            if cancel.is_cancelled() {
                interrupt = Some(Interrupt::Cancelled);
                break;
            }

            // Arm and base motion recorded over the same interval replays
            // concurrently; both legs must finish before advancing.
            let paired = chunks
                .get(i + 1)
                .filter(|next| {
                    (chunks[i].is_arm() && next.kind == WaypointKind::BasePose
                        || chunks[i].kind == WaypointKind::BasePose && next.is_arm())
                        && chunks[i].overlaps(next)
                })
                .is_some();

            let result = if paired {
                let (a, b) = (&chunks[i], &chunks[i + 1]);
                let (ra, rb) = tokio::join!(
                    self.execute_chunk(a, config, dry_run, cancel),
                    self.execute_chunk(b, config, dry_run, cancel),
                );
                merge_pair(ra, rb)
            } else {
                self.execute_chunk(&chunks[i], config, dry_run, cancel).await
            };
            i += if paired { 2 } else { 1 };

            match result {
                Ok((count, mut chunk_trace)) => {
                    done += count;
                    trace.append(&mut chunk_trace);
                    self.status.lock().steps_done = done;
                }
                Err((count, mut chunk_trace, cause)) => {
                    done += count;
                    trace.append(&mut chunk_trace);
                    self.status.lock().steps_done = done;
                    interrupt = Some(cause);
                    break;
                }
            }

            if i < chunks.len() {
                tokio::time::sleep(config.settle_time()).await;
            }
        }

        match interrupt {
            None => RewindOutcome {
                success: true,
                state: RewindState::Completed,
                steps_rewound: done,
                aborted_at: None,
                reason: None,
                dry_run,
                trace,
            },
            Some(Interrupt::Cancelled) => {
                if !dry_run {
                    self.backends.safe_stop().await;
                }
                RewindOutcome {
                    success: false,
                    state: RewindState::Stopped,
                    steps_rewound: done,
                    aborted_at: None,
                    reason: Some("stopped".to_owned()),
                    dry_run,
                    trace,
                }
            }
            Some(Interrupt::Rejected { reason }) => {
                if !dry_run {
                    self.backends.safe_stop().await;
                }
                RewindOutcome {
                    success: false,
                    state: RewindState::Aborted,
                    steps_rewound: done,
                    aborted_at: Some(done),
                    reason: Some(reason),
                    dry_run,
                    trace,
                }
            }
        }
    }

    /// Replay one chunk. Returns `(executed, trace)` or the partial progress
    /// plus the interrupt cause.
    async fn execute_chunk(
        &self,
        chunk: &Chunk,
        config: &RewindConfig,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<Progress, Halted> {
        let safety_cfg = self.safety.read().clone();
        let seg = Duration::from_secs_f64(
            config.chunk_duration_s.max(0.0) / chunk.waypoints.len().max(1) as f64,
        );
        let mut executed = 0usize;
        let mut trace = Vec::with_capacity(chunk.waypoints.len());

        // Arm chunks put the controller into the right mode up front.
        if !dry_run {
            let mode = match chunk.kind {
                WaypointKind::ArmJoint => Some(crate::command::ControlMode::JointPosition),
                WaypointKind::ArmCartesian => Some(crate::command::ControlMode::CartesianPose),
                _ => None,
            };
            if let Some(mode) = mode {
                if let Err(e) = self.backends.arm.set_mode(mode).await {
                    return Err((0, trace, Interrupt::Rejected { reason: e.to_string() }));
                }
            }
        }

        for wp in &chunk.waypoints {
            if cancel.is_cancelled() {
                return Err((executed, trace, Interrupt::Cancelled));
            }

            let cmd = to_command(&wp.data);
            let cmd = match safety::validate(&cmd, &safety_cfg) {
                Verdict::Ok => cmd,
                Verdict::Clamped(c) => c,
                Verdict::Reject(reason) => {
                    return Err((executed, trace, Interrupt::Rejected { reason }));
                }
            };

            trace.push(wp.data.clone());

            if dry_run {
                tokio::time::sleep(seg).await;
            } else if let Err(reason) = self.issue(&cmd, &wp.data, seg, config, cancel).await {
                return Err((executed, trace, reason));
            } else {
                self.recorder.record(wp.data.clone(), WaypointSource::Rewind);
            }

            executed += 1;
        }

        // Wait for the arm to settle onto the final target.
        if !dry_run {
            if let Some(last) = chunk.waypoints.last() {
                self.await_reached(&last.data, config).await;
            }
        }

        Ok((executed, trace))
    }

    /// Issue one target through the right adapter.
    async fn issue(
        &self,
        cmd: &Command,
        data: &WaypointData,
        seg: Duration,
        config: &RewindConfig,
        cancel: &CancellationToken,
    ) -> Result<(), Interrupt> {
        let into_reason =
            |e: crate::backend::AdapterError| Interrupt::Rejected { reason: e.to_string() };
        match (cmd, data) {
            (Command::Arm(ArmMove::JointPosition(target)), WaypointData::ArmJoint(_)) => {
                let start = self.backends.arm.get_state().joints;
                self.stream_arm(&start, target, seg, config, cancel, false)
                    .await
                    .map_err(into_reason)
            }
            (Command::Arm(ArmMove::CartesianPose(target)), WaypointData::ArmCartesian(_)) => {
                let start = self.backends.arm.get_state().pose;
                self.stream_arm(&start, target, seg, config, cancel, true)
                    .await
                    .map_err(into_reason)
            }
            (Command::Base(BaseMove::Pose(pose)), _) => {
                self.backends.base.move_to(*pose).await.map_err(into_reason)?;
                // Absolute target: wait out the motion within this segment.
                let deadline = tokio::time::Instant::now() + seg.max(config.settle_time());
                loop {
                    if cancel.is_cancelled() {
                        return Err(Interrupt::Cancelled);
                    }
                    match self.backends.base.get_state().await {
                        Ok(state) if !state.moving => return Ok(()),
                        _ if tokio::time::Instant::now() >= deadline => return Ok(()),
                        _ => tokio::time::sleep(Duration::from_millis(20)).await,
                    }
                }
            }
            (Command::Gripper(g), _) => {
                self.backends.gripper.command(g).await.map(|_| ()).map_err(into_reason)
            }
            // Clamping never changes the command family.
            _ => Ok(()),
        }
    }

    /// Stream cubic-interpolated targets from `start` to `target`.
    async fn stream_arm(
        &self,
        start: &[f64; 7],
        target: &[f64; 7],
        seg: Duration,
        config: &RewindConfig,
        cancel: &CancellationToken,
        cartesian: bool,
    ) -> Result<(), crate::backend::AdapterError> {
        let period = config.stream_period();
        let ticks = (seg.as_secs_f64() / period.as_secs_f64()).ceil().max(1.0) as u32;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        for k in 1..=ticks {
            if cancel.is_cancelled() {
                break;
            }
            interval.tick().await;
            let u = f64::from(k) / f64::from(ticks);
            let v = blend(start, target, smoothstep(u));
            let m = if cartesian {
                ArmMove::CartesianPose(v)
            } else {
                ArmMove::JointPosition(v)
            };
            self.backends.arm.send(&m)?;
        }
        Ok(())
    }

    /// Poll the reported state until the chunk's final target is reached or
    /// the chunk deadline elapses.
    async fn await_reached(&self, data: &WaypointData, config: &RewindConfig) {
        let deadline = tokio::time::Instant::now() + config.chunk_duration();
        loop {
            let reached = match data {
                WaypointData::ArmJoint(target) => {
                    let joints = self.backends.arm.get_state().joints;
                    within(&joints, target, config.joint_tolerance_rad)
                }
                WaypointData::ArmCartesian(target) => {
                    let pose = self.backends.arm.get_state().pose;
                    within(&pose[..3], &target[..3], config.cartesian_tolerance_m)
                }
                _ => true,
            };
            if reached || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Partition reversed waypoints into same-kind chunks of bounded size.
fn partition(waypoints: &[Waypoint], chunk_size: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let mut chunks: Vec<Chunk> = Vec::new();
    for wp in waypoints {
        let kind = wp.data.kind();
        match chunks.last_mut() {
            Some(chunk) if chunk.kind == kind && chunk.waypoints.len() < chunk_size => {
                chunk.t_min = chunk.t_min.min(wp.t);
                chunk.t_max = chunk.t_max.max(wp.t);
                chunk.waypoints.push(wp.clone());
            }
            _ => {
                chunks.push(Chunk { kind, waypoints: vec![wp.clone()], t_min: wp.t, t_max: wp.t });
            }
        }
    }
    chunks
}

/// Convert a recorded waypoint back into a command for validation/replay.
fn to_command(data: &WaypointData) -> Command {
    match data {
        WaypointData::ArmJoint(q) => Command::Arm(ArmMove::JointPosition(*q)),
        WaypointData::ArmCartesian(p) => Command::Arm(ArmMove::CartesianPose(*p)),
        WaypointData::BasePose(p) => Command::Base(BaseMove::Pose(*p)),
        WaypointData::GripperWidth(w) => Command::Gripper(GripperCommand {
            action: GripperAction::Move,
            width: Some(*w),
            speed: None,
            force: None,
        }),
    }
}

/// Combine the two legs of a concurrent arm+base pair.
fn merge_pair(a: Result<Progress, Halted>, b: Result<Progress, Halted>) -> Result<Progress, Halted> {
    match (a, b) {
        (Ok((ca, mut ta)), Ok((cb, mut tb))) => {
            ta.append(&mut tb);
            Ok((ca + cb, ta))
        }
        (Err((ca, mut ta, cause)), Ok((cb, mut tb)))
        | (Ok((cb, mut tb)), Err((ca, mut ta, cause))) => {
            ta.append(&mut tb);
            Err((ca + cb, ta, cause))
        }
        (Err((ca, mut ta, cause)), Err((cb, mut tb, _))) => {
            ta.append(&mut tb);
            Err((ca + cb, ta, cause))
        }
    }
}

/// Smooth cubic blend with zero end velocities.
fn smoothstep(u: f64) -> f64 {
    let u = u.clamp(0.0, 1.0);
    u * u * (3.0 - 2.0 * u)
}

fn blend(start: &[f64; 7], target: &[f64; 7], s: f64) -> [f64; 7] {
    let mut out = [0.0; 7];
    for i in 0..7 {
        out[i] = start[i] + (target[i] - start[i]) * s;
    }
    out
}

fn within(current: &[f64], target: &[f64], tolerance: f64) -> bool {
    current.iter().zip(target.iter()).all(|(c, t)| (c - t).abs() <= tolerance)
}

/// Spawn the optional auto-rewind monitor: watches published snapshots and
/// replays the last few steps when the live state leaves the envelope.
pub fn spawn_auto_monitor(
    engine: Arc<RewindEngine>,
    aggregator: Aggregator,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(Duration::from_millis(200));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }
            if engine.is_rewinding() {
                continue;
            }
            let snapshot = aggregator.latest();
            let Some(arm) = &snapshot.arm else { continue };
            let violation = {
                let cfg = engine.safety.read();
                safety::check_joints(&arm.value.joints, &cfg).or_else(|| {
                    safety::check_workspace(
                        arm.value.pose[0],
                        arm.value.pose[1],
                        arm.value.pose[2],
                        &cfg,
                    )
                })
            };
            let Some(reason) = violation else { continue };
            let steps = engine.config.read().auto_rewind_steps;
            tracing::warn!(%reason, steps, "envelope violation, auto-rewind engaged");
            match engine.rewind(RewindScope::Steps(steps), false).await {
                Ok(outcome) => {
                    tracing::info!(state = ?outcome.state, steps = outcome.steps_rewound, "auto-rewind done");
                }
                Err(e) => {
                    tracing::debug!(err = %e, "auto-rewind skipped");
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "rewind_tests.rs"]
mod tests;
