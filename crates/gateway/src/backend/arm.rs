// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming client for the arm controller.
//!
//! The controller expects a steady command stream and holds position when
//! it goes quiet. Callers therefore never write the socket directly: a
//! command sets a target, and a single sender task emits the latest target
//! at the stream rate until it is replaced or the adapter stops. State
//! frames from the controller are parsed into a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::command::{ArmMove, ControlMode};

use super::sim::SimRobot;
use super::{AdapterError, AdapterResult, ArmState, BackendStatus, LinkHealth};

const MODE_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// What the sender task should currently emit.
#[derive(Debug, Clone)]
enum ArmTarget {
    /// Hold at current position.
    Hold,
    Move(ArmMove),
}

/// Outgoing wire frame, one JSON object per line.
#[derive(Debug, Serialize)]
struct WireCommand<'a> {
    mode: ControlMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    values: Option<&'a [f64]>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    hold: bool,
}

/// Incoming state frame from the controller.
#[derive(Debug, Deserialize)]
struct WireState {
    joints: [f64; 7],
    pose: [f64; 7],
    mode: ControlMode,
    #[serde(default)]
    moving: bool,
}

struct ArmShared {
    health: LinkHealth,
    mode: Mutex<ControlMode>,
    target_tx: watch::Sender<ArmTarget>,
    state_tx: watch::Sender<ArmState>,
}

enum ArmLink {
    Sim(Arc<SimRobot>),
    Stream,
}

/// Adapter for the arm controller.
pub struct ArmAdapter {
    link: ArmLink,
    shared: Arc<ArmShared>,
    /// Serializes mode changes so each is confirmed before the next command.
    gate: tokio::sync::Mutex<()>,
}

impl ArmAdapter {
    fn shared() -> Arc<ArmShared> {
        let (target_tx, _) = watch::channel(ArmTarget::Hold);
        let (state_tx, _) = watch::channel(ArmState::default());
        Arc::new(ArmShared {
            health: LinkHealth::default(),
            mode: Mutex::new(ControlMode::Idle),
            target_tx,
            state_tx,
        })
    }

    /// Simulated adapter: commands apply instantly to the shared model.
    pub fn simulated(sim: Arc<SimRobot>) -> Self {
        Self { link: ArmLink::Sim(sim), shared: Self::shared(), gate: tokio::sync::Mutex::new(()) }
    }

    /// Connect to a real controller. The link is managed in the background
    /// and keeps retrying with backoff until `cancel` fires.
    pub fn connect(addr: String, stream_hz: u32, cancel: CancellationToken) -> Self {
        let shared = Self::shared();
        let period = Duration::from_secs_f64(1.0 / f64::from(stream_hz.max(1)));
        {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let mut backoff = Duration::from_millis(500);
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match TcpStream::connect(&addr).await {
                        Ok(stream) => {
                            tracing::info!(%addr, "arm controller connected");
                            shared.health.mark_ok();
                            backoff = Duration::from_millis(500);
                            let err = run_stream(stream, &shared, period, &cancel).await;
                            if let Err(e) = err {
                                tracing::warn!(%addr, err = %e, "arm stream ended");
                                shared.health.mark_err(&e);
                            }
                        }
                        Err(e) => {
                            let err = AdapterError::Io(e.to_string());
                            shared.health.mark_err(&err);
                            tracing::debug!(%addr, err = %e, "arm connect failed");
                        }
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                }
            });
        }
        Self { link: ArmLink::Stream, shared, gate: tokio::sync::Mutex::new(()) }
    }

    pub fn is_connected(&self) -> bool {
        match &self.link {
            ArmLink::Sim(sim) => sim.arm_connected(),
            ArmLink::Stream => self.shared.health.is_connected(),
        }
    }

    pub fn status(&self) -> BackendStatus {
        match &self.link {
            ArmLink::Sim(sim) => BackendStatus {
                connected: sim.arm_connected(),
                last_ok_ms: Some(crate::state::epoch_ms()),
                last_error: None,
            },
            ArmLink::Stream => self.shared.health.status(),
        }
    }

    /// Current controller mode as last confirmed.
    pub fn mode(&self) -> ControlMode {
        *self.shared.mode.lock()
    }

    /// Switch the controller mode. Returns once the controller confirms.
    pub async fn set_mode(&self, mode: ControlMode) -> AdapterResult<()> {
        let _gate = self.gate.lock().await;
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }
        match &self.link {
            ArmLink::Sim(sim) => {
                sim.set_arm_mode(mode);
                *self.shared.mode.lock() = mode;
                Ok(())
            }
            ArmLink::Stream => {
                *self.shared.mode.lock() = mode;
                // The sender emits the new mode on its next tick; wait for
                // the controller to echo it in a state frame.
                let mut rx = self.shared.state_tx.subscribe();
                let confirm = async {
                    loop {
                        if rx.borrow().mode == mode {
                            return Ok(());
                        }
                        if rx.changed().await.is_err() {
                            return Err(AdapterError::NotConnected);
                        }
                    }
                };
                match tokio::time::timeout(MODE_CONFIRM_TIMEOUT, confirm).await {
                    Ok(res) => res,
                    Err(_) => Err(AdapterError::Timeout),
                }
            }
        }
    }

    /// Submit a target. Non-blocking: the sender task streams it out.
    pub fn send(&self, m: &ArmMove) -> AdapterResult<()> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }
        let mode = *self.shared.mode.lock();
        if mode != m.mode() {
            return Err(AdapterError::WrongMode(mode));
        }
        match &self.link {
            ArmLink::Sim(sim) => sim.apply_arm(m),
            ArmLink::Stream => {
                self.shared.target_tx.send_replace(ArmTarget::Move(m.clone()));
            }
        }
        Ok(())
    }

    /// Hold at the current position.
    pub fn stop(&self) -> AdapterResult<()> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected);
        }
        match &self.link {
            ArmLink::Sim(sim) => sim.hold_arm(),
            ArmLink::Stream => {
                self.shared.target_tx.send_replace(ArmTarget::Hold);
            }
        }
        Ok(())
    }

    pub fn get_state(&self) -> ArmState {
        match &self.link {
            ArmLink::Sim(sim) => sim.arm_state(),
            ArmLink::Stream => self.shared.state_tx.borrow().clone(),
        }
    }
}

/// Drive one connected stream until error or cancellation.
async fn run_stream(
    stream: TcpStream,
    shared: &ArmShared,
    period: Duration,
    cancel: &CancellationToken,
) -> AdapterResult<()> {
    let (read_half, write_half) = stream.into_split();

    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        res = sender_loop(shared, write_half, period) => res,
        res = receiver_loop(shared, read_half) => res,
    }
}

/// Emit the latest target at the stream rate until the socket fails.
async fn sender_loop(
    shared: &ArmShared,
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    period: Duration,
) -> AdapterResult<()> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let mode = *shared.mode.lock();
        let target = shared.target_tx.borrow().clone();
        let values: Option<Vec<f64>> = match &target {
            ArmTarget::Hold => None,
            ArmTarget::Move(ArmMove::JointPosition(v))
            | ArmTarget::Move(ArmMove::CartesianPose(v))
            | ArmTarget::Move(ArmMove::JointVelocity(v)) => Some(v.to_vec()),
            ArmTarget::Move(ArmMove::CartesianVelocity(v)) => Some(v.to_vec()),
        };
        let frame =
            WireCommand { mode, values: values.as_deref(), hold: matches!(target, ArmTarget::Hold) };
        let mut line =
            serde_json::to_vec(&frame).map_err(|e| AdapterError::Protocol(e.to_string()))?;
        line.push(b'\n');
        write_half.write_all(&line).await.map_err(|e| AdapterError::Io(e.to_string()))?;
    }
}

/// Parse controller state frames into the shared watch channel.
async fn receiver_loop(
    shared: &ArmShared,
    read_half: tokio::net::tcp::OwnedReadHalf,
) -> AdapterResult<()> {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<WireState>(&line) {
                Ok(ws) => {
                    shared.health.mark_ok();
                    shared.state_tx.send_replace(ArmState {
                        joints: ws.joints,
                        pose: ws.pose,
                        mode: ws.mode,
                        moving: ws.moving,
                    });
                }
                Err(e) => {
                    tracing::debug!(err = %e, "bad arm state frame");
                }
            },
            Ok(None) => return Err(AdapterError::Io("arm stream closed".to_owned())),
            Err(e) => return Err(AdapterError::Io(e.to_string())),
        }
    }
}
