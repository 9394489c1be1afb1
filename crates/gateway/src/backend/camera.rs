// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Camera byte-stream adapter.
//!
//! Frames from the upstream stream are fanned out through a broadcast
//! channel; WebSocket sessions each get their own receiver and laggards
//! drop frames instead of stalling the stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::sim::SimRobot;
use super::{AdapterError, BackendStatus, LinkHealth};

const FRAME_CHANNEL: usize = 16;
const SIM_FRAME_INTERVAL: Duration = Duration::from_millis(100);

enum CameraLink {
    Sim(Arc<SimRobot>),
    Http,
}

/// Adapter for the camera stream.
pub struct CameraAdapter {
    link: CameraLink,
    /// Shared with the stream task, which marks it as frames arrive.
    health: Arc<LinkHealth>,
    frames: broadcast::Sender<Bytes>,
}

impl CameraAdapter {
    /// Simulated cameras: a synthetic frame every 100 ms.
    pub fn simulated(sim: Arc<SimRobot>, cancel: CancellationToken) -> Self {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL);
        {
            let frames = frames.clone();
            let sim = Arc::clone(&sim);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(SIM_FRAME_INTERVAL);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                let mut seq: u64 = 0;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {}
                    }
                    if !sim.cameras_connected() {
                        continue;
                    }
                    seq += 1;
                    let mut frame = Vec::with_capacity(16);
                    frame.extend_from_slice(b"SIMFRAME");
                    frame.extend_from_slice(&seq.to_be_bytes());
                    let _ = frames.send(Bytes::from(frame));
                }
            });
        }
        Self { link: CameraLink::Sim(sim), health: Arc::new(LinkHealth::default()), frames }
    }

    /// Connect to the real camera stream, retrying with backoff.
    pub fn connect(url: String, cancel: CancellationToken) -> Self {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL);
        let health = Arc::new(LinkHealth::default());
        let shared_health = Arc::clone(&health);
        let frames_tx = frames.clone();
        tokio::spawn(async move {
            let frames = frames_tx;
            let client = reqwest::Client::new();
            let mut backoff = Duration::from_millis(500);
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match client.get(&url).send().await.and_then(|r| r.error_for_status()) {
                    Ok(mut resp) => {
                        shared_health.mark_ok();
                        backoff = Duration::from_millis(500);
                        loop {
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                chunk = resp.chunk() => match chunk {
                                    Ok(Some(bytes)) => {
                                        shared_health.mark_ok();
                                        let _ = frames.send(bytes);
                                    }
                                    Ok(None) => {
                                        shared_health
                                            .mark_err(&AdapterError::Io("camera stream closed".to_owned()));
                                        break;
                                    }
                                    Err(e) => {
                                        shared_health.mark_err(&AdapterError::from(e));
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        shared_health.mark_err(&AdapterError::from(e));
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(Duration::from_secs(5));
            }
        });
        Self { link: CameraLink::Http, health, frames }
    }

    pub fn is_connected(&self) -> bool {
        match &self.link {
            CameraLink::Sim(sim) => sim.cameras_connected(),
            CameraLink::Http => self.health.is_connected(),
        }
    }

    pub fn status(&self) -> BackendStatus {
        match &self.link {
            CameraLink::Sim(sim) => BackendStatus {
                connected: sim.cameras_connected(),
                last_ok_ms: Some(crate::state::epoch_ms()),
                last_error: None,
            },
            CameraLink::Http => self.health.status(),
        }
    }

    /// Subscribe to the frame stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.frames.subscribe()
    }
}
