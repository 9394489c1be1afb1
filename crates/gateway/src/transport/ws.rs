// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket endpoints: state snapshots, command feedback, camera frames.
//!
//! Snapshot subscribers are conflated: each tick sends the latest snapshot
//! and skips anything older, so a slow client can never stall the
//! publisher. Feedback and camera subscribers ride broadcast channels and
//! simply drop what they lag past.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::state::GatewayState;

/// Query parameters for `/ws/state`.
#[derive(Debug, Deserialize)]
pub struct StateStreamQuery {
    /// Snapshot rate in Hz; clamped to `0.1..=60`.
    #[serde(default = "default_hz")]
    pub hz: f64,
}

fn default_hz() -> f64 {
    10.0
}

/// `GET /ws/state` — conflated snapshot stream at a client-chosen rate.
pub async fn ws_state(
    State(s): State<Arc<GatewayState>>,
    Query(query): Query<StateStreamQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let hz = query.hz.clamp(0.1, 60.0);
    ws.on_upgrade(move |socket| handle_state_stream(s, socket, hz))
}

async fn handle_state_stream(state: Arc<GatewayState>, socket: WebSocket, hz: f64) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let rx = state.aggregator.subscribe();
    let mut timer = tokio::time::interval(Duration::from_secs_f64(1.0 / hz));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_ts = 0u64;

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = timer.tick() => {
                let snapshot = rx.borrow().clone();
                if snapshot.ts_ms == 0 || snapshot.ts_ms == last_ts {
                    continue;
                }
                last_ts = snapshot.ts_ms;
                let Ok(json) = serde_json::to_string(&*snapshot) else { continue };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

/// `GET /ws/feedback` — per-command ack/result events.
pub async fn ws_feedback(
    State(s): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_feedback(s, socket))
}

async fn handle_feedback(state: Arc<GatewayState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut rx = state.feedback_tx.subscribe();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            event = rx.recv() => {
                let event = match event {
                    Ok(e) => e,
                    // Laggards skip ahead instead of queueing unboundedly.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

/// `GET /ws/cameras` — raw camera frames.
pub async fn ws_cameras(
    State(s): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_cameras(s, socket))
}

async fn handle_cameras(state: Arc<GatewayState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut rx = state.backends.cameras.subscribe();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            frame = rx.recv() => {
                let frame = match frame {
                    Ok(f) => f,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if ws_tx.send(Message::Binary(frame)).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
