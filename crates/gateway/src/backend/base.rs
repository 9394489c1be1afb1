// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/reply client for the mobile base RPC server.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;

use crate::command::{BasePose, Frame};

use super::sim::SimRobot;
use super::{AdapterError, AdapterResult, BackendStatus, BaseState, LinkHealth};

enum BaseLink {
    Sim(Arc<SimRobot>),
    Http(BaseClient),
}

/// Adapter for the base server. One round trip per operation; concurrent
/// callers are serialized FIFO through the command gate.
pub struct BaseAdapter {
    link: BaseLink,
    health: LinkHealth,
    gate: tokio::sync::Mutex<()>,
}

impl BaseAdapter {
    pub fn simulated(sim: Arc<SimRobot>) -> Self {
        Self { link: BaseLink::Sim(sim), health: LinkHealth::default(), gate: tokio::sync::Mutex::new(()) }
    }

    pub fn connect(base_url: String) -> Self {
        Self {
            link: BaseLink::Http(BaseClient::new(base_url)),
            health: LinkHealth::default(),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        match &self.link {
            BaseLink::Sim(sim) => sim.base_connected(),
            BaseLink::Http(_) => self.health.is_connected(),
        }
    }

    pub fn status(&self) -> BackendStatus {
        match &self.link {
            BaseLink::Sim(sim) => BackendStatus {
                connected: sim.base_connected(),
                last_ok_ms: Some(crate::state::epoch_ms()),
                last_error: None,
            },
            BaseLink::Http(_) => self.health.status(),
        }
    }

    /// Drive to an absolute pose. Returns once the server accepted the
    /// target; motion completes asynchronously (see `get_state().moving`).
    pub async fn move_to(&self, pose: BasePose) -> AdapterResult<()> {
        let _gate = self.gate.lock().await;
        match &self.link {
            BaseLink::Sim(sim) => {
                if !sim.base_connected() {
                    return Err(AdapterError::NotConnected);
                }
                sim.apply_base_pose(pose);
                Ok(())
            }
            BaseLink::Http(client) => {
                let res = client
                    .post("/api/v1/pose", &json!({"x": pose.x, "y": pose.y, "theta": pose.theta}))
                    .await;
                self.track(res)
            }
        }
    }

    pub async fn set_velocity(&self, vx: f64, vy: f64, wz: f64, frame: Frame) -> AdapterResult<()> {
        let _gate = self.gate.lock().await;
        match &self.link {
            BaseLink::Sim(sim) => {
                if !sim.base_connected() {
                    return Err(AdapterError::NotConnected);
                }
                sim.apply_base_velocity(vx, vy, wz);
                Ok(())
            }
            BaseLink::Http(client) => {
                let res = client
                    .post("/api/v1/velocity", &json!({"vx": vx, "vy": vy, "wz": wz, "frame": frame}))
                    .await;
                self.track(res)
            }
        }
    }

    /// Zero velocity immediately.
    pub async fn stop(&self) -> AdapterResult<()> {
        let _gate = self.gate.lock().await;
        match &self.link {
            BaseLink::Sim(sim) => {
                if !sim.base_connected() {
                    return Err(AdapterError::NotConnected);
                }
                sim.apply_base_velocity(0.0, 0.0, 0.0);
                Ok(())
            }
            BaseLink::Http(client) => {
                let res = client.post("/api/v1/stop", &json!({})).await;
                self.track(res)
            }
        }
    }

    pub async fn get_state(&self) -> AdapterResult<BaseState> {
        match &self.link {
            BaseLink::Sim(sim) => {
                if !sim.base_connected() {
                    return Err(AdapterError::NotConnected);
                }
                Ok(sim.base_state())
            }
            BaseLink::Http(client) => {
                let res = client.get_state().await;
                match res {
                    Ok(state) => {
                        self.health.mark_ok();
                        Ok(state)
                    }
                    Err(e) => {
                        self.health.mark_err(&e);
                        Err(e)
                    }
                }
            }
        }
    }

    fn track(&self, res: AdapterResult<()>) -> AdapterResult<()> {
        match &res {
            Ok(()) => self.health.mark_ok(),
            Err(e) => self.health.mark_err(e),
        }
        res
    }
}

/// Thin HTTP wrapper around the base server.
struct BaseClient {
    base_url: String,
    client: Client,
}

impl BaseClient {
    fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> AdapterResult<()> {
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        resp.error_for_status().map(|_| ()).map_err(AdapterError::from)
    }

    async fn get_state(&self) -> AdapterResult<BaseState> {
        let resp = self.client.get(self.url("/api/v1/state")).send().await?;
        let state = resp.error_for_status()?.json::<BaseState>().await?;
        Ok(state)
    }
}
