// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/reply client for the gripper controller.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::command::GripperCommand;

use super::sim::SimRobot;
use super::{AdapterError, AdapterResult, BackendStatus, GripperState, LinkHealth};

enum GripperLink {
    Sim(Arc<SimRobot>),
    Http(GripperClient),
}

/// Adapter for the gripper. One round trip per verb.
pub struct GripperAdapter {
    link: GripperLink,
    health: LinkHealth,
    gate: tokio::sync::Mutex<()>,
}

impl GripperAdapter {
    pub fn simulated(sim: Arc<SimRobot>) -> Self {
        Self {
            link: GripperLink::Sim(sim),
            health: LinkHealth::default(),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn connect(base_url: String) -> Self {
        Self {
            link: GripperLink::Http(GripperClient::new(base_url)),
            health: LinkHealth::default(),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        match &self.link {
            GripperLink::Sim(sim) => sim.gripper_connected(),
            GripperLink::Http(_) => self.health.is_connected(),
        }
    }

    pub fn status(&self) -> BackendStatus {
        match &self.link {
            GripperLink::Sim(sim) => BackendStatus {
                connected: sim.gripper_connected(),
                last_ok_ms: Some(crate::state::epoch_ms()),
                last_error: None,
            },
            GripperLink::Http(_) => self.health.status(),
        }
    }

    /// Execute one gripper verb and return the resulting state.
    pub async fn command(&self, cmd: &GripperCommand) -> AdapterResult<GripperState> {
        let _gate = self.gate.lock().await;
        match &self.link {
            GripperLink::Sim(sim) => {
                if !sim.gripper_connected() {
                    return Err(AdapterError::NotConnected);
                }
                Ok(sim.apply_gripper(cmd))
            }
            GripperLink::Http(client) => {
                let res = client.command(cmd).await;
                match &res {
                    Ok(_) => self.health.mark_ok(),
                    Err(e) => self.health.mark_err(e),
                }
                res
            }
        }
    }

    pub async fn get_state(&self) -> AdapterResult<GripperState> {
        match &self.link {
            GripperLink::Sim(sim) => {
                if !sim.gripper_connected() {
                    return Err(AdapterError::NotConnected);
                }
                Ok(sim.gripper_state())
            }
            GripperLink::Http(client) => {
                let res = client.get_state().await;
                match &res {
                    Ok(_) => self.health.mark_ok(),
                    Err(e) => self.health.mark_err(e),
                }
                res
            }
        }
    }
}

struct GripperClient {
    base_url: String,
    client: Client,
}

impl GripperClient {
    fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn command(&self, cmd: &GripperCommand) -> AdapterResult<GripperState> {
        let resp = self.client.post(self.url("/api/v1/command")).json(cmd).send().await?;
        let state = resp.error_for_status()?.json::<GripperState>().await?;
        Ok(state)
    }

    async fn get_state(&self) -> AdapterResult<GripperState> {
        let resp = self.client.get(self.url("/api/v1/state")).send().await?;
        let state = resp.error_for_status()?.json::<GripperState>().await?;
        Ok(state)
    }
}
