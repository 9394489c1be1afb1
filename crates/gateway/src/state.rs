// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared gateway state: the explicit dependency record handed to every
//! handler and background task. Tests build it with simulated adapters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{spawn_aggregator, Aggregator};
use crate::backend::Backends;
use crate::config::{GatewayConfig, RewindConfig};
use crate::executor::{CodeExecutor, ExecutorConfig};
use crate::lease::LeaseCoordinator;
use crate::rewind::{spawn_auto_monitor, RewindEngine};
use crate::safety::SafetyConfig;
use crate::supervisor::Supervisor;
use crate::trajectory::TrajectoryRecorder;

/// Per-command lifecycle events for `/ws/feedback` subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct CommandEvent {
    pub seq: u64,
    pub command: String,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Accepted,
    Completed,
    Failed,
}

/// Shared gateway state.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub safety: Arc<RwLock<SafetyConfig>>,
    pub backends: Backends,
    pub recorder: Arc<TrajectoryRecorder>,
    pub lease: Arc<LeaseCoordinator>,
    pub aggregator: Aggregator,
    pub rewind: Arc<RewindEngine>,
    pub executor: Arc<CodeExecutor>,
    pub supervisor: Option<Arc<Supervisor>>,
    pub feedback_tx: broadcast::Sender<CommandEvent>,
    feedback_seq: AtomicU64,
    pub shutdown: CancellationToken,
}

impl GatewayState {
    /// Wire the full gateway around the given adapters and spawn its
    /// background tasks (pollers, publisher, lease revoker, optional
    /// auto-rewind monitor).
    pub fn build(
        config: GatewayConfig,
        backends: Backends,
        supervisor: Option<Arc<Supervisor>>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let safety = Arc::new(RwLock::new(SafetyConfig::default()));
        let recorder = Arc::new(TrajectoryRecorder::new(config.trajectory_capacity));

        let lease =
            Arc::new(LeaseCoordinator::new(config.lease_ttl(), config.lease_idle_timeout()));
        tokio::spawn(Arc::clone(&lease).run_revoker(shutdown.clone()));

        let aggregator = spawn_aggregator(backends.clone(), &config, shutdown.clone());

        let rewind = Arc::new(RewindEngine::new(
            Arc::clone(&recorder),
            backends.clone(),
            Arc::clone(&safety),
            RewindConfig::default(),
        ));
        if config.auto_rewind {
            spawn_auto_monitor(Arc::clone(&rewind), aggregator.clone(), shutdown.clone());
        }

        let executor = Arc::new(CodeExecutor::new(
            ExecutorConfig {
                interpreter: config.exec_interpreter.clone(),
                default_timeout: config.exec_timeout(),
                max_timeout: config.exec_timeout_max(),
                gateway_url: config.public_url(),
                wrap_sdk: true,
            },
            backends.clone(),
        ));

        let (feedback_tx, _) = broadcast::channel(256);

        Arc::new(Self {
            config,
            safety,
            backends,
            recorder,
            lease,
            aggregator,
            rewind,
            executor,
            supervisor,
            feedback_tx,
            feedback_seq: AtomicU64::new(0),
            shutdown,
        })
    }

    /// Fully simulated gateway, as used by `--dry-run` and the test suite.
    pub fn simulated(config: GatewayConfig) -> Arc<Self> {
        let shutdown = CancellationToken::new();
        let backends = Backends::simulated(&shutdown);
        Self::build(config, backends, None, shutdown)
    }

    /// Emit a feedback event; subscribers that lag simply miss it.
    pub fn emit(&self, command: &str, status: CommandStatus, detail: Option<String>) {
        let event = CommandEvent {
            seq: self.feedback_seq.fetch_add(1, Ordering::Relaxed),
            command: command.to_owned(),
            status,
            detail,
            ts_ms: epoch_ms(),
        };
        let _ = self.feedback_tx.send(event);
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
