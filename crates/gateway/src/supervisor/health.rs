// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background health checker for supervised services.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::spawn::is_process_alive;
use super::{ServiceState, Supervisor};

/// Consecutive probe failures before a running service is marked unhealthy.
const UNHEALTHY_AFTER: u32 = 3;
const PROBE_TIMEOUT: Duration = Duration::from_secs(4);
const RESTART_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Spawn the single background task that probes all services.
pub fn spawn_health_loop(
    supervisor: Arc<Supervisor>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            // Snapshot what needs probing, then probe without the lock.
            let targets: Vec<(String, ServiceState, Option<u32>, Option<String>)> = {
                let services = supervisor.services.lock().await;
                services
                    .iter()
                    .filter(|(_, e)| {
                        matches!(
                            e.state,
                            ServiceState::Starting | ServiceState::Running | ServiceState::Unhealthy
                        )
                    })
                    .map(|(k, e)| (k.clone(), e.state, e.pid, e.def.health_cmd.clone()))
                    .collect()
            };

            for (key, _, pid, health_cmd) in targets {
                let alive = pid.is_some_and(is_process_alive);
                let probe_ok = if alive {
                    match &health_cmd {
                        Some(cmd) => run_probe(cmd).await,
                        None => true,
                    }
                } else {
                    false
                };
                apply_probe(&supervisor, &key, alive, probe_ok).await;
            }
        }
    });
}

/// Run a probe command; success is exit status zero within the timeout.
async fn run_probe(cmd: &str) -> bool {
    let mut command = tokio::process::Command::new("sh");
    command.args(["-c", cmd]);
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());
    let Ok(mut child) = command.spawn() else { return false };
    match tokio::time::timeout(PROBE_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        _ => {
            let _ = child.kill().await;
            false
        }
    }
}

/// Fold one probe result into the state machine.
async fn apply_probe(supervisor: &Arc<Supervisor>, key: &str, alive: bool, probe_ok: bool) {
    let mut services = supervisor.services.lock().await;
    let Some(entry) = services.get_mut(key) else { return };

    // Ignore results that raced a manual stop/start.
    if !matches!(
        entry.state,
        ServiceState::Starting | ServiceState::Running | ServiceState::Unhealthy
    ) {
        return;
    }

    if !alive {
        tracing::warn!(service = %key, "service process died");
        entry.state = ServiceState::Crashed;
        entry.pid = None;
        entry.child = None;
        entry.started_at = None;
        entry.health_failures = 0;
        if entry.def.auto_restart {
            entry.restart_count += 1;
            let attempt = entry.restart_count;
            let backoff = backoff_for(attempt);
            let supervisor = Arc::clone(supervisor);
            let key = key.to_owned();
            tracing::info!(service = %key, attempt, ?backoff, "scheduling auto-restart");
            tokio::spawn(async move {
                tokio::time::sleep(backoff).await;
                if let Err(e) = supervisor.start(&key).await {
                    tracing::warn!(service = %key, err = %e, "auto-restart failed");
                }
            });
        }
        return;
    }

    if probe_ok {
        if entry.state != ServiceState::Running {
            tracing::info!(service = %key, "service healthy");
        }
        entry.state = ServiceState::Running;
        entry.health_failures = 0;
    } else {
        entry.health_failures += 1;
        tracing::warn!(service = %key, failures = entry.health_failures, "health probe failed");
        if entry.state == ServiceState::Running && entry.health_failures >= UNHEALTHY_AFTER {
            entry.state = ServiceState::Unhealthy;
        }
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt.min(8));
    Duration::from_secs(secs).min(RESTART_BACKOFF_MAX)
}
