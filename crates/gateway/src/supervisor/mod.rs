// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle supervisor for the backend server processes.
//!
//! Services are declared in a JSON map of definitions forming a dependency
//! DAG (cycles are rejected at load). A service may start only when every
//! dependency is running; when a service leaves `running`, its dependents
//! are stopped in breadth-first waves. A background loop probes health and
//! restarts crashed services that opted in.

pub mod health;
pub mod spawn;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::process::Child;

use crate::error::{ApiError, GatewayError};

use spawn::LogRing;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// One service definition from the services config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Shell command line that runs the service.
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Shell run before the command (environment setup and the like).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_prelude: Option<String>,
    /// Regexes matched against process command lines on forceful cleanup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kill_patterns: Vec<String>,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Liveness probe command; process-alive is always checked first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_cmd: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Unhealthy,
    Stopping,
    Crashed,
}

/// Public view of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub key: String,
    pub state: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_s: Option<f64>,
    pub restart_count: u32,
    pub health_failures: u32,
    pub depends_on: Vec<String>,
}

#[derive(Debug)]
struct ServiceEntry {
    def: ServiceDefinition,
    state: ServiceState,
    pid: Option<u32>,
    child: Option<Child>,
    started_at: Option<Instant>,
    health_failures: u32,
    restart_count: u32,
    log_ring: Arc<LogRing>,
}

impl ServiceEntry {
    fn info(&self, key: &str) -> ServiceInfo {
        ServiceInfo {
            key: key.to_owned(),
            state: self.state,
            pid: self.pid,
            uptime_s: self.started_at.map(|t| t.elapsed().as_secs_f64()),
            restart_count: self.restart_count,
            health_failures: self.health_failures,
            depends_on: self.def.depends_on.clone(),
        }
    }
}

/// Supervisor over all configured services.
#[derive(Debug)]
pub struct Supervisor {
    services: tokio::sync::Mutex<IndexMap<String, ServiceEntry>>,
    pid_file: PathBuf,
}

impl Supervisor {
    /// Build from definitions, rejecting unknown or cyclic dependencies.
    pub fn new(
        defs: IndexMap<String, ServiceDefinition>,
        pid_file: PathBuf,
        log_capacity: usize,
    ) -> anyhow::Result<Arc<Self>> {
        validate_graph(&defs)?;
        let services = defs
            .into_iter()
            .map(|(key, def)| {
                let entry = ServiceEntry {
                    def,
                    state: ServiceState::Stopped,
                    pid: None,
                    child: None,
                    started_at: None,
                    health_failures: 0,
                    restart_count: 0,
                    log_ring: Arc::new(LogRing::new(log_capacity)),
                };
                (key, entry)
            })
            .collect();
        Ok(Arc::new(Self { services: tokio::sync::Mutex::new(services), pid_file }))
    }

    /// Load definitions from a JSON file.
    pub fn load_definitions(path: &Path) -> anyhow::Result<IndexMap<String, ServiceDefinition>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading services config {}", path.display()))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Adopt services that survived a gateway crash: any persisted PID that
    /// is still alive becomes a `running` entry instead of an orphan.
    pub async fn adopt_persisted(&self) {
        let Ok(pids) = spawn::read_pid_file(&self.pid_file) else { return };
        let mut services = self.services.lock().await;
        for (key, pid) in pids {
            let Some(entry) = services.get_mut(&key) else { continue };
            if entry.state == ServiceState::Stopped && spawn::is_process_alive(pid) {
                tracing::info!(service = %key, pid, "adopted surviving service process");
                entry.state = ServiceState::Running;
                entry.pid = Some(pid);
                entry.started_at = Some(Instant::now());
            }
        }
    }

    /// Start one service. Every dependency must be running.
    pub async fn start(&self, key: &str) -> Result<ServiceInfo, ApiError> {
        let mut services = self.services.lock().await;
        let Some(entry) = services.get(key) else {
            return Err(unknown_service(key));
        };
        match entry.state {
            ServiceState::Stopped | ServiceState::Crashed => {}
            state => {
                return Err(ApiError::new(
                    GatewayError::Busy,
                    format!("service {key} is {}", state_str(state)),
                ));
            }
        }
        for dep in entry.def.depends_on.clone() {
            let dep_state = services.get(&dep).map(|e| e.state);
            if dep_state != Some(ServiceState::Running) {
                return Err(ApiError::new(
                    GatewayError::DependencyNotRunning,
                    format!("dependency {dep} is not running"),
                ));
            }
        }

        let entry = match services.get_mut(key) {
            Some(e) => e,
            None => return Err(unknown_service(key)),
        };
        match spawn::spawn_service(&entry.def, &entry.log_ring) {
            Ok((child, pid)) => {
                tracing::info!(service = %key, pid, "service starting");
                entry.state = ServiceState::Starting;
                entry.pid = Some(pid);
                entry.child = Some(child);
                entry.started_at = Some(Instant::now());
                entry.health_failures = 0;
                let info = entry.info(key);
                self.persist_pids(&services);
                Ok(info)
            }
            Err(e) => {
                tracing::error!(service = %key, err = %e, "service spawn failed");
                entry.state = ServiceState::Crashed;
                entry.pid = None;
                entry.child = None;
                Err(ApiError::new(GatewayError::Internal, format!("spawn failed: {e}")))
            }
        }
    }

    /// Stop one service and cascade over its dependents, breadth-first and
    /// synchronous per wave.
    pub async fn stop(&self, key: &str) -> Result<Vec<String>, ApiError> {
        let mut services = self.services.lock().await;
        if !services.contains_key(key) {
            return Err(unknown_service(key));
        }

        let waves = dependent_waves(&services, key);
        let mut stopped = Vec::new();
        for wave in waves {
            for k in wave {
                let Some(entry) = services.get_mut(&k) else { continue };
                if matches!(entry.state, ServiceState::Stopped) {
                    continue;
                }
                stop_entry(&k, entry).await;
                stopped.push(k);
            }
        }
        self.persist_pids(&services);
        Ok(stopped)
    }

    pub async fn restart(&self, key: &str) -> Result<ServiceInfo, ApiError> {
        self.stop(key).await?;
        self.start(key).await
    }

    /// Start everything in dependency order, waiting for each dependency to
    /// report healthy. Used by `--auto-start-services`.
    pub async fn start_all(self: &Arc<Self>) {
        let order = {
            let services = self.services.lock().await;
            topo_order(&services)
        };
        for key in order {
            // Wait until dependencies settle into running.
            let deadline = Instant::now() + Duration::from_secs(30);
            loop {
                match self.start(&key).await {
                    Ok(_) => break,
                    Err(e) if e.code == GatewayError::DependencyNotRunning => {
                        if Instant::now() >= deadline {
                            tracing::warn!(service = %key, "gave up waiting for dependencies");
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    Err(e) => {
                        tracing::warn!(service = %key, err = %e, "auto-start failed");
                        break;
                    }
                }
            }
        }
    }

    /// Stop everything, dependents before dependencies, then persist.
    pub async fn shutdown_all(&self) {
        let mut services = self.services.lock().await;
        let mut order = topo_order(&services);
        order.reverse();
        for key in order {
            let Some(entry) = services.get_mut(&key) else { continue };
            if !matches!(entry.state, ServiceState::Stopped) {
                stop_entry(&key, entry).await;
            }
        }
        self.persist_pids(&services);
    }

    pub async fn list(&self) -> Vec<ServiceInfo> {
        let services = self.services.lock().await;
        services.iter().map(|(k, e)| e.info(k)).collect()
    }

    pub async fn get(&self, key: &str) -> Option<ServiceInfo> {
        let services = self.services.lock().await;
        services.get(key).map(|e| e.info(key))
    }

    pub async fn get_logs(&self, key: &str, lines: usize) -> Option<Vec<String>> {
        let services = self.services.lock().await;
        services.get(key).map(|e| e.log_ring.last(lines))
    }

    fn persist_pids(&self, services: &IndexMap<String, ServiceEntry>) {
        let pids: BTreeMap<String, u32> = services
            .iter()
            .filter_map(|(k, e)| e.pid.map(|pid| (k.clone(), pid)))
            .collect();
        if let Err(e) = spawn::write_pid_file(&self.pid_file, &pids) {
            tracing::warn!(err = %e, "failed to persist service pids");
        }
    }
}

fn unknown_service(key: &str) -> ApiError {
    ApiError::new(GatewayError::InvalidArgument, format!("unknown service {key}"))
}

fn state_str(state: ServiceState) -> &'static str {
    match state {
        ServiceState::Stopped => "stopped",
        ServiceState::Starting => "starting",
        ServiceState::Running => "running",
        ServiceState::Unhealthy => "unhealthy",
        ServiceState::Stopping => "stopping",
        ServiceState::Crashed => "crashed",
    }
}

/// Stop one entry: signal the group, wait it out, sweep kill patterns.
async fn stop_entry(key: &str, entry: &mut ServiceEntry) {
    tracing::info!(service = %key, "service stopping");
    entry.state = ServiceState::Stopping;
    if let Some(pid) = entry.pid {
        spawn::terminate_group(pid, STOP_GRACE).await;
    }
    if let Some(mut child) = entry.child.take() {
        // The group was signalled; reap promptly without hanging shutdown.
        let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
    }
    for pattern in &entry.def.kill_patterns {
        spawn::kill_by_pattern(pattern);
    }
    entry.state = ServiceState::Stopped;
    entry.pid = None;
    entry.started_at = None;
    entry.health_failures = 0;
}

/// BFS waves of dependents, starting with the service itself.
fn dependent_waves(services: &IndexMap<String, ServiceEntry>, key: &str) -> Vec<Vec<String>> {
    let mut waves = vec![vec![key.to_owned()]];
    let mut seen: Vec<String> = vec![key.to_owned()];
    loop {
        let last = &waves[waves.len() - 1];
        let next: Vec<String> = services
            .iter()
            .filter(|(k, e)| {
                !seen.contains(k) && e.def.depends_on.iter().any(|d| last.contains(d))
            })
            .map(|(k, _)| k.clone())
            .collect();
        if next.is_empty() {
            break;
        }
        seen.extend(next.iter().cloned());
        waves.push(next);
    }
    waves
}

/// Kahn's algorithm over the dependency graph; also the cycle check.
fn topo_sort(keys: &[String], deps_of: impl Fn(&str) -> Vec<String>) -> anyhow::Result<Vec<String>> {
    let mut in_degree: IndexMap<String, usize> =
        keys.iter().map(|k| (k.clone(), deps_of(k).len())).collect();
    let mut order = Vec::with_capacity(keys.len());
    while order.len() < keys.len() {
        let Some(next) = in_degree
            .iter()
            .find(|(k, degree)| **degree == 0 && !order.contains(*k))
            .map(|(k, _)| k.clone())
        else {
            bail!("service dependency cycle detected");
        };
        for key in keys {
            if deps_of(key).contains(&next) {
                if let Some(d) = in_degree.get_mut(key) {
                    *d = d.saturating_sub(1);
                }
            }
        }
        order.push(next);
    }
    Ok(order)
}

fn validate_graph(defs: &IndexMap<String, ServiceDefinition>) -> anyhow::Result<()> {
    for (key, def) in defs {
        for dep in &def.depends_on {
            if !defs.contains_key(dep) {
                bail!("service {key} depends on unknown service {dep}");
            }
        }
    }
    let keys: Vec<String> = defs.keys().cloned().collect();
    topo_sort(&keys, |k| defs.get(k).map(|d| d.depends_on.clone()).unwrap_or_default())?;
    Ok(())
}

fn topo_order(services: &IndexMap<String, ServiceEntry>) -> Vec<String> {
    let keys: Vec<String> = services.keys().cloned().collect();
    topo_sort(&keys, |k| {
        services.get(k).map(|e| e.def.depends_on.clone()).unwrap_or_default()
    })
    .unwrap_or_else(|_| keys.clone())
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
