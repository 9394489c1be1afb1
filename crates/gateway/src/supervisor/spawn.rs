// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-level plumbing for supervised services: spawning, log capture,
//! termination, pattern cleanup, and PID persistence.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::ServiceDefinition;

/// Bounded ring of the last K log lines from one service.
#[derive(Debug)]
pub struct LogRing {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self { lines: Mutex::new(VecDeque::new()), capacity: capacity.max(1) }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The last `n` lines, oldest first.
    pub fn last(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

/// Checks whether a process with the given PID is alive.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid_i32) = i32::try_from(pid) else {
        return false;
    };
    nix::sys::signal::kill(Pid::from_raw(pid_i32), None).is_ok()
}

/// Spawn a service in its own process group, wiring stdout/stderr into the
/// log ring.
pub fn spawn_service(def: &ServiceDefinition, ring: &Arc<LogRing>) -> anyhow::Result<(Child, u32)> {
    let script = match &def.shell_prelude {
        Some(prelude) => format!("{prelude}\n{}", def.command),
        None => def.command.clone(),
    };

    let mut cmd = Command::new("sh");
    cmd.args(["-c", &script]);
    if let Some(cwd) = &def.cwd {
        cmd.current_dir(cwd);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // Own process group so the whole service tree can be signalled at once.
    cmd.process_group(0);

    let mut child = cmd.spawn().context("spawn failed")?;
    let pid = child.id().context("child has no pid")?;

    if let Some(stdout) = child.stdout.take() {
        let ring = Arc::clone(ring);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                ring.push(line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let ring = Arc::clone(ring);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                ring.push(line);
            }
        });
    }

    Ok((child, pid))
}

/// Terminate a process group: SIGTERM, a grace window, then SIGKILL.
pub async fn terminate_group(pid: u32, grace: Duration) {
    let Ok(pid_i32) = i32::try_from(pid) else { return };
    let pgid = Pid::from_raw(pid_i32);

    let _ = killpg(pgid, Signal::SIGTERM);
    let deadline = tokio::time::Instant::now() + grace;
    while is_process_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            let _ = killpg(pgid, Signal::SIGKILL);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Kill any leftover processes whose command line matches the pattern.
///
/// Scans `/proc` rather than shelling out, so a bad pattern is a no-op
/// instead of a surprise.
pub fn kill_by_pattern(pattern: &str) {
    let re = match regex::Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!(pattern, err = %e, "invalid kill pattern");
            return;
        }
    };
    let Ok(entries) = std::fs::read_dir("/proc") else { return };
    let own_pid = std::process::id();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        let Ok(cmdline) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let cmdline = String::from_utf8_lossy(&cmdline).replace('\0', " ");
        if re.is_match(&cmdline) {
            tracing::info!(pid, pattern, "killing leftover process");
            if let Ok(pid_i32) = i32::try_from(pid) {
                let _ = nix::sys::signal::kill(Pid::from_raw(pid_i32), Signal::SIGKILL);
            }
        }
    }
}

/// Persist the PID map so a crashed gateway can adopt live children.
pub fn write_pid_file(path: &Path, pids: &BTreeMap<String, u32>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(pids)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn read_pid_file(path: &Path) -> anyhow::Result<BTreeMap<String, u32>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
