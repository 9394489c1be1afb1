// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::backend::Backends;
use tokio_util::sync::CancellationToken;

/// Shell-interpreter executor without the Python prelude, so process
/// lifecycle is testable with plain scripts.
fn shell_executor(backends: &Backends) -> CodeExecutor {
    CodeExecutor::new(
        ExecutorConfig {
            interpreter: "sh".to_owned(),
            default_timeout: Duration::from_secs(10),
            max_timeout: Duration::from_secs(30),
            gateway_url: "http://127.0.0.1:0".to_owned(),
            wrap_sdk: false,
        },
        backends.clone(),
    )
}

async fn wait_done(exec: &CodeExecutor, secs: u64) -> ExecutionRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    loop {
        if !exec.is_running() {
            if let Some(rec) = exec.result() {
                if rec.state != ExecutionState::Running {
                    return rec;
                }
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "execution never settled");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn successful_script_completes_with_captured_output() {
    let backends = Backends::simulated(&CancellationToken::new());
    let exec = shell_executor(&backends);

    let id = exec.execute("echo out-line; echo err-line 1>&2", None, None).unwrap();
    let rec = wait_done(&exec, 10).await;
    assert_eq!(rec.execution_id, id);
    assert_eq!(rec.state, ExecutionState::Completed);
    assert_eq!(rec.exit_code, Some(0));
    assert!(rec.stdout.contains("out-line"));
    assert!(rec.stderr.contains("err-line"));
    assert!(rec.duration_s.unwrap() < 5.0);
}

#[tokio::test]
async fn nonzero_exit_is_failed() {
    let backends = Backends::simulated(&CancellationToken::new());
    let exec = shell_executor(&backends);

    exec.execute("exit 3", None, None).unwrap();
    let rec = wait_done(&exec, 10).await;
    assert_eq!(rec.state, ExecutionState::Failed);
    assert_eq!(rec.exit_code, Some(3));
    assert!(rec.error.is_some());
}

#[tokio::test]
async fn timeout_kills_the_child() {
    let backends = Backends::simulated(&CancellationToken::new());
    let exec = shell_executor(&backends);

    exec.execute("sleep 30", Some(Duration::from_millis(200)), None).unwrap();
    let rec = wait_done(&exec, 10).await;
    assert_eq!(rec.state, ExecutionState::Timeout);
    assert_eq!(rec.error.as_deref(), Some("execution timed out"));
}

#[tokio::test]
async fn second_execution_is_busy_until_the_first_finishes() {
    let backends = Backends::simulated(&CancellationToken::new());
    let exec = shell_executor(&backends);

    exec.execute("sleep 5", None, None).unwrap();
    let err = exec.execute("echo nope", None, None).unwrap_err();
    assert_eq!(err.code, GatewayError::Busy);

    assert!(exec.stop());
    let rec = wait_done(&exec, 10).await;
    assert_eq!(rec.state, ExecutionState::Stopped);

    // Slot is free again.
    exec.execute("echo again", None, None).unwrap();
    let rec = wait_done(&exec, 10).await;
    assert_eq!(rec.state, ExecutionState::Completed);
}

#[tokio::test]
async fn stop_without_execution_reports_false() {
    let backends = Backends::simulated(&CancellationToken::new());
    let exec = shell_executor(&backends);
    assert!(!exec.stop());

    let status = exec.status();
    assert_eq!(status.status, "idle");
    assert!(!status.is_running);
    assert!(status.execution_id.is_none());
}

#[tokio::test]
async fn post_run_hook_stops_the_base() {
    let cancel = CancellationToken::new();
    let backends = Backends::simulated(&cancel);
    backends
        .base
        .set_velocity(0.2, 0.0, 0.0, crate::command::Frame::Local)
        .await
        .unwrap();
    assert!(backends.base.get_state().await.unwrap().moving);

    let exec = shell_executor(&backends);
    exec.execute("true", None, None).unwrap();
    wait_done(&exec, 10).await;

    // The safety floor runs on every exit path.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if !backends.base.get_state().await.unwrap().moving {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "base never stopped");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn requested_timeout_is_capped_by_the_maximum() {
    let backends = Backends::simulated(&CancellationToken::new());
    let exec = CodeExecutor::new(
        ExecutorConfig {
            interpreter: "sh".to_owned(),
            default_timeout: Duration::from_secs(10),
            max_timeout: Duration::from_millis(200),
            gateway_url: "http://127.0.0.1:0".to_owned(),
            wrap_sdk: false,
        },
        backends.clone(),
    );

    // Asks for an hour; the cap turns this into a fast timeout.
    exec.execute("sleep 30", Some(Duration::from_secs(3600)), None).unwrap();
    let rec = wait_done(&exec, 10).await;
    assert_eq!(rec.state, ExecutionState::Timeout);
}

#[test]
fn prelude_wires_the_sdk_entry_point() {
    assert!(PRELUDE.contains("class Robot"));
    assert!(PRELUDE.contains("robot = Robot()"));
    assert!(PRELUDE.contains("ROBOGATE_LEASE"));
}
