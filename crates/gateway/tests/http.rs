// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the gateway HTTP API.
//!
//! Uses `axum_test::TestServer` against the fully simulated gateway — no
//! real TCP and no real robot needed.

use std::sync::Arc;

use axum_test::TestServer;
use clap::Parser;
use serde_json::json;

use robogate::config::GatewayConfig;
use robogate::state::GatewayState;
use robogate::transport::build_router;

fn test_config() -> GatewayConfig {
    GatewayConfig::parse_from([
        "robogate",
        "--dry-run",
        "--arm-poll-ms",
        "5",
        "--base-poll-ms",
        "5",
        "--gripper-poll-ms",
        "5",
        "--publish-ms",
        "5",
    ])
}

fn test_state() -> Arc<GatewayState> {
    GatewayState::simulated(test_config())
}

fn test_server(state: Arc<GatewayState>) -> TestServer {
    TestServer::new(build_router(state)).expect("failed to create test server")
}

async fn acquire(server: &TestServer, holder: &str) -> String {
    let resp = server.post("/lease/acquire").json(&json!({"holder": holder})).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "granted");
    body["lease_id"].as_str().expect("lease_id missing").to_owned()
}

#[tokio::test]
async fn health_reports_backends_and_lease() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state));

    let resp = server.get("/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["backends"]["arm"], true);
    assert_eq!(body["backends"]["cameras"], true);
    assert_eq!(body["lease"]["queue_length"], 0);
    Ok(())
}

#[tokio::test]
async fn lease_acquire_extend_release_lifecycle() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(state);

    let lease_id = acquire(&server, "a").await;

    let resp = server.post("/lease/extend").json(&json!({"lease_id": lease_id})).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "extended");

    let resp = server.post("/lease/release").json(&json!({"lease_id": lease_id})).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "released");

    // The old token no longer extends.
    let resp = server.post("/lease/extend").json(&json!({"lease_id": lease_id})).await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "not_holder");
    Ok(())
}

#[tokio::test]
async fn queue_promotion_after_release() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(state);

    let a = acquire(&server, "a").await;

    let resp = server.post("/lease/acquire").json(&json!({"holder": "b"})).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "queued");
    assert_eq!(body["position"], 1);

    server.post("/lease/release").json(&json!({"lease_id": a})).await.assert_status_ok();

    let resp = server.get("/lease/status").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["holder"], "b");
    assert_eq!(body["queue_length"], 0);

    // b recovers its token idempotently.
    let resp = server.post("/lease/acquire").json(&json!({"holder": "b"})).await;
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "granted");
    Ok(())
}

#[tokio::test]
async fn lease_status_never_leaks_the_token() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(state);
    let lease_id = acquire(&server, "secretive").await;

    let resp = server.get("/lease/status").await;
    resp.assert_status_ok();
    assert!(!resp.text().contains(&lease_id), "token leaked in /lease/status");

    let resp = server.get("/health").await;
    assert!(!resp.text().contains(&lease_id), "token leaked in /health");
    Ok(())
}

#[tokio::test]
async fn commands_require_the_lease_header() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(state);

    let resp = server
        .post("/cmd/arm/move")
        .json(&json!({"mode": "joint_position", "values": [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]}))
        .await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "not_holder");
    Ok(())
}

#[tokio::test]
async fn safety_reject_makes_no_adapter_call_and_records_nothing() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state));
    let lease_id = acquire(&server, "a").await;
    let sim = state.backends.sim.as_ref().expect("sim backends");
    let before = sim.command_count();

    let resp = server
        .post("/cmd/arm/move")
        .add_header("x-lease-id", lease_id.as_str())
        .json(&json!({"mode": "cartesian_pose", "values": [0.2, 0.0, 5.0, 0.0, 0.0, 0.0, 1.0]}))
        .await;
    resp.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "safety_violation");
    assert_eq!(body["error"]["message"], "safety:z_out_of_bounds");

    assert_eq!(sim.command_count(), before, "rejected command must not reach the adapter");
    let resp = server.get("/trajectory").await;
    let body: serde_json::Value = resp.json();
    assert_eq!(body["count"], 0);
    Ok(())
}

#[tokio::test]
async fn accepted_arm_move_is_recorded() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state));
    let lease_id = acquire(&server, "a").await;

    let resp = server
        .post("/cmd/arm/move")
        .add_header("x-lease-id", lease_id.as_str())
        .json(&json!({"mode": "joint_position", "values": [0.1, 0.1, 0.1, -0.5, 0.1, 0.5, 0.1]}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "completed");

    let resp = server.get("/trajectory").await;
    let body: serde_json::Value = resp.json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["waypoints"][0]["kind"], "arm_joint");
    assert_eq!(body["waypoints"][0]["source"], "command");
    Ok(())
}

#[tokio::test]
async fn unknown_mode_is_invalid_argument() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(state);
    let lease_id = acquire(&server, "a").await;

    let resp = server
        .post("/cmd/arm/move")
        .add_header("x-lease-id", lease_id.as_str())
        .json(&json!({"mode": "warp_drive", "values": []}))
        .await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "invalid_argument");
    Ok(())
}

#[tokio::test]
async fn base_velocity_is_clamped_and_pose_recorded() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state));
    let lease_id = acquire(&server, "a").await;

    let resp = server
        .post("/cmd/base/move")
        .add_header("x-lease-id", lease_id.as_str())
        .json(&json!({"vx": 5.0, "vy": 0.0, "wz": 0.0}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["clamped"], true);

    let resp = server
        .post("/cmd/base/move")
        .add_header("x-lease-id", lease_id.as_str())
        .json(&json!({"x": 0.5, "y": 0.2, "theta": 1.0}))
        .await;
    resp.assert_status_ok();

    let resp = server.get("/trajectory").await;
    let body: serde_json::Value = resp.json();
    // Velocity commands are not waypoints; the pose is.
    assert_eq!(body["count"], 1);
    assert_eq!(body["waypoints"][0]["kind"], "base_pose");
    Ok(())
}

#[tokio::test]
async fn gripper_command_records_resulting_width() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state));
    let lease_id = acquire(&server, "a").await;

    let resp = server
        .post("/cmd/gripper")
        .add_header("x-lease-id", lease_id.as_str())
        .json(&json!({"action": "close"}))
        .await;
    resp.assert_status_ok();

    let resp = server.get("/trajectory").await;
    let body: serde_json::Value = resp.json();
    assert_eq!(body["count"], 1);
    assert_eq!(body["waypoints"][0]["kind"], "gripper_width");
    assert_eq!(body["waypoints"][0]["payload"], 0.0);
    Ok(())
}

#[tokio::test]
async fn dry_run_rewind_visits_reversed_targets() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state));
    let lease_id = acquire(&server, "a").await;

    for v in [0.0, 0.1, 0.2, 0.3] {
        let resp = server
            .post("/cmd/arm/move")
            .add_header("x-lease-id", lease_id.as_str())
            .json(&json!({"mode": "joint_position", "values": [v, 0.0, 0.0, -0.5, 0.0, 0.5, 0.0]}))
            .await;
        resp.assert_status_ok();
    }

    // Short chunks so the timed dry run returns quickly.
    server
        .put("/rewind/config")
        .json(&json!({"chunk_duration_s": 0.02, "settle_time_s": 0.0}))
        .await
        .assert_status_ok();

    let resp = server
        .post("/rewind/steps")
        .add_header("x-lease-id", lease_id.as_str())
        .json(&json!({"steps": 3, "dry_run": true}))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["steps_rewound"], 3);

    let first: Vec<f64> =
        serde_json::from_value(body["trace"][0]["payload"].clone())?;
    let last: Vec<f64> = serde_json::from_value(body["trace"][2]["payload"].clone())?;
    assert_eq!(first[0], 0.3);
    assert_eq!(last[0], 0.1);

    // Dry runs leave the trajectory untouched.
    let resp = server.get("/trajectory").await;
    let body: serde_json::Value = resp.json();
    assert_eq!(body["count"], 4);
    Ok(())
}

#[tokio::test]
async fn rewind_status_and_config_roundtrip() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(state);

    let resp = server.get("/rewind/status").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["is_rewinding"], false);

    let resp = server.get("/rewind/config").await;
    let mut config: serde_json::Value = resp.json();
    assert_eq!(config["stream_hz"], 50);

    config["chunk_size"] = json!(4);
    let resp = server.put("/rewind/config").json(&config).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["chunk_size"], 4);
    Ok(())
}

#[tokio::test]
async fn rewind_requires_lease() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(state);
    let resp = server.post("/rewind/steps").json(&json!({"steps": 1})).await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn code_endpoints_idle_lifecycle() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(state);

    let resp = server.get("/code/status").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "idle");
    assert_eq!(body["is_running"], false);

    let resp = server.get("/code/result").await;
    let body: serde_json::Value = resp.json();
    assert!(body["result"].is_null());

    // Mutations are lease-gated.
    let resp = server.post("/code/execute").json(&json!({"code": "print(1)"})).await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);

    let lease_id = acquire(&server, "a").await;
    let resp = server.post("/code/stop").add_header("x-lease-id", lease_id.as_str()).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["stopped"], false);
    Ok(())
}

#[tokio::test]
async fn services_endpoints_require_a_supervisor() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(state);

    let resp = server.get("/services").await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let resp = server.post("/services/base_server/start").await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn one_backend_down_leaves_the_rest_serving() -> anyhow::Result<()> {
    let state = test_state();
    let server = test_server(Arc::clone(&state));
    let sim = state.backends.sim.as_ref().expect("sim backends").clone();

    sim.set_base_connected(false);

    let resp = server.get("/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["backends"]["base"], false);
    assert_eq!(body["backends"]["arm"], true);

    // /state keeps serving.
    let resp = server.get("/state").await;
    resp.assert_status_ok();

    // And commands to healthy backends still work.
    let lease_id = acquire(&server, "a").await;
    let resp = server
        .post("/cmd/gripper")
        .add_header("x-lease-id", lease_id.as_str())
        .json(&json!({"action": "open"}))
        .await;
    resp.assert_status_ok();

    // While the downed backend reports unavailable.
    let resp = server
        .post("/cmd/base/move")
        .add_header("x-lease-id", lease_id.as_str())
        .json(&json!({"x": 0.1, "y": 0.0, "theta": 0.0}))
        .await;
    resp.assert_status(axum::http::StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "backend_unavailable");
    Ok(())
}
