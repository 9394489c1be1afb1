// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::*;

#[test]
fn defaults_parse_without_args() {
    let cfg = GatewayConfig::parse_from(["robogate"]);
    assert_eq!(cfg.port, 8800);
    assert!(!cfg.dry_run);
    assert!(!cfg.no_service_manager);
    assert_eq!(cfg.publish_interval(), Duration::from_millis(50));
    assert_eq!(cfg.lease_idle_timeout(), Duration::from_secs(120));
    assert_eq!(cfg.exec_timeout(), Duration::from_secs(300));
}

#[test]
fn flags_override_defaults() {
    let cfg = GatewayConfig::parse_from([
        "robogate",
        "--port",
        "9000",
        "--dry-run",
        "--lease-idle-s",
        "30",
    ]);
    assert_eq!(cfg.port, 9000);
    assert!(cfg.dry_run);
    assert_eq!(cfg.lease_idle_timeout(), Duration::from_secs(30));
}

#[test]
fn rewind_config_defaults_are_conservative() {
    let cfg = RewindConfig::default();
    assert_eq!(cfg.stream_hz, 50);
    assert_eq!(cfg.joint_tolerance_rad, 0.01);
    assert_eq!(cfg.cartesian_tolerance_m, 0.005);
    assert_eq!(cfg.stream_period(), Duration::from_millis(20));
}

#[test]
fn rewind_config_deserializes_with_partial_body() {
    let cfg: RewindConfig = serde_json::from_str(r#"{"chunk_size": 4}"#).unwrap();
    assert_eq!(cfg.chunk_size, 4);
    assert_eq!(cfg.stream_hz, 50);
}

#[test]
fn stream_period_survives_zero_hz() {
    let cfg = RewindConfig { stream_hz: 0, ..RewindConfig::default() };
    assert_eq!(cfg.stream_period(), Duration::from_secs(1));
}
