// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the gateway.

pub mod auth;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::GatewayState;

/// Build the axum `Router` with all gateway routes.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        // Read-only surface
        .route("/health", get(http::health))
        .route("/state", get(http::get_state))
        .route("/trajectory", get(http::get_trajectory))
        // Lease coordination
        .route("/lease/acquire", post(http::lease_acquire))
        .route("/lease/release", post(http::lease_release))
        .route("/lease/extend", post(http::lease_extend))
        .route("/lease/status", get(http::lease_status))
        // Commands (lease header enforced in handlers)
        .route("/cmd/arm/move", post(http::arm_move))
        .route("/cmd/arm/stop", post(http::arm_stop))
        .route("/cmd/base/move", post(http::base_move))
        .route("/cmd/base/stop", post(http::base_stop))
        .route("/cmd/gripper", post(http::gripper_command))
        // Rewind
        .route("/rewind/steps", post(http::rewind_steps))
        .route("/rewind/percentage", post(http::rewind_percentage))
        .route("/rewind/stop", post(http::rewind_stop))
        .route("/rewind/status", get(http::rewind_status))
        .route("/rewind/config", get(http::rewind_config_get).put(http::rewind_config_put))
        // Code execution
        .route("/code/execute", post(http::code_execute))
        .route("/code/stop", post(http::code_stop))
        .route("/code/status", get(http::code_status))
        .route("/code/result", get(http::code_result))
        // Services
        .route("/services", get(http::services_list))
        .route("/services/{key}", get(http::services_get))
        .route("/services/{key}/start", post(http::services_start))
        .route("/services/{key}/stop", post(http::services_stop))
        .route("/services/{key}/restart", post(http::services_restart))
        .route("/services/{key}/logs", get(http::services_logs))
        // WebSockets
        .route("/ws/state", get(ws::ws_state))
        .route("/ws/feedback", get(ws::ws_feedback))
        .route("/ws/cameras", get(ws::ws_cameras))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
