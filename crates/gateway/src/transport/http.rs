// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the gateway API.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::backend::AdapterError;
use crate::command::{ArmMove, BaseMove, Command, GripperAction, GripperCommand};
use crate::config::RewindConfig;
use crate::error::{ApiError, GatewayError};
use crate::executor::ExecutionRecord;
use crate::lease::AcquireOutcome;
use crate::rewind::{RewindOutcome, RewindScope};
use crate::safety::{validate, Verdict};
use crate::state::{CommandStatus, GatewayState};
use crate::trajectory::{Waypoint, WaypointData, WaypointSource};

use super::auth::require_lease;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub backends: BTreeMap<String, bool>,
    pub lease: HealthLease,
}

#[derive(Debug, Serialize)]
pub struct HealthLease {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    pub queue_length: usize,
}

#[derive(Debug, Serialize)]
pub struct TrajectoryResponse {
    pub count: usize,
    pub waypoints: Vec<Waypoint>,
}

#[derive(Debug, Deserialize)]
pub struct AcquireRequest {
    pub holder: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AcquireResponse {
    Granted { status: &'static str, lease_id: String },
    Queued { status: &'static str, ticket_id: String, position: usize },
}

#[derive(Debug, Deserialize)]
pub struct LeaseTokenRequest {
    pub lease_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LeaseStatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_s: Option<f64>,
    pub queue_length: usize,
    pub queue: Vec<crate::lease::QueuePosition>,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clamped: Option<bool>,
}

impl CommandResponse {
    fn completed(clamped: bool) -> Json<Self> {
        Json(Self { status: "completed", clamped: clamped.then_some(true) })
    }
}

#[derive(Debug, Deserialize)]
pub struct RewindStepsRequest {
    pub steps: usize,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
pub struct RewindPercentageRequest {
    pub percentage: f64,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    /// Timeout in seconds; clamped to the configured maximum.
    #[serde(default)]
    pub timeout: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub execution_id: String,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub stopped: bool,
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub result: Option<ExecutionRecord>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_lines")]
    pub lines: usize,
}

fn default_log_lines() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub key: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CascadeResponse {
    pub stopped: Vec<String>,
}

// -- Helpers ------------------------------------------------------------------

fn adapter_err(e: AdapterError) -> ApiError {
    let code = match &e {
        AdapterError::Timeout => GatewayError::Timeout,
        AdapterError::WrongMode(_) => GatewayError::InvalidArgument,
        _ => GatewayError::BackendUnavailable,
    };
    ApiError::new(code, e.to_string())
}

fn parse_body<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::new(GatewayError::InvalidArgument, e.to_string()))
}

/// Run the envelope and split the verdict into (command, clamped) or the
/// rejection. Rejections produce no side effects.
fn enveloped(state: &GatewayState, cmd: Command) -> Result<(Command, bool), ApiError> {
    let verdict = {
        let cfg = state.safety.read();
        validate(&cmd, &cfg)
    };
    match verdict {
        Verdict::Ok => Ok((cmd, false)),
        Verdict::Clamped(clamped) => Ok((clamped, true)),
        Verdict::Reject(reason) => {
            state.emit(cmd.label(), CommandStatus::Failed, Some(reason.clone()));
            Err(ApiError::new(GatewayError::SafetyViolation, reason))
        }
    }
}

// -- Read-only handlers -------------------------------------------------------

/// `GET /health`
pub async fn health(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    let backends = s
        .backends
        .status_map()
        .into_iter()
        .map(|(k, v)| (k, v.connected))
        .collect();
    Json(HealthResponse {
        status: "running".to_owned(),
        backends,
        lease: HealthLease { holder: s.lease.holder(), queue_length: s.lease.queue_length() },
    })
}

/// `GET /state`
pub async fn get_state(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    let snapshot = s.aggregator.latest();
    Json((*snapshot).clone())
}

/// `GET /trajectory`
pub async fn get_trajectory(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    let waypoints = s.recorder.snapshot();
    Json(TrajectoryResponse { count: waypoints.len(), waypoints })
}

// -- Lease handlers -----------------------------------------------------------

/// `POST /lease/acquire`
pub async fn lease_acquire(
    State(s): State<Arc<GatewayState>>,
    Json(req): Json<AcquireRequest>,
) -> Result<Json<AcquireResponse>, ApiError> {
    let holder = req.holder.trim();
    if holder.is_empty() {
        return Err(ApiError::new(GatewayError::InvalidArgument, "holder must be non-empty"));
    }
    match s.lease.acquire(holder) {
        AcquireOutcome::Granted { lease_id } => {
            Ok(Json(AcquireResponse::Granted { status: "granted", lease_id }))
        }
        AcquireOutcome::Queued { ticket_id, position } => Ok(Json(AcquireResponse::Queued {
            status: "queued",
            ticket_id: ticket_id.to_string(),
            position,
        })),
    }
}

/// `POST /lease/release`
pub async fn lease_release(
    State(s): State<Arc<GatewayState>>,
    Json(req): Json<LeaseTokenRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    s.lease
        .release(&req.lease_id)
        .map_err(|code| ApiError::new(code, "lease token does not match the current holder"))?;
    Ok(Json(StatusResponse { status: "released" }))
}

/// `POST /lease/extend`
pub async fn lease_extend(
    State(s): State<Arc<GatewayState>>,
    Json(req): Json<LeaseTokenRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    s.lease
        .extend(&req.lease_id)
        .map_err(|code| ApiError::new(code, "lease token does not match the current holder"))?;
    Ok(Json(StatusResponse { status: "extended" }))
}

/// `GET /lease/status` — never contains the token.
pub async fn lease_status(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    let status = s.lease.status();
    Json(LeaseStatusResponse {
        holder: status.holder,
        remaining_s: status.remaining_idle_s,
        queue_length: status.queue_length,
        queue: status.queue,
    })
}

// -- Command handlers ---------------------------------------------------------

/// `POST /cmd/arm/move`
pub async fn arm_move(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<CommandResponse>, ApiError> {
    require_lease(&s, &headers)?;
    let mv: ArmMove = parse_body(body)?;
    let label = Command::Arm(mv.clone()).label();
    s.emit(label, CommandStatus::Accepted, None);

    let (cmd, clamped) = enveloped(&s, Command::Arm(mv))?;
    let Command::Arm(mv) = cmd else {
        return Err(ApiError::internal("envelope changed the command family"));
    };

    let result = async {
        s.backends.arm.set_mode(mv.mode()).await?;
        s.backends.arm.send(&mv)
    }
    .await;
    if let Err(e) = result {
        s.emit(label, CommandStatus::Failed, Some(e.to_string()));
        return Err(adapter_err(e));
    }

    match &mv {
        ArmMove::JointPosition(q) => {
            s.recorder.record(WaypointData::ArmJoint(*q), WaypointSource::Command);
        }
        ArmMove::CartesianPose(p) => {
            s.recorder.record(WaypointData::ArmCartesian(*p), WaypointSource::Command);
        }
        _ => {}
    }
    s.emit(label, CommandStatus::Completed, None);
    Ok(CommandResponse::completed(clamped))
}

/// `POST /cmd/arm/stop`
pub async fn arm_stop(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<CommandResponse>, ApiError> {
    require_lease(&s, &headers)?;
    s.backends.arm.stop().map_err(adapter_err)?;
    s.emit("arm/stop", CommandStatus::Completed, None);
    Ok(CommandResponse::completed(false))
}

/// `POST /cmd/base/move`
pub async fn base_move(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<CommandResponse>, ApiError> {
    require_lease(&s, &headers)?;
    let mv: BaseMove = parse_body(body)?;
    let label = Command::Base(mv.clone()).label();
    s.emit(label, CommandStatus::Accepted, None);

    let (cmd, clamped) = enveloped(&s, Command::Base(mv))?;
    let Command::Base(mv) = cmd else {
        return Err(ApiError::internal("envelope changed the command family"));
    };

    let result = match &mv {
        BaseMove::Pose(pose) => s.backends.base.move_to(*pose).await,
        BaseMove::Velocity { vx, vy, wz, frame } => {
            s.backends.base.set_velocity(*vx, *vy, *wz, *frame).await
        }
    };
    if let Err(e) = result {
        s.emit(label, CommandStatus::Failed, Some(e.to_string()));
        return Err(adapter_err(e));
    }

    if let BaseMove::Pose(pose) = &mv {
        s.recorder.record(WaypointData::BasePose(*pose), WaypointSource::Command);
    }
    s.emit(label, CommandStatus::Completed, None);
    Ok(CommandResponse::completed(clamped))
}

/// `POST /cmd/base/stop`
pub async fn base_stop(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<CommandResponse>, ApiError> {
    require_lease(&s, &headers)?;
    s.backends.base.stop().await.map_err(adapter_err)?;
    s.emit("base/stop", CommandStatus::Completed, None);
    Ok(CommandResponse::completed(false))
}

/// `POST /cmd/gripper`
pub async fn gripper_command(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<CommandResponse>, ApiError> {
    require_lease(&s, &headers)?;
    let cmd: GripperCommand = parse_body(body)?;
    s.emit("gripper", CommandStatus::Accepted, None);

    let (cmd, clamped) = enveloped(&s, Command::Gripper(cmd))?;
    let Command::Gripper(cmd) = cmd else {
        return Err(ApiError::internal("envelope changed the command family"));
    };

    let result = s.backends.gripper.command(&cmd).await;
    let gripper_state = match result {
        Ok(state) => state,
        Err(e) => {
            s.emit("gripper", CommandStatus::Failed, Some(e.to_string()));
            return Err(adapter_err(e));
        }
    };

    if matches!(
        cmd.action,
        GripperAction::Move | GripperAction::Open | GripperAction::Close | GripperAction::Grasp
    ) {
        s.recorder.record(WaypointData::GripperWidth(gripper_state.width), WaypointSource::Command);
    }
    s.emit("gripper", CommandStatus::Completed, None);
    Ok(CommandResponse::completed(clamped))
}

// -- Rewind handlers ----------------------------------------------------------

/// `POST /rewind/steps`
pub async fn rewind_steps(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<RewindStepsRequest>,
) -> Result<Json<RewindOutcome>, ApiError> {
    require_lease(&s, &headers)?;
    let outcome = s.rewind.rewind(RewindScope::Steps(req.steps), req.dry_run).await?;
    Ok(Json(outcome))
}

/// `POST /rewind/percentage`
pub async fn rewind_percentage(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<RewindPercentageRequest>,
) -> Result<Json<RewindOutcome>, ApiError> {
    require_lease(&s, &headers)?;
    let outcome = s.rewind.rewind(RewindScope::Percentage(req.percentage), req.dry_run).await?;
    Ok(Json(outcome))
}

/// `POST /rewind/stop`
pub async fn rewind_stop(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<StopResponse>, ApiError> {
    require_lease(&s, &headers)?;
    Ok(Json(StopResponse { stopped: s.rewind.stop() }))
}

/// `GET /rewind/status`
pub async fn rewind_status(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(s.rewind.status())
}

/// `GET /rewind/config`
pub async fn rewind_config_get(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(s.rewind.config())
}

/// `PUT /rewind/config`
pub async fn rewind_config_put(
    State(s): State<Arc<GatewayState>>,
    Json(config): Json<RewindConfig>,
) -> impl IntoResponse {
    s.rewind.set_config(config);
    Json(s.rewind.config())
}

// -- Code execution handlers --------------------------------------------------

/// `POST /code/execute`
pub async fn code_execute(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let lease = require_lease(&s, &headers)?;
    if req.code.trim().is_empty() {
        return Err(ApiError::new(GatewayError::InvalidArgument, "code must be non-empty"));
    }
    let timeout = match req.timeout {
        Some(secs) if secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(_) => {
            return Err(ApiError::new(GatewayError::InvalidArgument, "timeout must be positive"));
        }
        None => None,
    };
    let execution_id = s.executor.execute(&req.code, timeout, Some(&lease))?;
    Ok(Json(ExecuteResponse { success: true, execution_id }))
}

/// `POST /code/stop`
pub async fn code_stop(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Result<Json<StopResponse>, ApiError> {
    require_lease(&s, &headers)?;
    Ok(Json(StopResponse { stopped: s.executor.stop() }))
}

/// `GET /code/status`
pub async fn code_status(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(s.executor.status())
}

/// `GET /code/result`
pub async fn code_result(State(s): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(ResultResponse { result: s.executor.result() })
}

// -- Service handlers ---------------------------------------------------------

fn supervisor(s: &GatewayState) -> Result<&Arc<crate::supervisor::Supervisor>, ApiError> {
    s.supervisor
        .as_ref()
        .ok_or_else(|| ApiError::new(GatewayError::InvalidArgument, "service manager is disabled"))
}

/// `GET /services`
pub async fn services_list(
    State(s): State<Arc<GatewayState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(supervisor(&s)?.list().await))
}

/// `GET /services/{key}`
pub async fn services_get(
    State(s): State<Arc<GatewayState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match supervisor(&s)?.get(&key).await {
        Some(info) => Ok(Json(info)),
        None => Err(ApiError::new(GatewayError::InvalidArgument, format!("unknown service {key}"))),
    }
}

/// `POST /services/{key}/start`
pub async fn services_start(
    State(s): State<Arc<GatewayState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(supervisor(&s)?.start(&key).await?))
}

/// `POST /services/{key}/stop`
pub async fn services_stop(
    State(s): State<Arc<GatewayState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stopped = supervisor(&s)?.stop(&key).await?;
    Ok(Json(CascadeResponse { stopped }))
}

/// `POST /services/{key}/restart`
pub async fn services_restart(
    State(s): State<Arc<GatewayState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(supervisor(&s)?.restart(&key).await?))
}

/// `GET /services/{key}/logs?lines=`
pub async fn services_logs(
    State(s): State<Arc<GatewayState>>,
    Path(key): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    match supervisor(&s)?.get_logs(&key, query.lines).await {
        Some(lines) => Ok(Json(LogsResponse { key, lines })),
        None => Err(ApiError::new(GatewayError::InvalidArgument, format!("unknown service {key}"))),
    }
}
