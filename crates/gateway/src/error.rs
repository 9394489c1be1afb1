// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the gateway API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayError {
    BackendUnavailable,
    InvalidArgument,
    SafetyViolation,
    NotHolder,
    LeaseExpired,
    Busy,
    DependencyNotRunning,
    Timeout,
    Internal,
}

impl GatewayError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BackendUnavailable => 503,
            Self::InvalidArgument => 400,
            Self::SafetyViolation => 422,
            Self::NotHolder | Self::LeaseExpired => 403,
            Self::Busy | Self::DependencyNotRunning => 409,
            Self::Timeout => 504,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BackendUnavailable => "backend_unavailable",
            Self::InvalidArgument => "invalid_argument",
            Self::SafetyViolation => "safety_violation",
            Self::NotHolder => "not_holder",
            Self::LeaseExpired => "lease_expired",
            Self::Busy => "busy",
            Self::DependencyNotRunning => "dependency_not_running",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for GatewayError {}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// A gateway error paired with its human-readable message.
///
/// Command handlers return this so the HTTP layer can render the envelope
/// without each handler building responses by hand.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: GatewayError,
    pub message: String,
}

impl ApiError {
    pub fn new(code: GatewayError, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Internal failure: logs the cause with a correlation id and returns an
    /// opaque 500 so stack traces never reach the client.
    pub fn internal(err: impl fmt::Display) -> Self {
        let correlation = uuid::Uuid::new_v4();
        tracing::error!(%correlation, err = %err, "internal error");
        Self::new(GatewayError::Internal, format!("internal error ({correlation})"))
    }
}

impl From<GatewayError> for ApiError {
    fn from(code: GatewayError) -> Self {
        let message = code.as_str().to_owned();
        Self { code, message }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        self.code.to_http_response(self.message).into_response()
    }
}
