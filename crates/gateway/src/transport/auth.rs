// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease enforcement for mutating endpoints.
//!
//! The lease token is a capability, not an identity: whoever presents the
//! current token in `X-Lease-Id` may command the robot. Comparison happens
//! inside the coordinator, in constant time.

use axum::http::HeaderMap;

use crate::error::{ApiError, GatewayError};
use crate::state::GatewayState;

pub const LEASE_HEADER: &str = "x-lease-id";

/// Authorize a mutating request. Returns the presented token so handlers
/// can forward it (the code executor hands it to the child SDK).
pub fn require_lease(state: &GatewayState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = headers
        .get(LEASE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(GatewayError::NotHolder, "missing X-Lease-Id header"))?;
    state
        .lease
        .authorize(token)
        .map_err(|code| ApiError::new(code, "lease token does not match the current holder"))?;
    Ok(token.to_owned())
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
