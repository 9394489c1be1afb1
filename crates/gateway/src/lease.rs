// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exclusive-access lease coordinator.
//!
//! At most one lease is held at any instant. Contenders queue FIFO; the
//! holder is revoked on explicit release, idle timeout, TTL expiry, or
//! shutdown — exactly one of those paths fires per lease. The token is a
//! random capability, compared in constant time and never serialized into
//! status output.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use parking_lot::Mutex;
use rand::RngCore;
use serde::Serialize;
use tokio::sync::Notify;
// Tokio's clock (not std) so deadlines respect a paused test clock.
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::GatewayError;

/// Why a lease went away, for logging and the feedback stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    Released,
    IdleTimeout,
    TtlExpired,
    Shutdown,
}

/// Result of an acquire call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted { lease_id: String },
    Queued { ticket_id: Uuid, position: usize },
}

/// Public view of the coordinator. The token is deliberately absent.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseStatus {
    pub holder: Option<String>,
    pub remaining_idle_s: Option<f64>,
    pub remaining_ttl_s: Option<f64>,
    pub queue_length: usize,
    pub queue: Vec<QueuePosition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueuePosition {
    pub position: usize,
    pub holder: String,
}

struct HeldLease {
    token: String,
    holder: String,
    granted_at: Instant,
    last_activity: Instant,
    /// Ticket this grant satisfied, if the holder came through the queue.
    ticket: Option<Uuid>,
}

struct QueueEntry {
    ticket: Uuid,
    holder: String,
    enqueued_at: Instant,
    granted: Arc<Notify>,
}

struct LeaseInner {
    held: Option<HeldLease>,
    queue: VecDeque<QueueEntry>,
    /// Token most recently revoked by the background paths (idle, TTL,
    /// shutdown), so its presenter gets `lease_expired` instead of a bare
    /// `not_holder`. Explicit release is not recorded here: the releaser
    /// knows the lease is gone.
    last_revoked: Option<String>,
}

/// Single-holder lease coordinator with FIFO queue and background revoker.
pub struct LeaseCoordinator {
    inner: Mutex<LeaseInner>,
    /// Pinged whenever deadlines change so the revoker re-arms.
    changed: Notify,
    ttl: Duration,
    idle_timeout: Duration,
}

impl LeaseCoordinator {
    pub fn new(ttl: Duration, idle_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(LeaseInner { held: None, queue: VecDeque::new(), last_revoked: None }),
            changed: Notify::new(),
            ttl,
            idle_timeout,
        }
    }

    /// Acquire the lease for `holder`, or join the queue.
    ///
    /// Re-acquiring while already the holder returns the same token and
    /// resets the idle timer; re-acquiring while already queued returns the
    /// existing ticket.
    pub fn acquire(&self, holder: &str) -> AcquireOutcome {
        let mut inner = self.inner.lock();
        if let Some(held) = &mut inner.held {
            if held.holder == holder {
                held.last_activity = Instant::now();
                let lease_id = held.token.clone();
                drop(inner);
                self.changed.notify_one();
                return AcquireOutcome::Granted { lease_id };
            }
            if let Some(pos) = inner.queue.iter().position(|e| e.holder == holder) {
                let ticket_id = inner.queue[pos].ticket;
                return AcquireOutcome::Queued { ticket_id, position: pos + 1 };
            }
            let ticket = Uuid::new_v4();
            inner.queue.push_back(QueueEntry {
                ticket,
                holder: holder.to_owned(),
                enqueued_at: Instant::now(),
                granted: Arc::new(Notify::new()),
            });
            let position = inner.queue.len();
            tracing::info!(holder, position, "lease contender queued");
            return AcquireOutcome::Queued { ticket_id: ticket, position };
        }

        let token = Self::grant(&mut inner, holder.to_owned(), None);
        drop(inner);
        self.changed.notify_one();
        tracing::info!(holder, "lease granted");
        AcquireOutcome::Granted { lease_id: token }
    }

    /// Release the lease. Only the current token releases; the head of the
    /// queue (if any) is promoted immediately.
    pub fn release(&self, lease_id: &str) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock();
        self.check_token(&inner, lease_id)?;
        let holder = inner.held.take().map(|h| h.holder);
        tracing::info!(holder = holder.as_deref().unwrap_or(""), "lease released");
        Self::promote(&mut inner);
        drop(inner);
        self.changed.notify_one();
        Ok(())
    }

    /// Reset the idle timer for the current holder.
    pub fn extend(&self, lease_id: &str) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock();
        self.check_token(&inner, lease_id)?;
        if let Some(held) = &mut inner.held {
            held.last_activity = Instant::now();
        }
        drop(inner);
        self.changed.notify_one();
        Ok(())
    }

    /// Authorize a mutating command. Success counts as holder activity.
    pub fn authorize(&self, lease_id: &str) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock();
        self.check_token(&inner, lease_id)?;
        if let Some(held) = &mut inner.held {
            held.last_activity = Instant::now();
        }
        drop(inner);
        self.changed.notify_one();
        Ok(())
    }

    /// Remove a queued contender. Returns false for unknown tickets.
    pub fn cancel_ticket(&self, ticket: Uuid) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.queue.len();
        inner.queue.retain(|e| e.ticket != ticket);
        before != inner.queue.len()
    }

    /// Wait until the given ticket is granted, returning its lease id.
    /// Returns `None` if the ticket was cancelled.
    pub async fn wait_granted(&self, ticket: Uuid) -> Option<String> {
        loop {
            let granted = {
                let inner = self.inner.lock();
                if let Some(held) = &inner.held {
                    if held.ticket == Some(ticket) {
                        return Some(held.token.clone());
                    }
                }
                match inner.queue.iter().find(|e| e.ticket == ticket) {
                    Some(entry) => Arc::clone(&entry.granted),
                    None => return None,
                }
            };
            granted.notified().await;
        }
    }

    /// Current holder and queue, without the token.
    pub fn status(&self) -> LeaseStatus {
        let inner = self.inner.lock();
        let now = Instant::now();
        let (holder, remaining_idle_s, remaining_ttl_s) = match &inner.held {
            Some(h) => (
                Some(h.holder.clone()),
                Some(remaining_s(h.last_activity + self.idle_timeout, now)),
                Some(remaining_s(h.granted_at + self.ttl, now)),
            ),
            None => (None, None, None),
        };
        let queue = inner
            .queue
            .iter()
            .enumerate()
            .map(|(i, e)| QueuePosition { position: i + 1, holder: e.holder.clone() })
            .collect::<Vec<_>>();
        LeaseStatus { holder, remaining_idle_s, remaining_ttl_s, queue_length: queue.len(), queue }
    }

    pub fn holder(&self) -> Option<String> {
        self.inner.lock().held.as_ref().map(|h| h.holder.clone())
    }

    pub fn queue_length(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Forcibly revoke whatever is held (shutdown path). The queue is
    /// drained too: a gateway going down grants nothing further.
    pub fn revoke_all(&self) {
        let mut inner = self.inner.lock();
        if let Some(held) = inner.held.take() {
            tracing::info!(holder = %held.holder, reason = ?RevokeReason::Shutdown, "lease revoked");
            inner.last_revoked = Some(held.token);
        }
        inner.queue.clear();
        drop(inner);
        self.changed.notify_one();
    }

    /// Run the revocation loop until `cancel` fires.
    ///
    /// Sleeps until the earlier of the TTL and idle deadlines, then revokes
    /// only if that deadline is still in the past once the lock is re-taken
    /// (an extend or release in the meantime wins).
    pub async fn run_revoker(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let deadline = {
                let inner = self.inner.lock();
                inner.held.as_ref().map(|h| {
                    let ttl_at = h.granted_at + self.ttl;
                    let idle_at = h.last_activity + self.idle_timeout;
                    ttl_at.min(idle_at)
                })
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.changed.notified() => continue,
                        _ = tokio::time::sleep_until(at) => {
                            self.revoke_if_expired();
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.changed.notified() => continue,
                    }
                }
            }
        }
    }

    fn revoke_if_expired(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let Some(held) = inner.held.take() else { return };
        let reason = if now >= held.granted_at + self.ttl {
            RevokeReason::TtlExpired
        } else if now >= held.last_activity + self.idle_timeout {
            RevokeReason::IdleTimeout
        } else {
            // Extended while we were waking up.
            inner.held = Some(held);
            return;
        };
        tracing::info!(holder = %held.holder, ?reason, "lease revoked");
        inner.last_revoked = Some(held.token);
        Self::promote(&mut inner);
        drop(inner);
        self.changed.notify_one();
    }

    /// Grant to the head of the queue, if any. Caller holds the lock.
    fn promote(inner: &mut LeaseInner) {
        if let Some(entry) = inner.queue.pop_front() {
            let waited = entry.enqueued_at.elapsed();
            tracing::info!(holder = %entry.holder, ?waited, "lease promoted from queue");
            let notify = Arc::clone(&entry.granted);
            Self::grant(inner, entry.holder, Some(entry.ticket));
            notify.notify_one();
        }
    }

    fn grant(inner: &mut LeaseInner, holder: String, ticket: Option<Uuid>) -> String {
        let token = mint_token();
        let now = Instant::now();
        inner.held = Some(HeldLease {
            token: token.clone(),
            holder,
            granted_at: now,
            last_activity: now,
            ticket,
        });
        token
    }

    fn check_token(&self, inner: &LeaseInner, presented: &str) -> Result<(), GatewayError> {
        match &inner.held {
            Some(held) if constant_time_eq(presented, &held.token) => Ok(()),
            _ => {
                if inner.last_revoked.as_deref().is_some_and(|t| constant_time_eq(presented, t)) {
                    Err(GatewayError::LeaseExpired)
                } else {
                    Err(GatewayError::NotHolder)
                }
            }
        }
    }
}

fn remaining_s(deadline: Instant, now: Instant) -> f64 {
    deadline.saturating_duration_since(now).as_secs_f64()
}

/// Mint an unforgeable lease token: 32 random bytes, URL-safe base64.
fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
