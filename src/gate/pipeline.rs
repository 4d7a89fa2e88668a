//! Gate pipeline: per-request orchestration of bypass, identity, rate
//! limit, and entitlement checks.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::config::GateConfig;

use super::store::{Decision, GateStore};

/// Why a request was denied. Transport-agnostic; the HTTP layer maps each
/// reason to a status code and retry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No identity header or query parameter was supplied
    MissingIdentity,
    /// The sliding window or an active ban rejected the request
    RateLimited {
        /// How long the caller should back off
        retry_after: Duration,
    },
    /// The identity has no open entitlement; the caller should resend the
    /// ready signal and retry
    GateClosed,
    /// The backing store failed or timed out; the gate fails closed
    StoreUnavailable,
}

/// The gate's verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the request to the protected pipeline unchanged
    Forward,
    /// Reject the request with the given reason
    Deny(DenyReason),
}

/// Per-request orchestrator over the gate store.
///
/// Owns the store exclusively; nothing else mutates gate state except the
/// ready signal, which goes through [`GatePipeline::signal_ready`].
pub struct GatePipeline {
    config: GateConfig,
    store: Arc<dyn GateStore>,
}

/// Outcome of a ready signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The gate was reset; carries the granted TTL in seconds
    Accepted { ttl_sec: u64 },
    /// The provided secret did not match the shared secret
    Unauthorized,
    /// The identity key was empty
    InvalidRequest,
    /// The backing store failed or timed out
    StoreUnavailable,
}

impl GatePipeline {
    /// Create a new pipeline over the given store.
    pub fn new(config: GateConfig, store: Arc<dyn GateStore>) -> Self {
        Self { config, store }
    }

    /// The gate policy this pipeline enforces.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// The underlying store. Used by the health endpoint for its ping.
    pub fn store(&self) -> &Arc<dyn GateStore> {
        &self.store
    }

    /// Evaluate one request: bypass check, then identity, then rate limit,
    /// then entitlement, stopping at the first deny. Store failures at any
    /// step deny with `StoreUnavailable` rather than failing open.
    pub async fn evaluate(&self, path: &str, identity: Option<&str>) -> Verdict {
        if self.config.is_bypass(path) {
            trace!(path = %path, "Bypass path, skipping gate");
            return Verdict::Forward;
        }

        let Some(key) = identity else {
            debug!(path = %path, "Request without identity denied");
            return Verdict::Deny(DenyReason::MissingIdentity);
        };

        match self.store.allow(key).await {
            Ok(Decision::Allowed) => {}
            Ok(Decision::Denied { retry_after }) => {
                debug!(
                    key = %key,
                    path = %path,
                    retry_after_sec = retry_after.as_secs(),
                    "Request rate limited"
                );
                return Verdict::Deny(DenyReason::RateLimited { retry_after });
            }
            Err(e) => {
                error!(key = %key, error = %e, "Rate limit check failed, failing closed");
                return Verdict::Deny(DenyReason::StoreUnavailable);
            }
        }

        match self.store.is_open(key).await {
            Ok(true) => Verdict::Forward,
            Ok(false) => {
                debug!(key = %key, path = %path, "Entitlement closed");
                Verdict::Deny(DenyReason::GateClosed)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Entitlement check failed, failing closed");
                Verdict::Deny(DenyReason::StoreUnavailable)
            }
        }
    }

    /// Handle a ready signal, the only operation that opens the gate. The
    /// secret must match and the key must be non-empty after trimming.
    pub async fn signal_ready(&self, provided_secret: &str, key: &str) -> SignalOutcome {
        if provided_secret != self.config.boot_secret {
            warn!("Ready signal rejected, secret mismatch");
            return SignalOutcome::Unauthorized;
        }

        let key = key.trim();
        if key.is_empty() {
            warn!("Ready signal rejected, empty identity key");
            return SignalOutcome::InvalidRequest;
        }

        match self.store.reset(key).await {
            Ok(ttl_sec) => {
                debug!(key = %key, ttl_sec = ttl_sec, "Entitlement reset");
                SignalOutcome::Accepted { ttl_sec }
            }
            Err(e) => {
                error!(key = %key, error = %e, "Entitlement reset failed");
                SignalOutcome::StoreUnavailable
            }
        }
    }
}
