//! Store trait for abstracting in-memory and shared implementations.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Outcome of a rate limiter check for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is within the window limit and has been recorded.
    Allowed,
    /// The request is denied; the caller should back off at least this long.
    Denied {
        /// Remaining ban time, rounded down to whole seconds
        retry_after: Duration,
    },
}

/// Trait for gate state backends.
///
/// This trait abstracts over the in-process [`super::InMemoryStore`] and the
/// shared [`super::RedisStore`] so the pipeline and the signal handler can
/// work with either. Every method is atomic per key: two concurrent calls
/// for the same key observe each other's effects in lock (or round-trip)
/// acquisition order.
#[async_trait]
pub trait GateStore: Send + Sync {
    /// Open the entitlement gate for `key` for the configured TTL, replacing
    /// any prior expiry. Returns the granted TTL in seconds; the new expiry
    /// is always `now + ttl`, never an extension of the previous one.
    async fn reset(&self, key: &str) -> Result<u64>;

    /// Whether the entitlement gate is currently open for `key`. Absence of
    /// a record reads as closed; nothing is created on read.
    async fn is_open(&self, key: &str) -> Result<bool>;

    /// Run the sliding-window check for `key`: an active ban denies with
    /// the remaining time, a full window starts a fresh ban, and anything
    /// else records the request and allows it.
    async fn allow(&self, key: &str) -> Result<Decision>;

    /// Whether the backend is reachable. Used by the health endpoint only;
    /// gate decisions never consult this.
    async fn ping(&self) -> bool;
}
