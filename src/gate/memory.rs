//! In-process gate store.
//!
//! Holds both policy maps in `DashMap`s keyed by identity. Rate windows are
//! wrapped in a per-key `parking_lot::Mutex` so the four-step check runs as
//! one atomic unit per key; entitlements are a plain map of expiry instants
//! since reset and read are each a single map operation.
//!
//! Valid for a single process instance only. Multi-instance deployments
//! must use [`super::RedisStore`], or each instance sees its own state.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::GateConfig;
use crate::error::Result;

use super::store::{Decision, GateStore};

/// Per-key sliding window state.
#[derive(Debug, Default)]
struct Window {
    /// Timestamps of requests within the current window, oldest first
    hits: VecDeque<Instant>,
    /// End of the active ban, if any
    ban_until: Option<Instant>,
}

/// Gate store backed by in-process concurrent maps.
pub struct InMemoryStore {
    /// Entitlement expiry per identity
    entitlements: DashMap<String, Instant>,
    /// Sliding window per identity
    windows: DashMap<String, Mutex<Window>>,
    ready_ttl: Duration,
    window: Duration,
    limit: usize,
    ban: Duration,
}

impl InMemoryStore {
    /// Create a new store with the given gate policy.
    pub fn new(config: &GateConfig) -> Self {
        Self {
            entitlements: DashMap::new(),
            windows: DashMap::new(),
            ready_ttl: Duration::from_secs(config.ready_ttl_sec),
            window: Duration::from_secs(config.window_sec),
            limit: config.limit,
            ban: Duration::from_secs(config.ban_sec),
        }
    }

    /// Reset the entitlement for `key` as of `now`. The expiry is always
    /// recomputed from `now`, so repeated resets never accumulate.
    fn reset_at(&self, key: &str, now: Instant) -> u64 {
        self.entitlements.insert(key.to_string(), now + self.ready_ttl);
        self.ready_ttl.as_secs()
    }

    /// Whether the entitlement for `key` is open as of `now`. Expired
    /// records are evicted on the way out.
    fn is_open_at(&self, key: &str, now: Instant) -> bool {
        // The read guard must be released before remove_if takes the
        // shard write lock.
        let expired = match self.entitlements.get(key) {
            Some(expires_at) => {
                if now < *expires_at {
                    return true;
                }
                true
            }
            None => false,
        };
        if expired {
            self.entitlements.remove_if(key, |_, expires_at| now >= *expires_at);
        }
        false
    }

    /// Run the window check for `key` as of `now`.
    fn allow_at(&self, key: &str, now: Instant) -> Decision {
        let entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Window::default()));
        let mut win = entry.lock();

        // An active ban overrides the window entirely.
        if let Some(until) = win.ban_until {
            if now < until {
                let retry_after = Duration::from_secs((until - now).as_secs());
                trace!(key = %key, retry_after_sec = retry_after.as_secs(), "Request denied, ban active");
                return Decision::Denied { retry_after };
            }
            win.ban_until = None;
        }

        // Drop hits that have slid out of the window.
        while let Some(&oldest) = win.hits.front() {
            if now.duration_since(oldest) > self.window {
                win.hits.pop_front();
            } else {
                break;
            }
        }

        if win.hits.len() >= self.limit {
            // The breaching request starts the ban and is not recorded.
            win.ban_until = Some(now + self.ban);
            debug!(key = %key, ban_sec = self.ban.as_secs(), "Window limit exceeded, ban started");
            return Decision::Denied { retry_after: self.ban };
        }

        win.hits.push_back(now);
        Decision::Allowed
    }

    /// Number of identities with window state. Primarily useful for tests.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl GateStore for InMemoryStore {
    async fn reset(&self, key: &str) -> Result<u64> {
        Ok(self.reset_at(key, Instant::now()))
    }

    async fn is_open(&self, key: &str) -> Result<bool> {
        Ok(self.is_open_at(key, Instant::now()))
    }

    async fn allow(&self, key: &str) -> Result<Decision> {
        Ok(self.allow_at(key, Instant::now()))
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(window_sec: u64, limit: usize, ban_sec: u64) -> InMemoryStore {
        let config = GateConfig {
            window_sec,
            limit,
            ban_sec,
            ..GateConfig::default()
        };
        InMemoryStore::new(&config)
    }

    #[test]
    fn test_closed_before_any_reset() {
        let store = test_store(10, 10, 10);
        assert!(!store.is_open_at("alice", Instant::now()));
    }

    #[test]
    fn test_reset_opens_until_ttl() {
        let store = test_store(10, 10, 10);
        let t0 = Instant::now();

        let ttl = store.reset_at("alice", t0);
        assert_eq!(ttl, 600);

        assert!(store.is_open_at("alice", t0));
        assert!(store.is_open_at("alice", t0 + Duration::from_secs(599)));
        assert!(!store.is_open_at("alice", t0 + Duration::from_secs(600)));
        assert!(!store.is_open_at("alice", t0 + Duration::from_millis(600_001)));
    }

    #[test]
    fn test_reset_is_not_cumulative() {
        let store = test_store(10, 10, 10);
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(300);

        store.reset_at("alice", t0);
        store.reset_at("alice", t1);

        // Expiry is t1 + 600, independent of the first reset
        assert!(store.is_open_at("alice", t1 + Duration::from_secs(599)));
        assert!(!store.is_open_at("alice", t1 + Duration::from_secs(600)));
    }

    #[test]
    fn test_keys_are_independent() {
        let store = test_store(10, 10, 10);
        let t0 = Instant::now();

        store.reset_at("alice", t0);
        assert!(store.is_open_at("alice", t0));
        assert!(!store.is_open_at("bob", t0));
    }

    #[test]
    fn test_allows_up_to_limit_within_window() {
        let store = test_store(10, 10, 10);
        let t0 = Instant::now();

        for i in 0..10 {
            let now = t0 + Duration::from_millis(i * 500);
            assert_eq!(store.allow_at("alice", now), Decision::Allowed);
        }

        // The 11th within the same span is denied with the full ban
        let decision = store.allow_at("alice", t0 + Duration::from_secs(5));
        assert_eq!(
            decision,
            Decision::Denied { retry_after: Duration::from_secs(10) }
        );
    }

    #[test]
    fn test_ban_reports_remaining_time() {
        let store = test_store(10, 10, 10);
        let t0 = Instant::now();

        for _ in 0..10 {
            store.allow_at("alice", t0);
        }
        // Trigger the ban
        store.allow_at("alice", t0);

        // 5 seconds into the ban the hint reflects the remainder
        let decision = store.allow_at("alice", t0 + Duration::from_secs(5));
        assert_eq!(
            decision,
            Decision::Denied { retry_after: Duration::from_secs(5) }
        );
    }

    #[test]
    fn test_ban_expiry_starts_fresh_window() {
        let store = test_store(10, 10, 10);
        let t0 = Instant::now();

        for _ in 0..10 {
            store.allow_at("alice", t0);
        }
        store.allow_at("alice", t0);

        // After the ban passes, the stale hits have also left the window
        let later = t0 + Duration::from_secs(11);
        assert_eq!(store.allow_at("alice", later), Decision::Allowed);
    }

    #[test]
    fn test_window_slides() {
        let store = test_store(10, 2, 10);
        let t0 = Instant::now();

        assert_eq!(store.allow_at("alice", t0), Decision::Allowed);
        assert_eq!(store.allow_at("alice", t0 + Duration::from_secs(1)), Decision::Allowed);

        // 11 seconds later the first hit has left the window
        let later = t0 + Duration::from_secs(11);
        assert_eq!(store.allow_at("alice", later), Decision::Allowed);
        assert_eq!(store.window_count(), 1);
    }

    #[test]
    fn test_denied_request_not_recorded() {
        let store = test_store(10, 2, 1);
        let t0 = Instant::now();

        store.allow_at("alice", t0);
        store.allow_at("alice", t0);
        // Breach: starts a 1s ban, window stays at 2 hits
        store.allow_at("alice", t0);

        // Ban over at t0+1; the two recorded hits leave the window at t0+10
        let later = t0 + Duration::from_millis(10_500);
        assert_eq!(store.allow_at("alice", later), Decision::Allowed);
    }

    #[test]
    fn test_trait_roundtrip() {
        let store = test_store(10, 10, 10);

        tokio_test::block_on(async {
            assert!(!store.is_open("alice").await.unwrap());
            assert_eq!(store.reset("alice").await.unwrap(), 600);
            assert!(store.is_open("alice").await.unwrap());
            assert_eq!(store.allow("alice").await.unwrap(), Decision::Allowed);
            assert!(store.ping().await);
        });
    }

    #[tokio::test]
    async fn test_concurrent_allows_never_exceed_limit() {
        use std::sync::Arc;

        let store = Arc::new(test_store(60, 50, 60));
        let mut handles = Vec::new();

        for _ in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.allow("alice").await.unwrap() }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() == Decision::Allowed {
                allowed += 1;
            }
        }

        // Two racing requests must never both squeeze past the limit
        assert_eq!(allowed, 50);
    }
}
