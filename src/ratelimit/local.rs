//! In-process window store.
//!
//! Used when no shared store is configured or after the shared store has
//! failed. Limits are per process only.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::WindowBackend;
use super::decision::Decision;
use super::key::LimiterKey;
use super::policy::RateLimit;
use super::window::WindowState;
use crate::error::BackendError;

/// Default number of keys tracked before windows are evicted.
pub const DEFAULT_MAX_KEYS: usize = 10_000;

/// Window store keeping every key's state in a concurrent map.
///
/// A check holds the map shard's write lock for its key from prune to
/// record, so concurrent checks on one key are serialised while distinct
/// keys mostly proceed in parallel.
pub struct LocalWindowStore {
    windows: DashMap<String, WindowState>,
    max_keys: usize,
}

impl LocalWindowStore {
    /// Create a store with the default key capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_KEYS)
    }

    /// Create a store that tracks at most `max_keys` keys.
    ///
    /// The cap is soft under contention: racing inserts of new keys may
    /// overshoot it by the number of racing threads.
    pub fn with_capacity(max_keys: usize) -> Self {
        Self {
            windows: DashMap::new(),
            max_keys,
        }
    }

    /// Synchronous check; the async trait method delegates here.
    pub fn check_at(
        &self,
        key: &LimiterKey,
        limit: &RateLimit,
        now: f64,
        cost: u32,
    ) -> Result<Decision, BackendError> {
        let encoded = key.encode();

        if cost == 0 {
            // Probes never create state
            return Ok(match self.windows.get_mut(&encoded) {
                Some(mut state) => state.check(now, limit, 0),
                None => WindowState::new().check(now, limit, 0),
            });
        }

        if !self.windows.contains_key(&encoded) && self.windows.len() >= self.max_keys {
            // A denial on an unknown key needs no room
            let decision = WindowState::new().check(now, limit, cost);
            if !decision.allowed {
                return Ok(decision);
            }
            self.make_room(now)?;
        }

        let decision = match self.windows.entry(encoded) {
            Entry::Occupied(mut entry) => entry.get_mut().check(now, limit, cost),
            Entry::Vacant(entry) => {
                // Unknown keys are only stored once something is admitted
                let mut state = WindowState::new();
                let decision = state.check(now, limit, cost);
                if decision.allowed {
                    entry.insert(state);
                }
                decision
            }
        };

        trace!(
            key = %key,
            cost,
            allowed = decision.allowed,
            burst_used = decision.burst_used,
            "Local window check"
        );

        Ok(decision)
    }

    /// Free at least one slot: idle windows first, then the window closest
    /// to expiring.
    fn make_room(&self, now: f64) -> Result<(), BackendError> {
        let purged = self.purge_expired(now);
        if purged > 0 {
            debug!(purged, "Purged idle windows to make room");
        }

        while self.windows.len() >= self.max_keys {
            let stalest = self
                .windows
                .iter()
                .min_by(|a, b| a.value().expires_at().total_cmp(&b.value().expires_at()))
                .map(|entry| entry.key().clone());
            let Some(stalest) = stalest else {
                return Err(BackendError::Capacity(self.max_keys));
            };
            self.windows.remove(&stalest);
            debug!(key = %stalest, "Evicted live window to make room");
        }
        Ok(())
    }

    /// Drop every window that no longer affects decisions. Returns how many
    /// were dropped.
    pub fn purge_expired(&self, now: f64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, state| !state.is_expired(now));
        before.saturating_sub(self.windows.len())
    }

    /// Get the number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    /// Number of timestamps held for a key, if it is tracked.
    pub fn window_len(&self, key: &LimiterKey) -> Option<usize> {
        self.windows.get(&key.encode()).map(|s| s.len())
    }

    /// Clear all windows.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

impl Default for LocalWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowBackend for LocalWindowStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn check(
        &self,
        key: &LimiterKey,
        limit: &RateLimit,
        now: f64,
        cost: u32,
    ) -> Result<Decision, BackendError> {
        self.check_at(key, limit, now, cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::policy::LimitCategory;
    use std::sync::{Arc, Barrier};
    use tokio_test::{assert_err, assert_ok};

    fn limit(requests: u32, window: u64, burst: u32) -> RateLimit {
        RateLimit::new(requests, window, burst).unwrap()
    }

    #[test]
    fn test_store_creation() {
        let store = LocalWindowStore::new();
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_check_creates_window() {
        let store = LocalWindowStore::new();
        let key = LimiterKey::new(LimitCategory::TelegramCommand, "1");

        let decision = assert_ok!(store.check_at(&key, &limit(5, 60, 0), 0.0, 1));
        assert!(decision.allowed);
        assert_eq!(store.key_count(), 1);
        assert_eq!(store.window_len(&key), Some(1));
    }

    #[test]
    fn test_probe_does_not_create_window() {
        let store = LocalWindowStore::new();
        let key = LimiterKey::new(LimitCategory::TelegramCommand, "1");

        let decision = assert_ok!(store.check_at(&key, &limit(5, 60, 0), 0.0, 0));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let store = LocalWindowStore::new();
        let l = limit(1, 60, 0);
        let a = LimiterKey::new(LimitCategory::LlmRequest, "a");
        let b = LimiterKey::new(LimitCategory::LlmRequest, "b");
        let other_category = LimiterKey::new(LimitCategory::SourceScan, "a");

        assert!(assert_ok!(store.check_at(&a, &l, 0.0, 1)).allowed);
        assert!(!assert_ok!(store.check_at(&a, &l, 0.0, 1)).allowed);
        assert!(assert_ok!(store.check_at(&b, &l, 0.0, 1)).allowed);
        assert!(assert_ok!(store.check_at(&other_category, &l, 0.0, 1)).allowed);
    }

    #[test]
    fn test_denied_check_on_unknown_key_stores_nothing() {
        let store = LocalWindowStore::new();
        let l = limit(1, 60, 0);

        for i in 0..5 {
            let key = LimiterKey::new(LimitCategory::LlmRequest, format!("id{}", i));
            let decision = assert_ok!(store.check_at(&key, &l, 0.0, 5));
            assert!(!decision.allowed);
        }
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_full_store_evicts_instead_of_refusing() {
        let store = LocalWindowStore::with_capacity(2);
        let l = limit(5, 10, 0);
        let key = |id: &str| LimiterKey::new(LimitCategory::UserOperation, id);

        assert_ok!(store.check_at(&key("a"), &l, 0.0, 1));
        assert_ok!(store.check_at(&key("b"), &l, 5.0, 1));

        // Nothing idle: the window closest to expiring goes
        assert!(assert_ok!(store.check_at(&key("c"), &l, 6.0, 1)).allowed);
        assert_eq!(store.key_count(), 2);
        assert!(store.window_len(&key("a")).is_none());
        assert_eq!(store.window_len(&key("b")), Some(1));

        // Known keys keep their accounting while full
        for _ in 0..4 {
            assert_ok!(store.check_at(&key("c"), &l, 6.0, 1));
        }
        assert!(!assert_ok!(store.check_at(&key("c"), &l, 6.0, 1)).allowed);

        // Idle windows go before live ones ("b" idle from t=15, "c" lives to 16)
        assert!(assert_ok!(store.check_at(&key("d"), &l, 15.5, 1)).allowed);
        assert!(store.window_len(&key("b")).is_none());
        assert_eq!(store.window_len(&key("c")), Some(5));
        assert!(!assert_ok!(store.check_at(&key("c"), &l, 15.5, 1)).allowed);

        // Denials on unknown keys never evict
        assert!(!assert_ok!(store.check_at(&key("e"), &l, 15.5, 6)).allowed);
        assert_eq!(store.window_len(&key("c")), Some(5));
        assert_eq!(store.window_len(&key("d")), Some(1));
    }

    #[test]
    fn test_zero_capacity_refuses() {
        let store = LocalWindowStore::with_capacity(0);
        let l = limit(5, 10, 0);
        let key = LimiterKey::new(LimitCategory::UserOperation, "a");

        let err = assert_err!(store.check_at(&key, &l, 0.0, 1));
        assert!(matches!(err, BackendError::Capacity(0)));
        assert!(!assert_ok!(store.check_at(&key, &l, 0.0, 6)).allowed);
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let store = LocalWindowStore::new();
        let short = limit(5, 10, 0);
        let long = limit(5, 300, 0);

        assert_ok!(store.check_at(&LimiterKey::global(LimitCategory::TelegramCommand), &short, 0.0, 1));
        assert_ok!(store.check_at(&LimiterKey::global(LimitCategory::SourceScan), &long, 0.0, 1));

        assert_eq!(store.purge_expired(5.0), 0);
        assert_eq!(store.purge_expired(10.0), 1);
        assert_eq!(store.key_count(), 1);

        store.clear();
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_concurrent_checks_admit_exactly_one() {
        for _ in 0..50 {
            let store = Arc::new(LocalWindowStore::new());
            let barrier = Arc::new(Barrier::new(2));
            let key = LimiterKey::new(LimitCategory::LlmRequest, "racer");

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let store = store.clone();
                    let barrier = barrier.clone();
                    let key = key.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        store.check_at(&key, &limit(1, 60, 0), 0.0, 1).unwrap().allowed
                    })
                })
                .collect();

            let admitted = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|allowed| *allowed)
                .count();
            assert_eq!(admitted, 1);
        }
    }

    #[test]
    fn test_many_threads_never_exceed_capacity() {
        let store = Arc::new(LocalWindowStore::new());
        let key = LimiterKey::new(LimitCategory::TelegramCommand, "crowd");
        let l = limit(10, 60, 5);
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    (0..10)
                        .filter(|_| store.check_at(&key, &l, 0.0, 1).unwrap().allowed)
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // Regular window plus one burst allowance; refill cannot happen while
        // the window stays full
        assert_eq!(admitted, 15);
    }
}
