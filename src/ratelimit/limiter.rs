//! The rate limiter facade.
//!
//! [`RateLimiter`] owns the policy table and picks a window store. It starts
//! on the shared store when one is configured and reachable, and moves to
//! the in-process store the first time the shared store fails. The move is
//! permanent for the life of the limiter: a process never splits one key's
//! accounting between two stores.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use super::backend::WindowBackend;
use super::clock::{Clock, SystemClock};
use super::decision::Decision;
use super::exceeded::RateLimitExceeded;
use super::key::LimiterKey;
use super::local::LocalWindowStore;
use super::policy::{LimitCategory, PolicyTable, RateLimit};
use super::shared::SharedWindowStore;
use crate::config::LimiterConfig;
use crate::error::{BackendError, Result};
use crate::metrics::{MetricsSink, NoopMetrics, Outcome};

/// Behaviour when neither store can answer a check.
///
/// The limiter guards against abuse, not correctness, so the default admits:
/// losing limiting for a while is better than the whole bot refusing work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Admit the request
    #[default]
    Open,
    /// Deny the request with a full-window retry-after
    Closed,
}

/// Policy and current standing of one identifier in one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitStats {
    pub category: LimitCategory,
    pub identifier: String,
    pub requests_per_window: u32,
    pub window_seconds: u64,
    pub burst_capacity: u32,
    /// Whether a unit request would be admitted right now
    pub currently_allowed: bool,
    pub remaining: u32,
    pub reset_time: f64,
    pub retry_after_secs: Option<u64>,
}

/// Admission control for the bot's commands, model calls and scans.
///
/// Construct once at startup, share by `Arc`, and call [`shutdown`] when the
/// process stops.
///
/// [`shutdown`]: RateLimiter::shutdown
pub struct RateLimiter {
    policies: PolicyTable,
    local: LocalWindowStore,
    shared: Option<Arc<dyn WindowBackend>>,
    shared_active: AtomicBool,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    failure_mode: FailureMode,
}

impl RateLimiter {
    /// A limiter using only the in-process store.
    pub fn local(policies: PolicyTable) -> Self {
        Self {
            policies,
            local: LocalWindowStore::new(),
            shared: None,
            shared_active: AtomicBool::new(false),
            clock: Arc::new(SystemClock::new()),
            metrics: Arc::new(NoopMetrics),
            failure_mode: FailureMode::default(),
        }
    }

    /// A limiter that prefers `shared` and falls back to the in-process store.
    pub fn with_shared(policies: PolicyTable, shared: Arc<dyn WindowBackend>) -> Self {
        Self {
            shared: Some(shared),
            shared_active: AtomicBool::new(true),
            ..Self::local(policies)
        }
    }

    /// Build a limiter from configuration.
    ///
    /// Connection problems are not errors: the limiter starts on the local
    /// store and logs why.
    pub async fn from_config(config: &LimiterConfig) -> Self {
        let policies = config.policy_table();

        let limiter = match config.store.resolved_url() {
            Some(url) => match SharedWindowStore::connect(
                &url,
                config.store.connect_timeout(),
                config.store.timeout(),
            )
            .await
            {
                Ok(store) => Self::with_shared(policies, Arc::new(store)),
                Err(e) => {
                    warn!(error = %e, "Shared rate limit store unavailable, using local store");
                    Self::local(policies)
                }
            },
            None => {
                info!("No shared rate limit store configured, using local store");
                Self::local(policies)
            }
        };

        limiter
            .with_failure_mode(config.failure_mode)
            .with_local_capacity(config.local_max_keys)
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Report check outcomes to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Cap the number of keys the local store tracks.
    pub fn with_local_capacity(mut self, max_keys: usize) -> Self {
        self.local = LocalWindowStore::with_capacity(max_keys);
        self
    }

    /// Check `cost` units for `identifier` under `category`'s policy.
    ///
    /// A denial is reported through [`Decision::allowed`], never as an error.
    /// A cost of 0 probes the window without recording anything.
    #[instrument(level = "trace", skip(self))]
    pub async fn check(&self, category: LimitCategory, identifier: &str, cost: u32) -> Decision {
        let now = self.clock.now();

        let Some(limit) = self.policies.get_limit(category) else {
            trace!(category = %category, "No limit configured, admitting");
            return Decision::unlimited(now);
        };

        let key = LimiterKey::new(category, identifier);
        let decision = match self.evaluate(&key, &limit, now, cost).await {
            Ok(decision) => decision,
            Err(e) => self.unavailable(&key, &limit, now, e),
        };

        if cost > 0 {
            let outcome = if decision.allowed {
                Outcome::Admitted
            } else {
                debug!(
                    key = %key,
                    cost,
                    retry_after = ?decision.retry_after_secs,
                    "Rate limit exceeded"
                );
                Outcome::Denied
            };
            self.metrics.record(category, outcome);
        }

        decision
    }

    /// Gate a piece of work: `Ok` means go ahead, `Err` carries the wait.
    ///
    /// There is nothing to release afterwards. The quota is spent the moment
    /// this returns `Ok`, whether or not the caller's work completes.
    pub async fn limit(
        &self,
        category: LimitCategory,
        identifier: &str,
        cost: u32,
    ) -> std::result::Result<Decision, RateLimitExceeded> {
        let decision = self.check(category, identifier, cost).await;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(RateLimitExceeded::new(category, identifier, decision))
        }
    }

    /// Run `work` only if the check admits it.
    pub async fn guarded<F, Fut, T>(
        &self,
        category: LimitCategory,
        identifier: &str,
        cost: u32,
        work: F,
    ) -> std::result::Result<T, RateLimitExceeded>
    where
        F: FnOnce(Decision) -> Fut,
        Fut: Future<Output = T>,
    {
        let decision = self.limit(category, identifier, cost).await?;
        Ok(work(decision).await)
    }

    /// Policy and standing for an identifier, without spending quota.
    ///
    /// Returns `None` when the category has no policy.
    pub async fn stats(&self, category: LimitCategory, identifier: &str) -> Option<LimitStats> {
        let limit = self.policies.get_limit(category)?;
        let probe = self.check(category, identifier, 0).await;

        Some(LimitStats {
            category,
            identifier: identifier.to_string(),
            requests_per_window: limit.requests(),
            window_seconds: limit.window_seconds(),
            burst_capacity: limit.burst_capacity(),
            currently_allowed: probe.allowed,
            remaining: probe.remaining,
            reset_time: probe.reset_time,
            retry_after_secs: probe.retry_after_secs,
        })
    }

    /// Current policy for a category.
    pub fn get_limit(&self, category: LimitCategory) -> Option<RateLimit> {
        self.policies.get_limit(category)
    }

    /// Replace a category's policy for all later checks.
    pub fn set_limit(&self, category: LimitCategory, limit: RateLimit) {
        self.policies.set_limit(category, limit);
    }

    /// Validate and apply a policy given as raw numbers.
    pub fn set_limit_values(
        &self,
        category: LimitCategory,
        requests: u32,
        window_seconds: u64,
        burst_capacity: u32,
    ) -> Result<RateLimit> {
        let limit = RateLimit::new(requests, window_seconds, burst_capacity)?;
        self.set_limit(category, limit);
        Ok(limit)
    }

    /// Make a category unlimited.
    pub fn remove_limit(&self, category: LimitCategory) -> Option<RateLimit> {
        self.policies.remove_limit(category)
    }

    /// All configured policies.
    pub fn limits(&self) -> Vec<(LimitCategory, RateLimit)> {
        self.policies.limits()
    }

    /// Name of the store answering checks: `"shared"` or `"local"`.
    pub fn backend_name(&self) -> &'static str {
        match self.active_shared() {
            Some(shared) => shared.name(),
            None => self.local.name(),
        }
    }

    /// Whether checks still go to the shared store.
    pub fn is_shared_active(&self) -> bool {
        self.active_shared().is_some()
    }

    /// The in-process store.
    pub fn local_store(&self) -> &LocalWindowStore {
        &self.local
    }

    /// Periodically drop idle local windows.
    ///
    /// The task holds only a weak reference and ends once the limiter is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let purged = limiter.local.purge_expired(limiter.clock.now());
                if purged > 0 {
                    debug!(purged, remaining = limiter.local.key_count(), "Purged idle local windows");
                }
            }
        })
    }

    /// Stop using the shared store and release its connection.
    pub async fn shutdown(&self) {
        if let Some(shared) = &self.shared {
            self.shared_active.store(false, Ordering::SeqCst);
            shared.close().await;
        }
        info!("Rate limiter shut down");
    }

    fn active_shared(&self) -> Option<&Arc<dyn WindowBackend>> {
        self.shared
            .as_ref()
            .filter(|_| self.shared_active.load(Ordering::SeqCst))
    }

    async fn evaluate(
        &self,
        key: &LimiterKey,
        limit: &RateLimit,
        now: f64,
        cost: u32,
    ) -> std::result::Result<Decision, BackendError> {
        if let Some(shared) = self.active_shared() {
            match shared.check(key, limit, now, cost).await {
                Ok(decision) => return Ok(decision),
                Err(e) => {
                    if self.shared_active.swap(false, Ordering::SeqCst) {
                        warn!(
                            key = %key,
                            error = %e,
                            "Shared rate limit store failed, switching to local store until restart"
                        );
                    }
                }
            }
        }

        self.local.check_at(key, limit, now, cost)
    }

    fn unavailable(&self, key: &LimiterKey, limit: &RateLimit, now: f64, e: BackendError) -> Decision {
        match self.failure_mode {
            FailureMode::Open => {
                error!(key = %key, error = %e, "No rate limit store available, admitting");
                Decision::unlimited(now)
            }
            FailureMode::Closed => {
                error!(key = %key, error = %e, "No rate limit store available, denying");
                Decision::refused(limit, now)
            }
        }
    }
}
