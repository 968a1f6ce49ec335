//! Window store trait for abstracting local and shared implementations.

use async_trait::async_trait;

use super::decision::Decision;
use super::key::LimiterKey;
use super::policy::RateLimit;
use crate::error::BackendError;

/// Trait for window store implementations.
///
/// This trait abstracts over the in-process [`LocalWindowStore`] and the
/// Redis-backed [`SharedWindowStore`] so the facade can hold either.
/// Implementations must run the whole check (prune, count, decide, record)
/// atomically per key.
///
/// [`LocalWindowStore`]: super::LocalWindowStore
/// [`SharedWindowStore`]: super::SharedWindowStore
#[async_trait]
pub trait WindowBackend: Send + Sync {
    /// Short name for logs and status output.
    fn name(&self) -> &'static str;

    /// Check `cost` units against `limit` for `key` at clock reading `now`.
    async fn check(
        &self,
        key: &LimiterKey,
        limit: &RateLimit,
        now: f64,
        cost: u32,
    ) -> Result<Decision, BackendError>;

    /// Release connections. Called once at shutdown.
    async fn close(&self) {}
}
