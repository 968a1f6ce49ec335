//! The error handed to callers whose request was denied.

use thiserror::Error;

use super::decision::Decision;
use super::policy::LimitCategory;

/// A denied admission, raised before the protected work runs.
///
/// This is a terminal outcome for the attempt. The limiter never retries on
/// the caller's behalf; the caller decides whether and when to try again.
#[derive(Error, Debug, Clone)]
#[error("Rate limit exceeded for {category} ({identifier}): retry in {retry_after_secs}s")]
pub struct RateLimitExceeded {
    /// Category whose policy denied the request
    pub category: LimitCategory,
    /// Identifier the request was counted against
    pub identifier: String,
    /// Seconds the caller should wait
    pub retry_after_secs: u64,
    /// The decision that produced the denial
    pub decision: Decision,
}

impl RateLimitExceeded {
    /// Wrap a denied decision.
    pub fn new(category: LimitCategory, identifier: impl Into<String>, decision: Decision) -> Self {
        Self {
            category,
            identifier: identifier.into(),
            retry_after_secs: decision.retry_after_secs.unwrap_or(1),
            decision,
        }
    }

    /// Text for the person who triggered the request.
    pub fn user_message(&self) -> String {
        format!(
            "Rate limit exceeded. Please wait {} seconds before trying again.",
            self.retry_after_secs
        )
    }
}
