//! The outcome of a single admission check.

use serde::Serialize;

use super::policy::RateLimit;

/// `remaining` reported for categories without a policy.
pub const UNLIMITED_REMAINING: u32 = u32::MAX;

/// Window assumed for `reset_time` when no policy applies.
const UNLIMITED_RESET_SECS: f64 = 60.0;

/// Which part of the algorithm produced an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Admitted within the sliding window
    Regular,
    /// Admitted from the burst allowance
    Burst,
    /// Refused; nothing was recorded
    Denied,
}

/// Admission decision for one check.
///
/// Produced fresh for every call; carries no identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Regular-path requests left in the current window
    pub remaining: u32,
    /// Clock reading at which the current window has fully rolled over
    pub reset_time: f64,
    /// Seconds to wait before retrying; only set on denial
    pub retry_after_secs: Option<u64>,
    /// Whether the admission consumed burst allowance
    pub burst_used: bool,
}

impl Decision {
    /// Build the decision for a verdict reached at `now`.
    ///
    /// `count` is the number of timestamps in the window before this request
    /// was recorded and `oldest` the earliest of them. Both backends funnel
    /// through here so they report identical numbers.
    pub fn from_verdict(
        verdict: Verdict,
        limit: &RateLimit,
        now: f64,
        count: u32,
        oldest: Option<f64>,
        cost: u32,
    ) -> Self {
        let reset_time = now + limit.window();
        match verdict {
            Verdict::Regular => Self {
                allowed: true,
                remaining: limit.requests().saturating_sub(count).saturating_sub(cost),
                reset_time,
                retry_after_secs: None,
                burst_used: false,
            },
            Verdict::Burst => Self {
                allowed: true,
                remaining: limit.requests().saturating_sub(count),
                reset_time,
                retry_after_secs: None,
                burst_used: true,
            },
            Verdict::Denied => Self {
                allowed: false,
                remaining: 0,
                reset_time,
                retry_after_secs: Some(retry_after(limit, now, oldest)),
                burst_used: false,
            },
        }
    }

    /// Decision for a cost-0 probe, which never records anything.
    pub fn probe(limit: &RateLimit, now: f64, count: u32, oldest: Option<f64>, tokens: u32) -> Self {
        let allowed = count < limit.requests() || tokens >= 1;
        Self {
            allowed,
            remaining: limit.requests().saturating_sub(count),
            reset_time: now + limit.window(),
            retry_after_secs: (!allowed).then(|| retry_after(limit, now, oldest)),
            burst_used: false,
        }
    }

    /// Decision for a category with no policy.
    pub fn unlimited(now: f64) -> Self {
        Self {
            allowed: true,
            remaining: UNLIMITED_REMAINING,
            reset_time: now + UNLIMITED_RESET_SECS,
            retry_after_secs: None,
            burst_used: false,
        }
    }

    /// Denial issued without consulting any store.
    pub fn refused(limit: &RateLimit, now: f64) -> Self {
        Self::from_verdict(Verdict::Denied, limit, now, 0, None, 0)
    }
}

/// Seconds until the oldest counted request leaves the window, in `[1, W]`.
pub fn retry_after(limit: &RateLimit, now: f64, oldest: Option<f64>) -> u64 {
    let window = limit.window();
    let wait = match oldest {
        Some(oldest) => (window - (now - oldest)).ceil(),
        None => window,
    };
    (wait.max(1.0) as u64).min(limit.window_seconds().max(1))
}
