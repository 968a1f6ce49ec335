//! Sliding-window state with a burst allowance.
//!
//! This is the in-process form of the admission algorithm. The shared store
//! runs the same steps inside a server-side script (see `shared.rs`); any
//! change here must be mirrored there.

use std::collections::VecDeque;

use super::decision::{Decision, Verdict};
use super::policy::RateLimit;

/// Burst allowance as last written.
#[derive(Debug, Clone, Copy, PartialEq)]
struct BurstState {
    tokens: u32,
    updated_at: f64,
}

/// Per-key window: request timestamps plus the burst allowance.
#[derive(Debug, Clone, Default)]
pub struct WindowState {
    /// Timestamps of admitted requests, oldest first
    timestamps: VecDeque<f64>,
    /// `None` means the allowance is full
    burst: Option<BurstState>,
    /// Clock reading after which this state holds nothing worth keeping
    expires_at: f64,
}

impl WindowState {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one admission check at `now`, recording it if admitted.
    ///
    /// Denials and cost-0 probes leave the window as it was (apart from
    /// dropping timestamps that already left it).
    pub fn check(&mut self, now: f64, limit: &RateLimit, cost: u32) -> Decision {
        self.prune(now, limit);

        let count = self.timestamps.len() as u32;
        let oldest = self.timestamps.front().copied();
        let tokens = self.burst_tokens(now, limit);

        if cost == 0 {
            return Decision::probe(limit, now, count, oldest, tokens);
        }

        // Regular capacity before burst: burst only covers what a full window
        // cannot, so (2 req, burst 1) admits two regular requests and then one
        // burst. Checking burst first would spend it on the first request.
        let verdict = if count.saturating_add(cost) <= limit.requests() {
            self.record(now, limit, cost);
            if tokens < limit.burst_capacity() {
                self.burst = Some(BurstState {
                    tokens: limit.burst_capacity(),
                    updated_at: now,
                });
            }
            Verdict::Regular
        } else if tokens >= cost {
            self.record(now, limit, cost);
            self.burst = Some(BurstState {
                tokens: tokens - cost,
                updated_at: now,
            });
            Verdict::Burst
        } else {
            Verdict::Denied
        };

        Decision::from_verdict(verdict, limit, now, count, oldest, cost)
    }

    /// Number of timestamps currently held (including stale ones not yet pruned).
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether no timestamps are held.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Whether the state can be dropped without changing any later decision.
    pub fn is_expired(&self, now: f64) -> bool {
        now >= self.expires_at
    }

    /// Clock reading at which the state stops mattering.
    pub fn expires_at(&self) -> f64 {
        self.expires_at
    }

    fn prune(&mut self, now: f64, limit: &RateLimit) {
        let window_start = now - limit.window();
        while matches!(self.timestamps.front(), Some(&ts) if ts <= window_start) {
            self.timestamps.pop_front();
        }
    }

    /// Burst tokens available at `now`.
    ///
    /// An allowance untouched for a whole window reads as full, like the
    /// shared store's burst key expiring.
    fn burst_tokens(&self, now: f64, limit: &RateLimit) -> u32 {
        match self.burst {
            Some(state) if now - state.updated_at < limit.window() => {
                state.tokens.min(limit.burst_capacity())
            }
            _ => limit.burst_capacity(),
        }
    }

    fn record(&mut self, now: f64, limit: &RateLimit, cost: u32) {
        self.timestamps.extend(std::iter::repeat(now).take(cost as usize));
        self.expires_at = now + limit.window();
    }
}
