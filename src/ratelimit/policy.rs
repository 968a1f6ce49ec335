//! Rate limit categories, policies and the policy table.
//!
//! Every check names a [`LimitCategory`]. The [`PolicyTable`] maps each
//! category to its current [`RateLimit`]; a category without an entry is
//! unlimited.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::error::{LimiterError, Result};

/// The closed set of things the bot rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitCategory {
    /// Chat commands issued by a user
    TelegramCommand,
    /// Calls to the language model
    LlmRequest,
    /// Scans of promotion sources
    SourceScan,
    /// Plugin invocations
    PluginExecution,
    /// Operations against the bot's own storage
    StoreOperation,
    /// Any other per-user operation
    UserOperation,
}

impl LimitCategory {
    pub const ALL: [LimitCategory; 6] = [
        LimitCategory::TelegramCommand,
        LimitCategory::LlmRequest,
        LimitCategory::SourceScan,
        LimitCategory::PluginExecution,
        LimitCategory::StoreOperation,
        LimitCategory::UserOperation,
    ];

    /// Stable name used in store keys, metrics labels and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitCategory::TelegramCommand => "telegram_command",
            LimitCategory::LlmRequest => "llm_request",
            LimitCategory::SourceScan => "source_scan",
            LimitCategory::PluginExecution => "plugin_execution",
            LimitCategory::StoreOperation => "store_operation",
            LimitCategory::UserOperation => "user_operation",
        }
    }

    /// Built-in policy for this category.
    pub fn default_limit(&self) -> RateLimit {
        let (requests, window_seconds, burst_capacity) = match self {
            LimitCategory::TelegramCommand => (10, 60, 5),
            LimitCategory::LlmRequest => (20, 60, 3),
            LimitCategory::SourceScan => (5, 300, 2),
            LimitCategory::PluginExecution => (30, 60, 10),
            LimitCategory::StoreOperation => (1000, 60, 100),
            LimitCategory::UserOperation => (30, 60, 10),
        };
        RateLimit {
            requests,
            window_seconds,
            burst_capacity,
        }
    }
}

impl fmt::Display for LimitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for LimitCategory {
    type Err = LimiterError;

    /// Accepts the snake_case name or its kebab-case spelling.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        LimitCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| LimiterError::Config(format!("unknown rate limit category: {}", s)))
    }
}

/// A sliding-window policy with a separate burst allowance.
///
/// `burst_capacity` is extra instantaneous capacity, not a share of
/// `requests`, so it may exceed `requests`.
///
/// Fields are private: every value went through [`RateLimit::new`], so the
/// window arithmetic can rely on `requests > 0` and `window_seconds > 0`.
///
/// ```compile_fail
/// use miles_ratelimit::ratelimit::RateLimit;
///
/// let unchecked = RateLimit { requests: 1, window_seconds: 0, burst_capacity: 0 };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRateLimit")]
pub struct RateLimit {
    requests: u32,
    window_seconds: u64,
    burst_capacity: u32,
}

impl RateLimit {
    /// Create a validated policy.
    pub fn new(requests: u32, window_seconds: u64, burst_capacity: u32) -> Result<Self> {
        if requests == 0 {
            return Err(LimiterError::InvalidPolicy(
                "requests must be greater than zero".to_string(),
            ));
        }
        if window_seconds == 0 {
            return Err(LimiterError::InvalidPolicy(
                "window_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            requests,
            window_seconds,
            burst_capacity,
        })
    }

    /// Requests admitted on the regular path per window.
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Length of the sliding window.
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Extra requests admitted instantly when the window is full.
    pub fn burst_capacity(&self) -> u32 {
        self.burst_capacity
    }

    /// Window length as floating-point seconds, for timestamp arithmetic.
    pub fn window(&self) -> f64 {
        self.window_seconds as f64
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} req / {}s, burst {}",
            self.requests, self.window_seconds, self.burst_capacity
        )
    }
}

#[derive(Deserialize)]
struct RawRateLimit {
    requests: u32,
    window_seconds: u64,
    #[serde(default)]
    burst_capacity: u32,
}

impl TryFrom<RawRateLimit> for RateLimit {
    type Error = LimiterError;

    fn try_from(raw: RawRateLimit) -> Result<Self> {
        RateLimit::new(raw.requests, raw.window_seconds, raw.burst_capacity)
    }
}

/// The current policy for each category.
///
/// Reads vastly outnumber writes; a plain read/write lock is enough.
#[derive(Debug)]
pub struct PolicyTable {
    limits: RwLock<HashMap<LimitCategory, RateLimit>>,
}

impl PolicyTable {
    /// A table holding the built-in policy for every category.
    pub fn new() -> Self {
        let limits = LimitCategory::ALL
            .into_iter()
            .map(|c| (c, c.default_limit()))
            .collect();
        Self {
            limits: RwLock::new(limits),
        }
    }

    /// A table with no policies, admitting everything.
    pub fn empty() -> Self {
        Self {
            limits: RwLock::new(HashMap::new()),
        }
    }

    /// The built-in defaults with `overrides` applied on top.
    pub fn with_overrides(overrides: &HashMap<LimitCategory, RateLimit>) -> Self {
        let table = Self::new();
        {
            let mut limits = table.limits.write();
            for (category, limit) in overrides {
                limits.insert(*category, *limit);
            }
        }
        table
    }

    /// Current policy, or `None` when the category is unlimited.
    pub fn get_limit(&self, category: LimitCategory) -> Option<RateLimit> {
        self.limits.read().get(&category).copied()
    }

    /// Replace the policy for a category. Applies to every later check.
    pub fn set_limit(&self, category: LimitCategory, limit: RateLimit) {
        self.limits.write().insert(category, limit);
        info!(category = %category, limit = %limit, "Updated rate limit");
    }

    /// Drop the policy for a category, making it unlimited.
    pub fn remove_limit(&self, category: LimitCategory) -> Option<RateLimit> {
        let removed = self.limits.write().remove(&category);
        if removed.is_some() {
            info!(category = %category, "Removed rate limit");
        }
        removed
    }

    /// Snapshot of all configured policies, ordered by category.
    pub fn limits(&self) -> Vec<(LimitCategory, RateLimit)> {
        let mut all: Vec<_> = self
            .limits
            .read()
            .iter()
            .map(|(c, l)| (*c, *l))
            .collect();
        all.sort_by_key(|(c, _)| *c);
        all
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new()
    }
}
