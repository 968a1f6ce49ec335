//! Limiter key generation and handling.

use std::fmt;

use super::policy::LimitCategory;

/// Prefix shared by every key the limiter writes to the shared store.
pub const STORE_KEY_PREFIX: &str = "rl";

/// Identifier used when a check is not tied to a particular user.
pub const GLOBAL_IDENTIFIER: &str = "global";

/// A key that uniquely identifies one window: a category plus a
/// caller-supplied identifier (user id, chat id, `"global"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    /// The category whose policy applies
    pub category: LimitCategory,
    /// Who or what is being limited
    pub identifier: String,
}

impl LimiterKey {
    /// Create a new limiter key.
    pub fn new(category: LimitCategory, identifier: impl Into<String>) -> Self {
        Self {
            category,
            identifier: identifier.into(),
        }
    }

    /// Key for process-wide limits within a category.
    pub fn global(category: LimitCategory) -> Self {
        Self::new(category, GLOBAL_IDENTIFIER)
    }

    /// `category:identifier`.
    ///
    /// Category names never contain `:`, so the first `:` always ends the
    /// category and distinct keys never encode to the same string.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.category.as_str(), self.identifier)
    }

    /// Sorted-set key holding the request timestamps.
    pub fn window_key(&self) -> String {
        format!("{}:{}", STORE_KEY_PREFIX, self.encode())
    }

    /// Companion key holding the burst allowance.
    pub fn burst_key(&self) -> String {
        format!("{}:burst", self.window_key())
    }
}

impl fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
