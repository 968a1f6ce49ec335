//! Miles rate limiter
//!
//! Admission control for the Miles bot. Every Telegram command, model call
//! and source scan is checked against a per-category sliding window with a
//! small burst allowance. Windows live in Redis when one is configured, so
//! every bot process shares one view of each user, and in process memory
//! otherwise.

pub mod config;
pub mod error;
pub mod metrics;
pub mod ratelimit;
pub mod report;
