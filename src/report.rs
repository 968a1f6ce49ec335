//! Per-user rate limit status text for the bot's status command.

use std::fmt::Write;

use crate::ratelimit::{LimitCategory, RateLimiter};

/// Categories shown to users, with their display names.
pub const USER_CATEGORIES: [(LimitCategory, &str); 4] = [
    (LimitCategory::TelegramCommand, "Telegram Commands"),
    (LimitCategory::LlmRequest, "AI Chat Requests"),
    (LimitCategory::SourceScan, "Source Scanning"),
    (LimitCategory::UserOperation, "General Operations"),
];

/// Render the Markdown status message for `identifier`.
///
/// Reading the status never spends quota. Categories without a policy are
/// left out.
pub async fn status_report(limiter: &RateLimiter, identifier: &str) -> String {
    let mut out = String::from("⏱️ **Rate Limit Status**\n\n");

    for (category, display_name) in USER_CATEGORIES {
        let Some(stats) = limiter.stats(category, identifier).await else {
            continue;
        };

        let icon = if stats.currently_allowed { "✅" } else { "⚠️" };
        // Writing to a String cannot fail
        let _ = write!(
            out,
            "{icon} **{display_name}**\n  • Remaining: {}\n  • Window: {}s\n  • Burst: {}\n\n",
            stats.remaining, stats.window_seconds, stats.burst_capacity
        );
    }

    out.push_str("💡 *Rate limits prevent spam and ensure fair usage*");
    out
}
