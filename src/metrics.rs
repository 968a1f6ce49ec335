//! Throttling metrics.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::Result;
use crate::ratelimit::LimitCategory;

/// Outcome label for a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Admitted,
    Denied,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Admitted => "admitted",
            Outcome::Denied => "denied",
        }
    }
}

/// Where the limiter reports check outcomes.
///
/// Implementations must not block; a sink that fails should drop the
/// sample rather than propagate anything back into the limiter.
pub trait MetricsSink: Send + Sync {
    fn record(&self, category: LimitCategory, outcome: Outcome);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _category: LimitCategory, _outcome: Outcome) {}
}

/// Prometheus counters labelled by category and outcome.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    checks: IntCounterVec,
}

impl PrometheusMetrics {
    /// Counter name in the exposition output.
    pub const CHECKS_TOTAL: &'static str = "miles_rate_limit_checks_total";

    /// Create the counters in a fresh registry.
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create the counters in an existing registry.
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let checks = IntCounterVec::new(
            Opts::new(Self::CHECKS_TOTAL, "Rate limit checks by category and outcome"),
            &["category", "outcome"],
        )?;
        registry.register(Box::new(checks.clone()))?;
        Ok(Self { registry, checks })
    }

    /// Current value of one counter.
    pub fn count(&self, category: LimitCategory, outcome: Outcome) -> u64 {
        self.checks
            .with_label_values(&[category.as_str(), outcome.as_str()])
            .get()
    }

    /// Render all counters in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record(&self, category: LimitCategory, outcome: Outcome) {
        self.checks
            .with_label_values(&[category.as_str(), outcome.as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_counts_by_label() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.record(LimitCategory::LlmRequest, Outcome::Admitted);
        metrics.record(LimitCategory::LlmRequest, Outcome::Admitted);
        metrics.record(LimitCategory::LlmRequest, Outcome::Denied);

        assert_eq!(metrics.count(LimitCategory::LlmRequest, Outcome::Admitted), 2);
        assert_eq!(metrics.count(LimitCategory::LlmRequest, Outcome::Denied), 1);
        assert_eq!(metrics.count(LimitCategory::SourceScan, Outcome::Admitted), 0);
    }

    #[test]
    fn test_render_exposition() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record(LimitCategory::TelegramCommand, Outcome::Denied);

        let text = metrics.render().unwrap();
        assert!(text.contains(PrometheusMetrics::CHECKS_TOTAL));
        assert!(text.contains("category=\"telegram_command\""));
        assert!(text.contains("outcome=\"denied\""));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        assert!(PrometheusMetrics::with_registry(registry.clone()).is_ok());
        assert!(PrometheusMetrics::with_registry(registry).is_err());
    }
}
