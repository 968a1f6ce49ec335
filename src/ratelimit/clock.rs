//! Time sources for window arithmetic.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// A source of seconds since an arbitrary epoch.
///
/// Only differences between readings matter to the window algorithm. When
/// several processes share one store, their clocks must agree on the epoch
/// closely enough for their windows to line up.
pub trait Clock: Send + Sync {
    /// Current time in seconds.
    fn now(&self) -> f64;
}

/// Monotonic clock anchored at the wall-clock time it was created.
///
/// Readings never go backwards within a process, and processes started on
/// hosts with synchronised clocks share an epoch (the Unix epoch).
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_unix: f64,
    anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        Self {
            anchor_unix: now.timestamp_micros() as f64 / 1_000_000.0,
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.anchor_unix + self.anchor.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to.
///
/// Cloning shares the underlying reading, so a test can hold one handle and
/// give another to the limiter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    /// Create a clock reading `start` seconds.
    pub fn new(start: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Jump to an absolute reading.
    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }

    /// Move forward by `secs`.
    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}
