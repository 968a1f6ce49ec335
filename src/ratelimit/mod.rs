//! Rate limiting logic and state management.

mod backend;
mod clock;
mod decision;
mod exceeded;
mod key;
mod limiter;
mod local;
mod policy;
mod shared;
mod window;

pub use backend::WindowBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, Verdict, UNLIMITED_REMAINING};
pub use exceeded::RateLimitExceeded;
pub use key::LimiterKey;
pub use limiter::{FailureMode, LimitStats, RateLimiter};
pub use local::{LocalWindowStore, DEFAULT_MAX_KEYS};
pub use policy::{LimitCategory, PolicyTable, RateLimit};
pub use shared::{SharedWindowStore, DEFAULT_STORE_TIMEOUT};
pub use window::WindowState;
