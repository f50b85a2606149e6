//! Per-job pacing of external classification calls
//!
//! Each job controller builds one limiter per accepted run from the run's
//! configured delay, so concurrent job types never throttle each other.
//! `acquire` is the single intentional blocking point inside a worker loop.

use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter};

/// Enforces a minimum interval between consecutive `acquire` calls.
/// A zero delay disables throttling entirely.
pub struct ServiceCallLimiter {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl ServiceCallLimiter {
    #[must_use]
    pub fn new(min_delay: Duration) -> Self {
        let limiter = if min_delay.is_zero() {
            None
        } else {
            // Burst of one cell per period: consecutive permits are spaced
            // by at least `min_delay`, the first one is immediate.
            Quota::with_period(min_delay).map(RateLimiter::direct)
        };
        Self { limiter }
    }

    #[must_use]
    pub fn from_seconds(delay_seconds: f64) -> Self {
        if delay_seconds > 0.0 && delay_seconds.is_finite() {
            Self::new(Duration::from_secs_f64(delay_seconds))
        } else {
            Self::new(Duration::ZERO)
        }
    }

    /// Wait until the minimum interval since the previous permit has
    /// elapsed.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.limiter.is_some()
    }
}
