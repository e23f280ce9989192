//! Monotonic time primitives used by rate-limited emission and bucketizing.
use std::time::Duration;

use crate::stream::BoxFuture;

/// A monotonic clock reading, expressed as an offset from some fixed
/// epoch the implementation chooses (for [`super::TokioRuntime`], the
/// process start).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicTimePoint(Duration);

impl MonotonicTimePoint {
    pub fn from_offset(offset: Duration) -> Self {
        MonotonicTimePoint(offset)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn saturating_duration_since(&self, earlier: MonotonicTimePoint) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    pub fn saturating_add(&self, delta: Duration) -> MonotonicTimePoint {
        MonotonicTimePoint(self.0.saturating_add(delta))
    }
}

/// Time and delay primitives every rate-limited or time-bucketed component
/// depends on, injected rather than calling `tokio::time` directly so the
/// rest of the crate stays executor-agnostic.
pub trait TimeDriver: Send + Sync + 'static {
    fn now(&self) -> MonotonicTimePoint;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Default implementation sleeps for the saturating difference between
    /// `deadline` and `now()`; if the clock has already passed `deadline`
    /// this resolves immediately.
    fn sleep_until(&self, deadline: MonotonicTimePoint) -> BoxFuture<'static, ()> {
        let now = self.now();
        let wait = deadline.saturating_duration_since(now);
        self.sleep(wait)
    }
}
