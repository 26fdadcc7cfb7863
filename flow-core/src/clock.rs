//! Time source abstraction.
//!
//! Protocol timing is a fixed delay followed by a bounded poll count, so the
//! only primitives needed are "now" and a blocking delay. Firmware backs this
//! with `embassy-time`, the emulator with `std::time`, and tests with a
//! virtual clock that advances instantly.

use core::time::Duration;

/// Monotonic instant wrapper used for event timestamps.
pub trait MonotonicInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Blocking time source.
pub trait Clock {
    type Instant: MonotonicInstant;

    /// Current instant.
    fn now(&self) -> Self::Instant;

    /// Blocks for `duration`.
    fn delay(&mut self, duration: Duration);
}

impl<C> Clock for &mut C
where
    C: Clock,
{
    type Instant = C::Instant;

    fn now(&self) -> Self::Instant {
        (**self).now()
    }

    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration);
    }
}
