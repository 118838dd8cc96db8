//! Monotonic time source used for pacing and presentation timestamps

use std::time::Instant;

/// Source of monotonic time
///
/// Sessions read time only through this trait so pacing and timestamp
/// behaviour can be driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
