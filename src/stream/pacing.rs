//! Frame pacing and motion-gated rate selection

use std::time::{Duration, Instant};

use crate::frame::StreamView;

/// Keep-alive interval while motion gating is in effect
pub const IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Target interval between frames for the next cycle
///
/// The motion view, or every view when `motion_gating` is set, drops to one
/// frame per second while no motion is active.
pub fn frame_interval(
    view: StreamView,
    motion_gating: bool,
    motion_active: bool,
    max_rate: u32,
) -> Duration {
    let gated = view == StreamView::Motion || motion_gating;
    if gated && !motion_active {
        IDLE_INTERVAL
    } else {
        Duration::from_secs(1) / max_rate.max(1)
    }
}

/// Tracks when the last frame cycle started
#[derive(Debug, Default)]
pub struct Pacer {
    last: Option<Instant>,
}

impl Pacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before the next cycle may run, or `None` if it may run now
    ///
    /// The first cycle is never deferred.
    pub fn remaining(&self, now: Instant, interval: Duration) -> Option<Duration> {
        let last = self.last?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= interval {
            None
        } else {
            Some(interval - elapsed)
        }
    }

    /// Records the start of a frame cycle
    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StreamView::Motion, false, false, IDLE_INTERVAL)]
    #[case(StreamView::Motion, false, true, Duration::from_millis(100))]
    #[case(StreamView::Full, false, false, Duration::from_millis(100))]
    #[case(StreamView::Full, true, false, IDLE_INTERVAL)]
    #[case(StreamView::Full, true, true, Duration::from_millis(100))]
    #[case(StreamView::Mosaic, false, false, Duration::from_millis(100))]
    fn test_frame_interval(
        #[case] view: StreamView,
        #[case] gating: bool,
        #[case] motion: bool,
        #[case] expected: Duration,
    ) {
        assert_eq!(frame_interval(view, gating, motion, 10), expected);
    }

    #[test]
    fn test_first_cycle_not_deferred() {
        let pacer = Pacer::new();
        assert_eq!(pacer.remaining(Instant::now(), IDLE_INTERVAL), None);
    }

    #[test]
    fn test_remaining() {
        let start = Instant::now();
        let mut pacer = Pacer::new();
        pacer.mark(start);

        let interval = Duration::from_millis(100);
        assert_eq!(
            pacer.remaining(start + Duration::from_millis(30), interval),
            Some(Duration::from_millis(70))
        );
        assert_eq!(pacer.remaining(start + interval, interval), None);
    }
}
