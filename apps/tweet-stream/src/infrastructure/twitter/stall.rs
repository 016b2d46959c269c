//! Stall Detection
//!
//! The server sends a blank keep-alive line every few seconds, so silence
//! longer than the stall window means the connection is dead even if the
//! socket is still open.

use std::time::Duration;

use tokio::time::Instant;

/// Stand-in for a window too large to represent as an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Tracks the stall window against the decoder's last activity.
#[derive(Debug, Clone, Copy)]
pub struct StallDetector {
    timeout: Duration,
}

impl StallDetector {
    /// Create a detector with the given window.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The configured window.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// When the connection counts as stalled if nothing else arrives.
    ///
    /// Saturates to roughly thirty years out when the window overflows.
    #[must_use]
    pub fn deadline(&self, last_activity: Instant) -> Instant {
        last_activity
            .checked_add(self.timeout)
            .or_else(|| last_activity.checked_add(FAR_FUTURE))
            .unwrap_or(last_activity)
    }

    /// Whether the window has elapsed since the last activity.
    #[must_use]
    pub fn is_stalled(&self, last_activity: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_activity) >= self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_last_activity_plus_window() {
        let detector = StallDetector::new(Duration::from_secs(90));
        let start = Instant::now();
        assert_eq!(detector.deadline(start), start + Duration::from_secs(90));
    }

    #[test]
    fn oversized_window_saturates() {
        let detector = StallDetector::new(Duration::from_secs(u64::MAX));
        let start = Instant::now();

        assert!(detector.deadline(start) >= start + FAR_FUTURE);
        assert!(!detector.is_stalled(start, start + Duration::from_secs(86_400)));
    }

    #[test]
    fn stalled_only_after_window() {
        let detector = StallDetector::new(Duration::from_secs(90));
        let start = Instant::now();

        assert!(!detector.is_stalled(start, start + Duration::from_secs(89)));
        assert!(detector.is_stalled(start, start + Duration::from_secs(90)));
        assert!(detector.is_stalled(start, start + Duration::from_secs(300)));
    }

    #[test]
    fn activity_in_the_future_is_not_stalled() {
        let detector = StallDetector::new(Duration::from_secs(1));
        let now = Instant::now();
        assert!(!detector.is_stalled(now + Duration::from_secs(5), now));
    }
}
