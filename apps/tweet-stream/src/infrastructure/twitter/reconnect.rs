//! Reconnection Policy
//!
//! Exponential backoff with jitter, plus the two schedules the connection
//! manager switches between: one for transient failures and a longer one
//! for rate limiting. Both reset after every successful connection.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::BackoffSettings;

/// Exponential backoff over a single schedule.
#[derive(Debug)]
pub struct Backoff {
    settings: BackoffSettings,
    current_delay: Duration,
    attempt_count: u32,
}

impl Backoff {
    /// Create a backoff starting at the initial delay.
    ///
    /// Out-of-range multiplier or jitter values are clamped, see
    /// [`BackoffSettings::normalized`].
    #[must_use]
    pub fn new(settings: BackoffSettings) -> Self {
        let settings = settings.normalized();
        let initial_delay = settings.initial_delay;
        Self {
            settings,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Get the next delay and advance the schedule.
    ///
    /// Returns `None` once `max_attempts` retries have been handed out.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.settings.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.settings.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay.min(self.settings.max_delay))
    }

    /// Return to the initial delay.
    pub const fn reset(&mut self) {
        self.current_delay = self.settings.initial_delay;
        self.attempt_count = 0;
    }

    /// Retries handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another retry is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.settings.max_attempts == 0 || self.attempt_count < self.settings.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.settings.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.settings.jitter_factor;
        if !jitter_range.is_finite() {
            return duration;
        }
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

/// Which schedule a failure draws its delay from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Network errors, 5xx, stalls and dropped connections.
    Transient,
    /// HTTP 420/429.
    RateLimit,
}

/// The pair of schedules used between connection attempts.
#[derive(Debug)]
pub struct ReconnectSchedule {
    transient: Backoff,
    rate_limit: Backoff,
}

impl ReconnectSchedule {
    /// Create both schedules.
    #[must_use]
    pub fn new(transient: BackoffSettings, rate_limit: BackoffSettings) -> Self {
        Self {
            transient: Backoff::new(transient),
            rate_limit: Backoff::new(rate_limit),
        }
    }

    /// Next delay on the given schedule, or `None` when it is exhausted.
    #[must_use]
    pub fn next_delay(&mut self, schedule: Schedule) -> Option<Duration> {
        self.backoff_mut(schedule).next_delay()
    }

    /// Attempts handed out on the given schedule since the last reset.
    #[must_use]
    pub const fn attempt_count(&self, schedule: Schedule) -> u32 {
        match schedule {
            Schedule::Transient => self.transient.attempt_count(),
            Schedule::RateLimit => self.rate_limit.attempt_count(),
        }
    }

    /// Reset both schedules after a successful connection.
    pub const fn reset(&mut self) {
        self.transient.reset();
        self.rate_limit.reset();
    }

    const fn backoff_mut(&mut self, schedule: Schedule) -> &mut Backoff {
        match schedule {
            Schedule::Transient => &mut self.transient,
            Schedule::RateLimit => &mut self.rate_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(initial_ms: u64, max_ms: u64, multiplier: f64, max_attempts: u32) -> BackoffSettings {
        BackoffSettings {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn exponential_growth() {
        let mut backoff = Backoff::new(settings(250, 16_000, 2.0, 0));

        let delays: Vec<u128> = (0..5)
            .map(|_| backoff.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 4000]);
    }

    #[test]
    fn growth_is_capped() {
        let mut backoff = Backoff::new(settings(1000, 2000, 4.0, 0));

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn initial_delay_above_cap_is_clamped() {
        let mut backoff = Backoff::new(settings(5000, 1000, 2.0, 0));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn max_attempts() {
        let mut backoff = Backoff::new(settings(100, 1000, 2.0, 3));

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.attempt_count(), 3);

        assert!(backoff.next_delay().is_none());
        assert!(!backoff.should_retry());
    }

    #[test]
    fn reset_returns_to_base() {
        let mut backoff = Backoff::new(settings(100, 10_000, 2.0, 3));
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();

        backoff.reset();

        assert_eq!(backoff.attempt_count(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_bounds() {
        for _ in 0..100 {
            let mut backoff = Backoff::new(BackoffSettings {
                jitter_factor: 0.1,
                ..settings(1000, 10_000, 2.0, 0)
            });

            let millis = backoff.next_delay().unwrap().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test]
    fn non_finite_jitter_is_ignored() {
        let mut backoff = Backoff::new(BackoffSettings {
            jitter_factor: f64::NAN,
            ..settings(1000, 10_000, 2.0, 0)
        });
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));

        let mut backoff = Backoff::new(BackoffSettings {
            jitter_factor: f64::INFINITY,
            ..settings(1000, 10_000, 2.0, 0)
        });
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn degenerate_multiplier_never_reaches_zero() {
        for multiplier in [0.0, -3.0, f64::NAN, f64::INFINITY] {
            let mut backoff = Backoff::new(settings(100, 1000, multiplier, 0));
            for _ in 0..3 {
                assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
            }
        }
    }

    #[test]
    fn schedules_advance_independently() {
        let mut schedule =
            ReconnectSchedule::new(settings(250, 16_000, 2.0, 0), settings(60_000, 960_000, 2.0, 0));

        assert_eq!(schedule.next_delay(Schedule::Transient), Some(Duration::from_millis(250)));
        assert_eq!(schedule.next_delay(Schedule::Transient), Some(Duration::from_millis(500)));
        assert_eq!(schedule.next_delay(Schedule::RateLimit), Some(Duration::from_secs(60)));
        assert_eq!(schedule.next_delay(Schedule::RateLimit), Some(Duration::from_secs(120)));
        assert_eq!(schedule.attempt_count(Schedule::Transient), 2);
        assert_eq!(schedule.attempt_count(Schedule::RateLimit), 2);

        schedule.reset();

        assert_eq!(schedule.next_delay(Schedule::Transient), Some(Duration::from_millis(250)));
        assert_eq!(schedule.next_delay(Schedule::RateLimit), Some(Duration::from_secs(60)));
    }

    #[test]
    fn default_schedules_follow_guidance() {
        let mut schedule =
            ReconnectSchedule::new(BackoffSettings::transient(), BackoffSettings::rate_limit());

        assert_eq!(schedule.next_delay(Schedule::RateLimit), Some(Duration::from_secs(60)));
        for _ in 0..20 {
            let delay = schedule.next_delay(Schedule::Transient).unwrap();
            assert!(delay <= Duration::from_secs(16));
        }
    }
}
