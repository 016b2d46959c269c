//! Stop Signal
//!
//! One-shot broadcast observed by every suspension point of the background
//! task. The first caller to fire it is recorded; later calls are no-ops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cloneable one-shot stop signal.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl StopSignal {
    /// Create an unfired signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal.
    ///
    /// Returns `true` only for the call that actually fired it.
    pub fn stop(&self) -> bool {
        let first = self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.token.cancel();
        }
        first
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal has fired.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn only_first_stop_fires() {
        let signal = StopSignal::new();
        assert!(!signal.is_stopped());

        assert!(signal.stop());
        assert!(!signal.stop());
        assert!(signal.is_stopped());
    }

    #[test]
    fn clones_share_state() {
        let signal = StopSignal::new();
        let observer = signal.clone();

        assert!(observer.stop());
        assert!(signal.is_stopped());
        assert!(!signal.stop());
    }

    #[tokio::test]
    async fn concurrent_stops_fire_once() {
        let signal = StopSignal::new();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.stop() })
            })
            .collect();

        let mut fired = 0;
        for handle in handles {
            if handle.await.unwrap() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[tokio::test]
    async fn observers_wake_on_stop() {
        let signal = StopSignal::new();
        let observer = signal.clone();
        let waiter = tokio::spawn(async move { observer.stopped().await });

        signal.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "observer should wake after stop");
    }
}
