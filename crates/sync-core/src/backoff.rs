//! Doubling wait policy used by the Slurper between empty polls and by the
//! Indexer between failed bulk submissions.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Exponential backoff bounded by `[min_wait, max_wait]`.
///
/// [`Backoff::next_wait`] hands out `min_wait` first and doubles the wait
/// after every call until it reaches `max_wait`; [`Backoff::reset`] starts
/// over from `min_wait`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min_wait: Duration,
    max_wait: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min_wait: Duration, max_wait: Duration) -> Self {
        let max_wait = max_wait.max(min_wait);
        Self {
            min_wait,
            max_wait,
            current: min_wait,
        }
    }

    /// Wait to apply now; advances the policy for the next call.
    pub fn next_wait(&mut self) -> Duration {
        let wait = self.current;
        self.current = self.current.saturating_mul(2).min(self.max_wait);
        wait
    }

    /// The wait the next call to [`Backoff::next_wait`] will return.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.min_wait;
    }

    /// Sleep for the next wait. Returns `false` when cancelled first.
    pub async fn sleep(&mut self, cancel: &CancellationToken) -> bool {
        let wait = self.next_wait();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waits_double_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        let waits: Vec<u64> = (0..7).map(|_| backoff.next_wait().as_millis() as u64).collect();
        assert_eq!(waits, vec![100, 200, 400, 800, 1000, 1000, 1000]);
    }

    #[test]
    fn test_waits_are_monotonic() {
        let mut backoff = Backoff::new(Duration::from_millis(3), Duration::from_secs(10));
        let mut previous = Duration::ZERO;
        for _ in 0..64 {
            let wait = backoff.next_wait();
            assert!(wait > previous || wait == Duration::from_secs(10));
            assert!(wait <= Duration::from_secs(10));
            previous = wait;
        }
    }

    #[test]
    fn test_reset_returns_to_min() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        backoff.next_wait();
        backoff.next_wait();
        assert_eq!(backoff.current(), Duration::from_millis(400));
        backoff.reset();
        assert_eq!(backoff.next_wait(), Duration::from_millis(100));
    }

    #[test]
    fn test_max_below_min_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_millis(10));
        assert_eq!(backoff.next_wait(), Duration::from_secs(1));
        assert_eq!(backoff.next_wait(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_cancellable() {
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!backoff.sleep(&cancel).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let mut backoff = Backoff::new(Duration::from_millis(5), Duration::from_millis(50));
        let start = tokio::time::Instant::now();
        assert!(backoff.sleep(&CancellationToken::new()).await);
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
