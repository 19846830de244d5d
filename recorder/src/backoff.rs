//! Retry delays for a camera whose capture keeps failing.

use std::time::Duration;

/// Consecutive-failure counter over a fixed, increasing delay schedule.
///
/// The k-th consecutive failure waits `schedule[min(k - 1, len - 1)]`: the
/// counter saturates on the last entry and goes back to the first one after
/// any clean capture.
#[derive(Debug, Clone)]
pub struct Backoff {
    schedule: Vec<Duration>,
    failures: usize,
}

impl Backoff {
    /// `schedule` must not be empty (the config validation guarantees it).
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self {
            schedule,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn on_failure(&mut self) -> Duration {
        let last = self.schedule.len().saturating_sub(1);
        let delay = self
            .schedule
            .get(self.failures.min(last))
            .copied()
            .unwrap_or_default();
        self.failures = (self.failures + 1).min(self.schedule.len());
        delay
    }

    /// Forget past failures after a clean capture.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> usize {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mins(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    #[test]
    fn test_schedule_saturates() {
        let mut backoff = Backoff::new(vec![mins(1), mins(5), mins(10)]);
        assert_eq!(backoff.on_failure(), mins(1));
        assert_eq!(backoff.on_failure(), mins(5));
        assert_eq!(backoff.on_failure(), mins(10));
        assert_eq!(backoff.on_failure(), mins(10));
        assert_eq!(backoff.on_failure(), mins(10));
    }

    #[test]
    fn test_kth_failure_matches_schedule() {
        let schedule = vec![mins(1), mins(5), mins(10), mins(30), mins(60)];
        let mut backoff = Backoff::new(schedule.clone());
        for k in 1..=12 {
            let expected = schedule[(k - 1).min(schedule.len() - 1)];
            assert_eq!(backoff.on_failure(), expected, "failure #{k}");
        }
    }

    #[test]
    fn test_reset_after_clean_capture() {
        let mut backoff = Backoff::new(vec![mins(1), mins(5)]);
        backoff.on_failure();
        backoff.on_failure();
        backoff.on_failure();
        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.on_failure(), mins(1));
    }

    #[test]
    fn test_empty_schedule_never_panics() {
        let mut backoff = Backoff::new(Vec::new());
        assert_eq!(backoff.on_failure(), Duration::ZERO);
    }
}
