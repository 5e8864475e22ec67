//! Circuit breaker guarding directory refreshes

use std::time::{Duration, Instant};

/// Skips directory calls after repeated failures.
///
/// Opens after `threshold` consecutive failures. While open, attempts are
/// refused until `cooldown` has elapsed since the last failure; the counter
/// is then reset and calls resume.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            consecutive_failures: 0,
            last_failure: None,
        }
    }

    /// Whether a call may be attempted at `now`
    pub fn allow(&mut self, now: Instant) -> bool {
        if self.consecutive_failures < self.threshold {
            return true;
        }
        match self.last_failure {
            Some(last) if now.saturating_duration_since(last) < self.cooldown => false,
            _ => {
                tracing::info!("Directory circuit breaker cooldown elapsed, retrying");
                self.consecutive_failures = 0;
                true
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            tracing::debug!("Directory call succeeded after {} failures", self.consecutive_failures);
        }
        self.consecutive_failures = 0;
        self.last_failure = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);
        if self.consecutive_failures == self.threshold {
            tracing::warn!(
                "Directory circuit breaker open after {} failures, pausing for {:?}",
                self.threshold,
                self.cooldown
            );
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        self.consecutive_failures >= self.threshold
            && self
                .last_failure
                .is_some_and(|last| now.saturating_duration_since(last) < self.cooldown)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(10));
        let t0 = Instant::now();

        for i in 0..3 {
            assert!(breaker.allow(t0 + Duration::from_secs(i)));
            breaker.record_failure(t0 + Duration::from_secs(i));
        }

        // Within cooldown of the last failure at t0 + 2s
        assert!(breaker.is_open(t0 + Duration::from_secs(5)));
        assert!(!breaker.allow(t0 + Duration::from_secs(5)));
        assert!(!breaker.allow(t0 + Duration::from_millis(11_999)));
    }

    #[test]
    fn test_resumes_after_cooldown() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(10));
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.record_failure(t0);
        }

        let later = t0 + Duration::from_secs(10);
        assert!(breaker.allow(later));
        assert_eq!(breaker.consecutive_failures(), 0);

        // One more failure does not reopen it
        breaker.record_failure(later);
        assert!(breaker.allow(later));
    }

    #[test]
    fn test_success_resets_count() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(10));
        let t0 = Instant::now();
        breaker.record_failure(t0);
        breaker.record_failure(t0);
        breaker.record_success();
        breaker.record_failure(t0);
        assert!(breaker.allow(t0));
        assert_eq!(breaker.consecutive_failures(), 1);
    }
}
