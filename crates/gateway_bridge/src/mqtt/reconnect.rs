use std::time::Duration;

/// Fixed-backoff, unbounded-retry reconnection policy.
///
/// Every broker session failure waits the same delay before the next
/// attempt; the policy never gives up while the process is alive. The
/// failure counter only feeds logging and resets on a successful
/// connection. No exponential backoff and no jitter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    backoff: Duration,
    consecutive_failures: u32,
}

impl ReconnectPolicy {
    pub fn new(backoff: Duration) -> Self {
        Self {
            backoff,
            consecutive_failures: 0,
        }
    }

    /// Record a session failure and return the delay to wait before
    /// the next connection attempt.
    pub fn on_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.backoff
    }

    pub fn on_connected(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_fixed_across_attempts() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(5));
        for _ in 0..100 {
            assert_eq!(policy.on_failure(), Duration::from_secs(5));
        }
        assert_eq!(policy.consecutive_failures(), 100);
    }

    #[test]
    fn test_counter_resets_on_connect() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(5));
        policy.on_failure();
        policy.on_failure();
        assert_eq!(policy.consecutive_failures(), 2);

        policy.on_connected();
        assert_eq!(policy.consecutive_failures(), 0);
    }

    #[test]
    fn test_policy_never_exhausts() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(10));
        policy.consecutive_failures = u32::MAX;
        // Saturates instead of wrapping; the policy keeps retrying
        assert_eq!(policy.on_failure(), Duration::from_millis(10));
        assert_eq!(policy.consecutive_failures(), u32::MAX);
    }
}
