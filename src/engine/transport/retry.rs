// Retry policy: (attempt, failure kind) -> retry with delay, or give up

use rand::Rng;
use std::time::Duration;

/// What went wrong on one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Connect,
    /// Name resolution failed; treated as permanent
    Dns,
    Status(u16),
    /// Request could not be built or sent for a non-network reason
    Other,
}

impl FailureKind {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connect => true,
            Self::Status(status) => is_transient_status(*status),
            Self::Dns | Self::Other => false,
        }
    }
}

pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts in total, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    pub fn decide(&self, attempt: u32, kind: FailureKind) -> RetryDecision {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let millis = self.max_jitter.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        };
        decide(self, attempt, kind, jitter)
    }

    /// Delay before attempt `attempt + 1`: base, 2x base, 4x base...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Pure decision function; `jitter` is supplied by the caller
pub fn decide(policy: &RetryPolicy, attempt: u32, kind: FailureKind, jitter: Duration) -> RetryDecision {
    if !kind.is_transient() || attempt >= policy.max_attempts {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry(policy.backoff(attempt) + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn test_transient_failures_retry_until_budget() {
        let policy = RetryPolicy::default();
        let jitter = Duration::from_millis(10);
        assert_eq!(
            decide(&policy, 1, FailureKind::Status(503), jitter),
            RetryDecision::Retry(Duration::from_millis(1010))
        );
        assert_eq!(
            decide(&policy, 2, FailureKind::Timeout, jitter),
            RetryDecision::Retry(Duration::from_millis(2010))
        );
        assert_eq!(
            decide(&policy, 3, FailureKind::Connect, jitter),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_permanent_failures_never_retry() {
        let policy = RetryPolicy::default();
        for kind in [
            FailureKind::Status(404),
            FailureKind::Status(403),
            FailureKind::Dns,
            FailureKind::Other,
        ] {
            assert_eq!(decide(&policy, 1, kind, Duration::ZERO), RetryDecision::GiveUp);
        }
    }

    #[test]
    fn test_429_is_transient() {
        assert!(FailureKind::Status(429).is_transient());
        assert!(!FailureKind::Status(400).is_transient());
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_jitter: Duration::from_millis(50),
        };
        for _ in 0..20 {
            match policy.decide(1, FailureKind::Timeout) {
                RetryDecision::Retry(d) => {
                    assert!(d >= Duration::from_millis(100));
                    assert!(d <= Duration::from_millis(150));
                }
                RetryDecision::GiveUp => panic!("timeout should be retried"),
            }
        }
    }
}
