//! Exponential backoff shared by the backend client and camera reacquisition

use std::time::{Duration, SystemTime};

/// Retry policy
///
/// Controls how many times a failed operation is retried and how
/// long to wait between attempts using exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (ignored by loops that retry forever)
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy with a single retry, as used for backend requests
    #[must_use]
    pub const fn once(base_delay: Duration) -> Self {
        Self {
            max_retries: 1,
            base_delay,
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Determine whether an HTTP status indicates a transient failure worth retrying.
///
/// Server errors (5xx) and request timeouts (408) are transient. Every other
/// 4xx, including 429 quota responses, is a deliberate rejection by the server.
#[must_use]
pub fn is_recoverable(status: u16) -> bool {
    status == 408 || (500..600).contains(&status)
}

/// Compute the delay before the next retry attempt.
///
/// The delay follows exponential backoff:
/// `min(base_delay * 2^attempt + jitter, max_delay)`.
///
/// Jitter is 0-25% of the computed delay, derived from `SystemTime` to avoid
/// pulling in a full random number generator.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt));
    let base = base.min(policy.max_delay);

    let jitter_nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let jitter_fraction = f64::from(jitter_nanos % 250) / 1000.0;
    let jitter = base.mul_f64(jitter_fraction);

    (base + jitter).min(policy.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- is_recoverable -------------------------------------------------------

    #[test]
    fn recoverable_on_server_errors() {
        assert!(is_recoverable(500));
        assert!(is_recoverable(502));
        assert!(is_recoverable(503));
        assert!(is_recoverable(599));
    }

    #[test]
    fn recoverable_on_request_timeout() {
        assert!(is_recoverable(408));
    }

    #[test]
    fn not_recoverable_on_client_errors() {
        assert!(!is_recoverable(400));
        assert!(!is_recoverable(401));
        assert!(!is_recoverable(403));
        assert!(!is_recoverable(404));
        assert!(!is_recoverable(413));
    }

    #[test]
    fn quota_is_a_rejection() {
        assert!(!is_recoverable(429));
    }

    #[test]
    fn not_recoverable_on_success() {
        assert!(!is_recoverable(200));
    }

    // -- delay_for_attempt ----------------------------------------------------

    #[test]
    fn exponential_growth() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            ..RetryPolicy::default()
        };

        let d0 = delay_for_attempt(&policy, 0);
        let d1 = delay_for_attempt(&policy, 1);
        let d2 = delay_for_attempt(&policy, 2);

        assert!(d0 >= Duration::from_millis(100), "attempt 0: {d0:?}");
        assert!(d1 >= Duration::from_millis(200), "attempt 1: {d1:?}");
        assert!(d2 >= Duration::from_millis(400), "attempt 2: {d2:?}");
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
            ..RetryPolicy::default()
        };

        let d = delay_for_attempt(&policy, 3);
        assert!(d <= policy.max_delay, "delay {d:?} exceeds max");
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        let d = delay_for_attempt(&policy, u32::MAX);
        assert_eq!(d, policy.max_delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            ..RetryPolicy::default()
        };

        for _ in 0..50 {
            let d = delay_for_attempt(&policy, 0);
            assert!(d >= Duration::from_millis(1000), "below base: {d:?}");
            assert!(d <= Duration::from_millis(1250), "above 125%: {d:?}");
        }
    }

    #[test]
    fn default_policy_retries_once() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }
}
