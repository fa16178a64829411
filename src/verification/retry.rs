//! Retry throttling for verification code requests.
//!
//! Every phone number carries a [`RetryState`] alongside its outstanding code.
//! [`RetryPolicy::check`] decides from that state and the current time whether
//! another code may be issued. Two windows apply independently: a short one
//! between any two requests, and a long one once the number of requests has
//! passed the configured threshold.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::VerificationConfig;

/// Throttling thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Minimum spacing between two requests
    pub wait_time: Duration,
    /// Requests allowed before the long cooldown applies
    pub max_retry_counts: u32,
    /// Cooldown once `max_retry_counts` is exceeded
    pub retries_wait_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&VerificationConfig::default())
    }
}

impl From<&VerificationConfig> for RetryPolicy {
    fn from(config: &VerificationConfig) -> Self {
        Self {
            wait_time: config.wait_time(),
            max_retry_counts: config.verification_max_retry_counts,
            retries_wait_time: config.retries_wait_time(),
        }
    }
}

/// Per-phone request history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub num_of_retries: u32,
    pub last_retry: Option<DateTime<Utc>>,
}

impl RetryState {
    /// State to persist once a request made at `now` has been allowed.
    pub fn record_attempt(&self, now: DateTime<Utc>) -> Self {
        Self {
            num_of_retries: self.num_of_retries.saturating_add(1),
            last_retry: Some(now),
        }
    }
}

/// Reason a request was denied, with the rounded-up remaining wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    TooFrequent { seconds: i64 },
    TooManyRetries { minutes: i64 },
}

impl RetryPolicy {
    pub fn check(&self, state: &RetryState, now: DateTime<Utc>) -> Result<(), Throttle> {
        let Some(last_retry) = state.last_retry else {
            return Ok(());
        };

        if let Some(left) = remaining(last_retry, self.wait_time, now) {
            return Err(Throttle::TooFrequent {
                seconds: round_up(left, Duration::seconds(1)),
            });
        }

        if state.num_of_retries > self.max_retry_counts {
            if let Some(left) = remaining(last_retry, self.retries_wait_time, now) {
                return Err(Throttle::TooManyRetries {
                    minutes: round_up(left, Duration::minutes(1)),
                });
            }
        }

        Ok(())
    }
}

/// Time left in the `window` opened at `start`, or `None` once it has
/// passed. A window ending beyond the representable range never passes.
fn remaining(start: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> Option<Duration> {
    match start.checked_add_signed(window) {
        Some(end) if now < end => Some(end - now),
        Some(_) => None,
        None => Some(window),
    }
}

/// Whole `unit`s needed to cover `remaining`, never less than one.
fn round_up(remaining: Duration, unit: Duration) -> i64 {
    let remaining = remaining.num_microseconds().unwrap_or(i64::MAX);
    let unit = unit.num_microseconds().unwrap_or(1).max(1);
    let whole = remaining / unit + i64::from(remaining % unit != 0);
    whole.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn state(num_of_retries: u32, last_retry: i64) -> RetryState {
        RetryState {
            num_of_retries,
            last_retry: Some(at(last_retry)),
        }
    }

    #[test]
    fn test_first_request_is_allowed() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.check(&RetryState::default(), at(0)), Ok(()));
    }

    #[test]
    fn test_short_window_rounds_up_to_seconds() {
        let policy = RetryPolicy::default();
        let state = state(1, 0);

        assert_eq!(
            policy.check(&state, at(0)),
            Err(Throttle::TooFrequent { seconds: 20 })
        );
        assert_eq!(
            policy.check(&state, at(19)),
            Err(Throttle::TooFrequent { seconds: 1 })
        );

        let almost = at(19) + Duration::milliseconds(999);
        assert_eq!(
            policy.check(&state, almost),
            Err(Throttle::TooFrequent { seconds: 1 })
        );

        let partial = at(4) + Duration::milliseconds(500);
        assert_eq!(
            policy.check(&state, partial),
            Err(Throttle::TooFrequent { seconds: 16 })
        );

        assert_eq!(policy.check(&state, at(20)), Ok(()));
    }

    #[test]
    fn test_long_window_applies_only_past_threshold() {
        let policy = RetryPolicy::default();

        // Exactly at the threshold the long cooldown does not apply yet.
        assert_eq!(policy.check(&state(5, 0), at(21)), Ok(()));

        assert_eq!(
            policy.check(&state(6, 0), at(21)),
            Err(Throttle::TooManyRetries { minutes: 10 })
        );
        assert_eq!(
            policy.check(&state(6, 0), at(541)),
            Err(Throttle::TooManyRetries { minutes: 1 })
        );
        assert_eq!(policy.check(&state(6, 0), at(600)), Ok(()));
    }

    #[test]
    fn test_short_window_is_checked_before_long_window() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.check(&state(9, 0), at(5)),
            Err(Throttle::TooFrequent { seconds: 15 })
        );
    }

    #[test]
    fn test_windows_are_independent_thresholds() {
        // A long cooldown shorter than the short window never masks it.
        let policy = RetryPolicy {
            wait_time: Duration::seconds(30),
            max_retry_counts: 1,
            retries_wait_time: Duration::seconds(10),
        };

        assert_eq!(
            policy.check(&state(2, 0), at(15)),
            Err(Throttle::TooFrequent { seconds: 15 })
        );
        assert_eq!(policy.check(&state(2, 0), at(30)), Ok(()));
    }

    #[test]
    fn test_record_attempt() {
        let updated = state(2, 0).record_attempt(at(60));
        assert_eq!(updated.num_of_retries, 3);
        assert_eq!(updated.last_retry, Some(at(60)));

        let first = RetryState::default().record_attempt(at(0));
        assert_eq!(first, state(1, 0));
    }

    #[test]
    fn test_window_past_max_datetime_still_throttles() {
        let policy = RetryPolicy::default();
        let last_retry = DateTime::<Utc>::MAX_UTC - Duration::seconds(5);
        let state = RetryState {
            num_of_retries: 9,
            last_retry: Some(last_retry),
        };

        assert_eq!(
            policy.check(&state, last_retry),
            Err(Throttle::TooFrequent { seconds: 20 })
        );
    }

    #[test]
    fn test_oversized_config_wait_keeps_short_window() {
        let config = VerificationConfig {
            verification_wait_time_secs: u64::MAX,
            ..VerificationConfig::default()
        };
        let policy = RetryPolicy::from(&config);

        assert_eq!(
            policy.check(&state(1, 0), at(0)),
            Err(Throttle::TooFrequent { seconds: 365 * 24 * 60 * 60 })
        );
    }

    #[test]
    fn test_policy_from_config() {
        let config = VerificationConfig {
            verification_wait_time_secs: 5,
            verification_retries_wait_time_secs: 120,
            verification_max_retry_counts: 2,
            ..VerificationConfig::default()
        };

        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.wait_time, Duration::seconds(5));
        assert_eq!(policy.retries_wait_time, Duration::minutes(2));
        assert_eq!(policy.max_retry_counts, 2);
    }
}
