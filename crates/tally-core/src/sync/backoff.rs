//! Retry schedule for failed queue entries

use std::time::Duration;

use crate::config::BackoffConfig;
use crate::db::FailureUpdate;

/// Exponential backoff shared by every queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: u32,
    pub ceiling: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            multiplier: config.multiplier,
            ceiling: Duration::from_millis(config.ceiling_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl BackoffPolicy {
    /// Wait before retry number `attempt` (1-based): `min(base * multiplier^(attempt-1), ceiling)`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = u128::from(self.multiplier).checked_pow(exponent);
        let delay_ms = factor.and_then(|factor| self.base.as_millis().checked_mul(factor));
        match delay_ms {
            Some(ms) if ms < self.ceiling.as_millis() => {
                Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
            }
            _ => self.ceiling,
        }
    }

    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Bookkeeping for an entry that just failed its `previous_attempts + 1`th try
    pub fn failure(&self, previous_attempts: u32, now: i64, message: impl Into<String>) -> FailureUpdate {
        let attempts = previous_attempts.saturating_add(1);
        let delay_ms = i64::try_from(self.delay(attempts).as_millis()).unwrap_or(i64::MAX);
        FailureUpdate {
            attempts,
            next_retry_at: now.saturating_add(delay_ms),
            message: message.into(),
            exhausted: self.is_exhausted(attempts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_schedule_doubles_from_two_seconds() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(5), Duration::from_secs(32));
        assert_eq!(policy.max_attempts, 8);
    }

    #[test]
    fn delay_is_capped_at_ceiling() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(9), Duration::from_secs(300));
        assert_eq!(policy.delay(200), Duration::from_secs(300));
    }

    #[test]
    fn failure_schedules_next_retry() {
        let policy = BackoffPolicy::default();
        let update = policy.failure(0, 1_000, "HTTP 503");
        assert_eq!(
            update,
            FailureUpdate {
                attempts: 1,
                next_retry_at: 3_000,
                message: "HTTP 503".to_string(),
                exhausted: false,
            }
        );
    }

    #[test]
    fn last_attempt_exhausts_entry() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            ..BackoffPolicy::default()
        };
        assert!(!policy.failure(1, 0, "timeout").exhausted);
        assert!(policy.failure(2, 0, "timeout").exhausted);
    }
}
