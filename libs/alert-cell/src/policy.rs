use std::time::Duration;

use shared_config::AppConfig;

/// Retry, deadline and dedup knobs for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub dedup_window: Duration,
    pub deadline: Duration,
    pub channel_timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for DispatchPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.alert_max_attempts.max(1),
            backoff_base: Duration::from_secs(config.alert_backoff_base_secs),
            backoff_cap: Duration::from_secs(config.alert_backoff_cap_secs),
            dedup_window: Duration::from_secs(config.alert_dedup_window_secs),
            deadline: Duration::from_secs(config.alert_dispatch_deadline_secs),
            channel_timeout: Duration::from_secs(config.channel_timeout_secs),
        }
    }
}

impl DispatchPolicy {
    /// Delay before the next attempt after `failures` failed attempts.
    pub fn backoff_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .map_or(self.backoff_cap, |delay| delay.min(self.backoff_cap))
    }

    pub fn has_attempts_left(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_capped() {
        let policy = DispatchPolicy::default();

        assert_eq!(policy.backoff_after(1), Duration::from_secs(30));
        assert_eq!(policy.backoff_after(2), Duration::from_secs(60));
        assert_eq!(policy.backoff_after(3), Duration::from_secs(120));
        assert_eq!(policy.backoff_after(5), Duration::from_secs(480));
        assert_eq!(policy.backoff_after(6), Duration::from_secs(600));
        assert_eq!(policy.backoff_after(40), Duration::from_secs(600));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = DispatchPolicy::default();

        assert!(policy.has_attempts_left(2));
        assert!(!policy.has_attempts_left(3));
    }
}
