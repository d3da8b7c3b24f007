use std::time::Duration;

use harvest_config::RetryConfig;
use harvest_errors::HarvestError;

/// 重试退避策略
///
/// `max_attempts` 为处理器的总调用次数（含首次执行）。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), 3)
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, max_attempts: u32) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
            max_attempts: max_attempts.max(1),
        }
    }

    /// 第 `attempt` 次执行失败后是否还能重试
    pub fn should_retry(&self, attempt: u32, error: &HarvestError) -> bool {
        error.is_retryable() && attempt.saturating_add(1) < self.max_attempts
    }

    /// 未加抖动的退避时长：`min(base * multiplier^attempt, max)`
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;

        let exponential = base_ms * self.backoff_multiplier.powi(exponent);
        let capped = if exponential.is_finite() {
            exponential.min(max_ms)
        } else {
            max_ms
        };
        Duration::from_millis(capped as u64)
    }

    /// 计算第 `attempt` 次失败后的等待时长
    ///
    /// 在名义时长上加入 ±jitter_factor 的均匀抖动以避免雷群效应，结果不超过 `max_delay`。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt).as_millis() as f64;
        let spread = (rand::random::<f64>() - 0.5) * 2.0;
        let jittered = nominal * (1.0 + self.jitter_factor * spread);
        let bounded = jittered.max(0.0).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(bounded as u64)
    }

    /// `delay_for(attempt)` 的取值范围
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let nominal = self.nominal_delay(attempt).as_millis() as f64;
        let lower = nominal * (1.0 - self.jitter_factor);
        let upper = (nominal * (1.0 + self.jitter_factor)).min(self.max_delay.as_millis() as f64);
        (
            Duration::from_millis(lower.max(0.0) as u64),
            Duration::from_millis(upper as u64),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_delay_grows_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.nominal_delay(0), Duration::from_secs(5));
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(10));
        assert_eq!(policy.nominal_delay(3), Duration::from_secs(40));
        assert_eq!(policy.nominal_delay(10), Duration::from_secs(300));
        assert_eq!(policy.nominal_delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_delay_for_stays_within_jitter_window() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let first = policy.delay_for(0);
            assert!(first >= Duration::from_millis(4_000), "{first:?}");
            assert!(first <= Duration::from_millis(6_000), "{first:?}");

            let fourth = policy.delay_for(3);
            assert!(fourth >= Duration::from_millis(32_000), "{fourth:?}");
            assert!(fourth <= Duration::from_millis(48_000), "{fourth:?}");

            assert!(policy.delay_for(12) <= policy.max_delay);
        }
    }

    #[test]
    fn test_delay_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_bounds(3),
            (Duration::from_millis(32_000), Duration::from_millis(48_000))
        );
        let (low, high) = policy.delay_bounds(20);
        assert_eq!(low, Duration::from_millis(240_000));
        assert_eq!(high, Duration::from_millis(300_000));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        let failure = HarvestError::task_failed("timeout");

        assert!(policy.should_retry(0, &failure));
        assert!(policy.should_retry(1, &failure));
        assert!(!policy.should_retry(2, &failure));

        let fatal = HarvestError::invalid_task("missing url");
        assert!(!policy.should_retry(0, &fatal));
        assert!(!policy.should_retry(0, &HarvestError::SchedulerStopped));
    }

    #[test]
    fn test_single_attempt_policy_never_retries() {
        let policy = RetryPolicy::from_config(&RetryConfig::default(), 1);
        assert!(!policy.should_retry(0, &HarvestError::task_failed("boom")));
    }
}
