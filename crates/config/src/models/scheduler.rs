use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// 调度器认识的优先级名称
pub const KNOWN_TIERS: [&str; 3] = ["high", "medium", "low"];

/// 单个优先级层的并发配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierConfig {
    /// 优先级名称（high / medium / low）
    pub name: String,
    /// 该层允许同时执行的最大任务数
    pub max_concurrency: usize,
}

impl TierConfig {
    pub fn new(name: &str, max_concurrency: usize) -> Self {
        Self {
            name: name.to_string(),
            max_concurrency,
        }
    }
}

/// 重试退避配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 随机抖动范围（0.0-1.0），0.2 表示 ±20%
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl ConfigValidator for RetryConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.base_delay_ms == 0 {
            return Err(crate::ConfigError::Validation(
                "scheduler.retry.base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(crate::ConfigError::Validation(
                "scheduler.retry.base_delay_ms must be less than or equal to max_delay_ms"
                    .to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(crate::ConfigError::Validation(
                "scheduler.retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        ValidationUtils::validate_ratio(self.jitter_factor, "scheduler.retry.jitter_factor")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 每个任务最多调用处理器的次数（含首次执行）
    pub max_attempts: u32,
    /// 监控事件广播通道容量
    pub event_buffer: usize,
    /// 按优先级从高到低排列的层配置，每层拥有独立的并发池
    pub tiers: Vec<TierConfig>,
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            event_buffer: 1024,
            tiers: vec![
                TierConfig::new("high", 10),
                TierConfig::new("medium", 5),
                TierConfig::new("low", 2),
            ],
            retry: RetryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn tier(&self, name: &str) -> Option<&TierConfig> {
        self.tiers.iter().find(|tier| tier.name == name)
    }
}

impl ConfigValidator for SchedulerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.tiers.is_empty() {
            return Err(crate::ConfigError::Validation(
                "scheduler.tiers cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for tier in &self.tiers {
            ValidationUtils::validate_not_empty(&tier.name, "scheduler.tiers.name")?;
            if !KNOWN_TIERS.contains(&tier.name.to_lowercase().as_str()) {
                return Err(crate::ConfigError::Validation(format!(
                    "Unknown scheduler tier: {} (expected one of {:?})",
                    tier.name, KNOWN_TIERS
                )));
            }
            ValidationUtils::validate_count(
                tier.max_concurrency,
                &format!("scheduler.tiers.{}.max_concurrency", tier.name),
            )?;
            if !seen.insert(tier.name.to_lowercase()) {
                return Err(crate::ConfigError::Validation(format!(
                    "Duplicate scheduler tier: {}",
                    tier.name
                )));
            }
        }

        if self.max_attempts == 0 {
            return Err(crate::ConfigError::Validation(
                "scheduler.max_attempts must be greater than 0".to_string(),
            ));
        }

        ValidationUtils::validate_count(self.event_buffer, "scheduler.event_buffer")?;
        self.retry.validate()
    }
}
