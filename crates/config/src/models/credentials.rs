use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CredentialsConfig {
    /// 同一凭证两次被选中之间的最小间隔（毫秒）
    pub min_rotation_interval_ms: u64,
    /// 未指定重置时间时的默认限流时长（秒）
    pub default_rate_limit_seconds: u64,
    /// 每次连续错误增加的退避时长（秒）
    pub error_backoff_step_seconds: u64,
    /// 错误退避的上限（秒）
    pub max_error_backoff_seconds: u64,
    /// 服务商 -> 有序凭证列表（第一个为主凭证，其余为备用）
    pub providers: HashMap<String, Vec<String>>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            min_rotation_interval_ms: 1_000,
            default_rate_limit_seconds: 60,
            error_backoff_step_seconds: 5,
            max_error_backoff_seconds: 300,
            providers: HashMap::new(),
        }
    }
}

impl CredentialsConfig {
    pub fn min_rotation_interval(&self) -> Duration {
        Duration::from_millis(self.min_rotation_interval_ms)
    }

    pub fn default_rate_limit(&self) -> Duration {
        Duration::from_secs(self.default_rate_limit_seconds)
    }

    pub fn error_backoff_step(&self) -> Duration {
        Duration::from_secs(self.error_backoff_step_seconds)
    }

    pub fn max_error_backoff(&self) -> Duration {
        Duration::from_secs(self.max_error_backoff_seconds)
    }
}

impl ConfigValidator for CredentialsConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        for (provider, credentials) in &self.providers {
            ValidationUtils::validate_not_empty(provider, "credentials.providers")?;
            for credential in credentials {
                ValidationUtils::validate_not_empty(
                    credential,
                    &format!("credentials.providers.{provider}"),
                )?;
            }
        }

        ValidationUtils::validate_timeout_seconds(
            self.default_rate_limit_seconds,
            "credentials.default_rate_limit_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.error_backoff_step_seconds,
            "credentials.error_backoff_step_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.max_error_backoff_seconds,
            "credentials.max_error_backoff_seconds",
        )?;

        if self.error_backoff_step_seconds > self.max_error_backoff_seconds {
            return Err(crate::ConfigError::Validation(
                "credentials.error_backoff_step_seconds must not exceed max_error_backoff_seconds"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_config_default() {
        let config = CredentialsConfig::default();
        assert!(config.providers.is_empty());
        assert_eq!(config.default_rate_limit(), Duration::from_secs(60));
        assert_eq!(config.max_error_backoff(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_config_validation() {
        let mut config = CredentialsConfig::default();
        config
            .providers
            .insert("openai".to_string(), vec!["sk-1".to_string(), "".to_string()]);
        assert!(config.validate().is_err());

        let mut config = CredentialsConfig::default();
        config.error_backoff_step_seconds = 600;
        assert!(config.validate().is_err());
    }
}
