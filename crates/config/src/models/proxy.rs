use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// 关闭时 get_proxy 始终返回 None
    pub enabled: bool,
    pub health_check_interval_seconds: u64,
    /// 健康检查探测的目标地址
    pub probe_url: String,
    pub probe_timeout_seconds: u64,
    /// 连续失败多少次后标记为不健康
    pub failure_threshold: u32,
    /// 出口池类型 -> 代理地址列表
    pub pools: HashMap<String, Vec<String>>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            health_check_interval_seconds: 60,
            probe_url: "https://httpbin.org/ip".to_string(),
            probe_timeout_seconds: 10,
            failure_threshold: 3,
            pools: HashMap::new(),
        }
    }
}

impl ProxyConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

impl ConfigValidator for ProxyConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        for (pool, endpoints) in &self.pools {
            ValidationUtils::validate_not_empty(pool, "proxy.pools")?;
            for endpoint in endpoints {
                ValidationUtils::validate_url(endpoint, &format!("proxy.pools.{pool}"))?;
            }
        }

        ValidationUtils::validate_timeout_seconds(
            self.health_check_interval_seconds,
            "proxy.health_check_interval_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.probe_timeout_seconds,
            "proxy.probe_timeout_seconds",
        )?;
        ValidationUtils::validate_url(&self.probe_url, "proxy.probe_url")?;

        if self.failure_threshold == 0 {
            return Err(crate::ConfigError::Validation(
                "proxy.failure_threshold must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_config_default() {
        let config = ProxyConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.health_check_interval(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_proxy_config_rejects_bad_endpoint() {
        let mut config = ProxyConfig::default();
        config
            .pools
            .insert("datacenter".to_string(), vec!["10.0.0.1:8080".to_string()]);
        assert!(config.validate().is_err());

        config.pools.insert(
            "datacenter".to_string(),
            vec!["http://10.0.0.1:8080".to_string()],
        );
        assert!(config.validate().is_ok());
    }
}
