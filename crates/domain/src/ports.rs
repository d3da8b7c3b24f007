use std::time::Duration;

use async_trait::async_trait;

/// 一次代理探测的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub latency: Option<Duration>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn success(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency: Some(latency),
            error: None,
        }
    }

    pub fn failure<S: Into<String>>(error: S) -> Self {
        Self {
            healthy: false,
            latency: None,
            error: Some(error.into()),
        }
    }
}

/// 代理存活探测接口
///
/// 探测失败通过 [`ProbeOutcome`] 表达，永不返回错误。
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    async fn probe(&self, proxy: &str) -> ProbeOutcome;
}
