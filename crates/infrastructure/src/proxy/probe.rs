use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use harvest_config::ProxyConfig;
use harvest_domain::{ProbeOutcome, ProxyProbe};

/// 通过代理请求探测地址，2xx 且在超时内返回视为健康
#[derive(Debug, Clone)]
pub struct HttpProxyProbe {
    probe_url: String,
    timeout: Duration,
}

impl HttpProxyProbe {
    pub fn new(probe_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_url: probe_url.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.probe_url.clone(), config.probe_timeout())
    }

    fn client_for(&self, proxy: &str) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(proxy)?)
            .timeout(self.timeout)
            .build()
    }
}

#[async_trait]
impl ProxyProbe for HttpProxyProbe {
    async fn probe(&self, proxy: &str) -> ProbeOutcome {
        let client = match self.client_for(proxy) {
            Ok(client) => client,
            Err(e) => return ProbeOutcome::failure(format!("无效的代理地址: {e}")),
        };

        let started = Instant::now();
        match client.get(&self.probe_url).send().await {
            Ok(response) if response.status().is_success() => {
                let latency = started.elapsed();
                debug!("代理 {} 探测成功，延迟 {:?}", proxy, latency);
                ProbeOutcome::success(latency)
            }
            Ok(response) => ProbeOutcome::failure(format!("探测返回状态码 {}", response.status())),
            Err(e) if e.is_timeout() => ProbeOutcome::failure(format!("探测超时: {:?}", self.timeout)),
            Err(e) => ProbeOutcome::failure(e.to_string()),
        }
    }
}
