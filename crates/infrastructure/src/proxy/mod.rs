//! 代理轮换与健康检查
//!
//! 所有代理端点的健康状态、使用顺序和消费者分配都放在同一把锁下，
//! 选择、探测结果记录和错误标记彼此原子。探测本身在锁外并发执行。

mod probe;

pub use probe::HttpProxyProbe;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use harvest_config::ProxyConfig;
use harvest_domain::{EventBus, EventKind, ProbeOutcome, ProxyProbe};
use harvest_errors::{HarvestError, HarvestResult};

#[derive(Debug, Clone)]
struct Endpoint {
    uri: String,
    pool: String,
    healthy: bool,
    consecutive_failures: u32,
    last_checked: Option<DateTime<Utc>>,
    latency: Option<Duration>,
    /// 最近一次被选中的序号，0 表示从未使用
    last_used_seq: u64,
    last_used_at: Option<DateTime<Utc>>,
}

impl Endpoint {
    fn new(pool: &str, uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            pool: pool.to_string(),
            healthy: true,
            consecutive_failures: 0,
            last_checked: None,
            latency: None,
            last_used_seq: 0,
            last_used_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct ProxyRegistry {
    endpoints: Vec<Endpoint>,
    assignments: HashMap<String, Vec<String>>,
    use_seq: u64,
}

impl ProxyRegistry {
    fn endpoint_mut(&mut self, uri: &str) -> Option<&mut Endpoint> {
        self.endpoints.iter_mut().find(|e| e.uri == uri)
    }

    fn all_uris(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.uri.clone()).collect()
    }

    fn healthy_among(&self, uris: &[String]) -> Vec<String> {
        uris.iter()
            .filter(|uri| {
                self.endpoints
                    .iter()
                    .any(|e| &e.uri == *uri && e.healthy)
            })
            .cloned()
            .collect()
    }
}

/// 单个代理端点的状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyStatus {
    pub uri: String,
    pub pool: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// 一轮健康检查的汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCheckSummary {
    pub probed: usize,
    pub healthy: usize,
    pub unhealthy: usize,
}

pub struct ProxyRotator {
    enabled: bool,
    failure_threshold: u32,
    check_interval: Duration,
    probe: Arc<dyn ProxyProbe>,
    registry: Mutex<ProxyRegistry>,
    events: EventBus,
}

impl ProxyRotator {
    pub fn new(config: &ProxyConfig, probe: Arc<dyn ProxyProbe>, events: EventBus) -> Self {
        let mut pools: Vec<_> = config.pools.iter().collect();
        pools.sort_by(|a, b| a.0.cmp(b.0));

        let mut registry = ProxyRegistry::default();
        for (pool, uris) in pools {
            for uri in uris {
                if registry.endpoints.iter().all(|e| &e.uri != uri) {
                    registry.endpoints.push(Endpoint::new(pool, uri));
                }
            }
        }

        info!(
            "代理轮换器已初始化，启用: {}，端点数量: {}",
            config.enabled,
            registry.endpoints.len()
        );
        Self {
            enabled: config.enabled,
            failure_threshold: config.failure_threshold.max(1),
            check_interval: config.health_check_interval(),
            probe,
            registry: Mutex::new(registry),
            events,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 添加端点，已存在时返回 false
    pub async fn add_endpoint(&self, pool: &str, uri: &str) -> bool {
        let mut registry = self.registry.lock().await;
        if registry.endpoint_mut(uri).is_some() {
            return false;
        }
        registry.endpoints.push(Endpoint::new(pool, uri));
        info!("代理池 {} 新增端点 {}", pool, uri);
        true
    }

    /// 为消费者选择一个健康代理，未启用时返回 `Ok(None)`
    ///
    /// 消费者的分配为空或全部不健康时，清除分配并针对完整代理池重试一次。
    /// 传入 `previous` 且健康候选不少于两个时避开它；只有它一个健康时照常复用。
    pub async fn get_proxy(
        &self,
        consumer: &str,
        previous: Option<&str>,
    ) -> HarvestResult<Option<String>> {
        if !self.enabled {
            return Ok(None);
        }

        let mut registry = self.registry.lock().await;
        let assigned = match registry.assignments.get(consumer) {
            Some(assigned) => assigned.clone(),
            None => {
                let all = registry.all_uris();
                registry
                    .assignments
                    .insert(consumer.to_string(), all.clone());
                all
            }
        };

        let mut candidates = registry.healthy_among(&assigned);
        if candidates.is_empty() {
            info!("消费者 {} 的代理分配中没有健康端点，重新分配", consumer);
            let all = registry.all_uris();
            candidates = registry.healthy_among(&all);
            registry.assignments.insert(consumer.to_string(), all);
        }
        if candidates.is_empty() {
            warn!("没有可供消费者 {} 使用的健康代理", consumer);
            return Err(HarvestError::NoHealthyProxy);
        }

        if let Some(previous) = previous {
            if candidates.len() > 1 {
                candidates.retain(|uri| uri != previous);
            }
        }

        let chosen = candidates
            .iter()
            .filter_map(|uri| registry.endpoints.iter().find(|e| &e.uri == uri))
            .min_by_key(|e| e.last_used_seq)
            .map(|e| e.uri.clone())
            .ok_or(HarvestError::NoHealthyProxy)?;

        registry.use_seq += 1;
        let seq = registry.use_seq;
        if let Some(endpoint) = registry.endpoint_mut(&chosen) {
            endpoint.last_used_seq = seq;
            endpoint.last_used_at = Some(Utc::now());
        }
        debug!("消费者 {} 使用代理 {}", consumer, chosen);
        Ok(Some(chosen))
    }

    /// 丢弃消费者的缓存分配，下一次选择时重新分配
    pub async fn release_consumer(&self, consumer: &str) -> bool {
        self.registry
            .lock()
            .await
            .assignments
            .remove(consumer)
            .is_some()
    }

    /// 使用中遇到的代理错误，与健康检查共享同一失败计数
    pub async fn mark_error(&self, uri: &str, error: &str) {
        let mut registry = self.registry.lock().await;
        let Some(endpoint) = registry.endpoint_mut(uri) else {
            debug!("忽略未知代理 {} 的错误标记", uri);
            return;
        };
        let transition = record_failure(endpoint, self.failure_threshold);
        let consecutive_failures = endpoint.consecutive_failures;
        let changed = transition.then(|| health_event(endpoint));
        drop(registry);

        warn!("代理 {} 出错（连续 {} 次）: {}", uri, consecutive_failures, error);
        self.events.publish(EventKind::ProxyErrored {
            proxy: uri.to_string(),
            consecutive_failures,
            error: error.to_string(),
        });
        if let Some(event) = changed {
            self.events.publish(event);
        }
    }

    /// 记录一次探测结果
    pub async fn record_probe(&self, uri: &str, outcome: &ProbeOutcome) {
        let mut registry = self.registry.lock().await;
        if let Some(event) = self.apply_probe(&mut registry, uri, outcome) {
            drop(registry);
            self.events.publish(event);
        }
    }

    fn apply_probe(
        &self,
        registry: &mut ProxyRegistry,
        uri: &str,
        outcome: &ProbeOutcome,
    ) -> Option<EventKind> {
        let endpoint = registry.endpoint_mut(uri)?;
        endpoint.last_checked = Some(Utc::now());

        let transition = if outcome.healthy {
            endpoint.consecutive_failures = 0;
            endpoint.latency = outcome.latency;
            let restored = !endpoint.healthy;
            endpoint.healthy = true;
            if restored {
                info!("代理 {} 恢复健康", uri);
            }
            restored
        } else {
            debug!(
                "代理 {} 探测失败: {}",
                uri,
                outcome.error.as_deref().unwrap_or("unknown")
            );
            record_failure(endpoint, self.failure_threshold)
        };

        transition.then(|| health_event(endpoint))
    }

    /// 执行一轮健康检查
    pub async fn run_health_checks(&self) -> HealthCheckSummary {
        let uris = self.registry.lock().await.all_uris();
        let outcomes = join_all(uris.iter().map(|uri| self.probe.probe(uri))).await;

        let mut summary = HealthCheckSummary {
            probed: uris.len(),
            ..Default::default()
        };
        let mut events = Vec::new();
        {
            let mut registry = self.registry.lock().await;
            for (uri, outcome) in uris.iter().zip(&outcomes) {
                events.extend(self.apply_probe(&mut registry, uri, outcome));
            }
            for endpoint in &registry.endpoints {
                if endpoint.healthy {
                    summary.healthy += 1;
                } else {
                    summary.unhealthy += 1;
                }
            }
        }
        for event in events {
            self.events.publish(event);
        }

        debug!(
            "代理健康检查完成: 探测 {}，健康 {}，不健康 {}",
            summary.probed, summary.healthy, summary.unhealthy
        );
        summary
    }

    /// 启动周期健康检查，收到关闭信号后退出
    pub fn spawn_health_loop(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let rotator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(rotator.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("代理健康检查已启动，间隔 {:?}", rotator.check_interval);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("代理健康检查收到关闭信号");
                        break;
                    }
                    _ = interval.tick() => {
                        rotator.run_health_checks().await;
                    }
                }
            }
        })
    }

    pub async fn status(&self) -> Vec<ProxyStatus> {
        self.registry
            .lock()
            .await
            .endpoints
            .iter()
            .map(|e| ProxyStatus {
                uri: e.uri.clone(),
                pool: e.pool.clone(),
                healthy: e.healthy,
                consecutive_failures: e.consecutive_failures,
                last_checked: e.last_checked,
                latency_ms: e.latency.map(|l| l.as_millis() as u64),
                last_used_at: e.last_used_at,
            })
            .collect()
    }
}

/// 累加失败次数，达到阈值时由健康变为不健康，返回状态是否发生变化
fn record_failure(endpoint: &mut Endpoint, threshold: u32) -> bool {
    endpoint.consecutive_failures = endpoint.consecutive_failures.saturating_add(1);
    if endpoint.healthy && endpoint.consecutive_failures >= threshold {
        endpoint.healthy = false;
        warn!(
            "代理 {} 连续失败 {} 次，标记为不健康",
            endpoint.uri, endpoint.consecutive_failures
        );
        return true;
    }
    false
}

fn health_event(endpoint: &Endpoint) -> EventKind {
    EventKind::ProxyHealthChanged {
        proxy: endpoint.uri.clone(),
        pool: endpoint.pool.clone(),
        healthy: endpoint.healthy,
        consecutive_failures: endpoint.consecutive_failures,
    }
}
