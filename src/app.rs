use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use harvest_config::{AppConfig, ConfigValidator};
use harvest_dispatcher::Scheduler;
use harvest_domain::{EventBus, ProxyProbe};
use harvest_errors::{HarvestError, HarvestResult};
use harvest_infrastructure::{
    create_cache_backend, CredentialRotator, HttpProxyProbe, ProxyRotator, ResultCache,
};

use crate::observer::spawn_event_logger;
use crate::shutdown::ShutdownManager;

const BACKGROUND_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// 编排核心的组装根
///
/// 持有事件总线、凭证轮换器、代理轮换器、结果缓存和调度器，
/// 并管理代理健康检查、缓存清理和事件观察者三个后台循环。
pub struct Application {
    config: AppConfig,
    events: EventBus,
    scheduler: Arc<Scheduler>,
    credentials: Arc<CredentialRotator>,
    proxies: Arc<ProxyRotator>,
    cache: Arc<ResultCache>,
    shutdown: ShutdownManager,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Application {
    pub async fn build(config: AppConfig) -> HarvestResult<Self> {
        let probe = Arc::new(HttpProxyProbe::from_config(&config.proxy));
        Self::build_with_probe(config, probe).await
    }

    /// 使用指定的代理探测器组装应用
    pub async fn build_with_probe(
        config: AppConfig,
        probe: Arc<dyn ProxyProbe>,
    ) -> HarvestResult<Self> {
        config
            .validate()
            .map_err(|e| HarvestError::config_error(e.to_string()))?;
        info!("初始化编排核心");

        let events = EventBus::new(config.scheduler.event_buffer);
        let shutdown = ShutdownManager::new();
        let mut background = Vec::new();

        background.push(spawn_event_logger(events.subscribe(), shutdown.subscribe()));

        let backend = create_cache_backend(&config.cache).await?;
        if let Some(sqlite) = backend.sqlite() {
            background.push(sqlite.spawn_sweeper(config.cache.sweep_interval(), shutdown.subscribe()));
        }
        let cache = Arc::new(ResultCache::new(backend.as_backend(), &config.cache));

        let credentials = Arc::new(CredentialRotator::new(&config.credentials, events.clone()));

        let proxies = Arc::new(ProxyRotator::new(&config.proxy, probe, events.clone()));
        if proxies.is_enabled() {
            background.push(proxies.spawn_health_loop(shutdown.subscribe()));
        }

        let scheduler = Arc::new(Scheduler::new(&config.scheduler, events.clone())?);

        info!(
            "编排核心已启动：缓存后端 {}，代理轮换 {}",
            cache.backend_name(),
            if proxies.is_enabled() { "启用" } else { "停用" }
        );

        Ok(Self {
            config,
            events,
            scheduler,
            credentials,
            proxies,
            cache,
            shutdown,
            background: Mutex::new(background),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn credentials(&self) -> Arc<CredentialRotator> {
        Arc::clone(&self.credentials)
    }

    pub fn proxies(&self) -> Arc<ProxyRotator> {
        Arc::clone(&self.proxies)
    }

    pub fn cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    /// 先停止调度器并等待在途任务，再通知后台循环退出
    pub async fn shutdown(&self) {
        if self.shutdown.is_shutdown() {
            return;
        }
        info!("开始关闭编排核心");
        self.scheduler.stop().await;
        self.shutdown.shutdown();

        let handles: Vec<JoinHandle<()>> = self.background.lock().await.drain(..).collect();
        for handle in handles {
            match tokio::time::timeout(BACKGROUND_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("后台任务异常退出: {}", e),
                Err(_) => warn!("后台任务未在 {:?} 内退出", BACKGROUND_STOP_TIMEOUT),
            }
        }
        info!("编排核心已关闭");
    }
}
