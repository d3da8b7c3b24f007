//! 凭证轮换
//!
//! 每个服务商持有一组有序凭证（主凭证 + 备用凭证）以及各自的限流、错误退避状态。
//! 服务商之间互相隔离：每个服务商一把互斥锁，选择与状态变更在锁内原子完成。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use harvest_config::CredentialsConfig;
use harvest_domain::{mask_secret, EventBus, EventKind};
use harvest_errors::{HarvestError, HarvestResult};

/// 限流时长上限，更长的重置时间按此截断
const MAX_RATE_LIMIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Default)]
struct CredentialState {
    rate_limited_until: Option<Instant>,
    consecutive_errors: u32,
    backoff_until: Option<Instant>,
    last_used: Option<Instant>,
}

impl CredentialState {
    fn is_usable(&self, now: Instant, min_interval: Duration) -> bool {
        if self.rate_limited_until.is_some_and(|until| until > now) {
            return false;
        }
        if self.backoff_until.is_some_and(|until| until > now) {
            return false;
        }
        match self.last_used {
            Some(last) => now.duration_since(last) >= min_interval,
            None => true,
        }
    }
}

#[derive(Debug)]
struct CredentialSet {
    credentials: Vec<String>,
    states: Vec<CredentialState>,
    cursor: usize,
}

impl CredentialSet {
    fn new(credentials: Vec<String>) -> Self {
        let states = vec![CredentialState::default(); credentials.len()];
        Self {
            credentials,
            states,
            cursor: 0,
        }
    }

    fn index_of(&self, credential: &str) -> Option<usize> {
        self.credentials.iter().position(|c| c == credential)
    }
}

/// 单个凭证的状态快照，凭证本身已脱敏
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialStatus {
    pub index: usize,
    pub credential: String,
    pub is_current: bool,
    pub usable: bool,
    pub rate_limited_for: Option<Duration>,
    pub consecutive_errors: u32,
    pub backoff_for: Option<Duration>,
}

#[derive(Debug, Clone)]
struct RotationSettings {
    min_rotation_interval: Duration,
    default_rate_limit: Duration,
    error_backoff_step: Duration,
    max_error_backoff: Duration,
}

impl From<&CredentialsConfig> for RotationSettings {
    fn from(config: &CredentialsConfig) -> Self {
        Self {
            min_rotation_interval: config.min_rotation_interval(),
            default_rate_limit: config.default_rate_limit(),
            error_backoff_step: config.error_backoff_step(),
            max_error_backoff: config.max_error_backoff(),
        }
    }
}

/// 按服务商轮换凭证
pub struct CredentialRotator {
    providers: RwLock<HashMap<String, Arc<Mutex<CredentialSet>>>>,
    settings: RotationSettings,
    events: EventBus,
}

impl CredentialRotator {
    pub fn new(config: &CredentialsConfig, events: EventBus) -> Self {
        let providers = config
            .providers
            .iter()
            .map(|(provider, credentials)| {
                (
                    provider.clone(),
                    Arc::new(Mutex::new(CredentialSet::new(credentials.clone()))),
                )
            })
            .collect::<HashMap<_, _>>();

        info!("凭证轮换器已初始化，服务商数量: {}", providers.len());
        Self {
            providers: RwLock::new(providers),
            settings: RotationSettings::from(config),
            events,
        }
    }

    /// 注册或替换一个服务商的凭证列表，游标和状态一并重置
    pub async fn register_provider(&self, provider: &str, credentials: Vec<String>) {
        let count = credentials.len();
        self.providers.write().await.insert(
            provider.to_string(),
            Arc::new(Mutex::new(CredentialSet::new(credentials))),
        );
        info!("服务商 {} 已注册 {} 个凭证", provider, count);
    }

    pub async fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn provider_set(&self, provider: &str) -> Option<Arc<Mutex<CredentialSet>>> {
        self.providers.read().await.get(provider).cloned()
    }

    /// 返回当前可用的凭证
    ///
    /// 先检查游标所指的凭证，不可用时循环向后查找，每个候选最多检查一次。
    pub async fn get_credential(&self, provider: &str) -> HarvestResult<String> {
        let not_configured = || HarvestError::NoCredentialsConfigured {
            provider: provider.to_string(),
        };
        let set = self.provider_set(provider).await.ok_or_else(not_configured)?;
        let mut set = set.lock().await;
        let total = set.credentials.len();
        if total == 0 {
            return Err(not_configured());
        }

        let now = Instant::now();
        let start = set.cursor;
        for offset in 0..total {
            let index = (start + offset) % total;
            if !set.states[index].is_usable(now, self.settings.min_rotation_interval) {
                continue;
            }
            if index != start {
                debug!("服务商 {} 凭证从 #{} 轮换到 #{}", provider, start, index);
            }
            set.cursor = index;
            set.states[index].last_used = Some(now);
            return Ok(set.credentials[index].clone());
        }

        warn!("服务商 {} 的 {} 个凭证均不可用", provider, total);
        Err(HarvestError::AllCredentialsUnavailable {
            provider: provider.to_string(),
        })
    }

    /// 标记凭证被限流，`reset_after` 为空时使用默认限流时长
    pub async fn mark_rate_limited(
        &self,
        provider: &str,
        credential: &str,
        reset_after: Option<Duration>,
    ) {
        let Some(set) = self.provider_set(provider).await else {
            debug!("忽略未知服务商 {} 的限流标记", provider);
            return;
        };
        let mut set = set.lock().await;
        let Some(index) = set.index_of(credential) else {
            debug!("忽略服务商 {} 的未知凭证限流标记", provider);
            return;
        };

        let duration = reset_after
            .unwrap_or(self.settings.default_rate_limit)
            .min(MAX_RATE_LIMIT);
        set.states[index].rate_limited_until = Some(Instant::now() + duration);
        let until = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|offset| Utc::now().checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let masked = mask_secret(credential);
        warn!(
            "服务商 {} 凭证 {} 被限流，{:?} 后恢复",
            provider, masked, duration
        );
        self.events.publish(EventKind::CredentialRateLimited {
            provider: provider.to_string(),
            credential: masked,
            index,
            until,
        });
    }

    /// 记录一次凭证错误，退避时长为 `min(连续错误数 * 步长, 上限)`
    pub async fn mark_error(&self, provider: &str, credential: &str, error: &str) {
        let Some(set) = self.provider_set(provider).await else {
            debug!("忽略未知服务商 {} 的错误标记", provider);
            return;
        };
        let mut set = set.lock().await;
        let Some(index) = set.index_of(credential) else {
            debug!("忽略服务商 {} 的未知凭证错误标记", provider);
            return;
        };

        let state = &mut set.states[index];
        state.consecutive_errors = state.consecutive_errors.saturating_add(1);
        let backoff = self
            .settings
            .error_backoff_step
            .saturating_mul(state.consecutive_errors)
            .min(self.settings.max_error_backoff);
        state.backoff_until = Some(Instant::now() + backoff);
        let consecutive_errors = state.consecutive_errors;

        let masked = mask_secret(credential);
        warn!(
            "服务商 {} 凭证 {} 出错（连续 {} 次），退避 {:?}: {}",
            provider, masked, consecutive_errors, backoff, error
        );
        self.events.publish(EventKind::CredentialErrored {
            provider: provider.to_string(),
            credential: masked,
            index,
            consecutive_errors,
            backoff_ms: backoff.as_millis() as u64,
            error: error.to_string(),
        });
    }

    /// 清除凭证的限流与错误退避状态
    pub async fn reset_state(&self, provider: &str, credential: &str) {
        let Some(set) = self.provider_set(provider).await else {
            return;
        };
        let mut set = set.lock().await;
        let Some(index) = set.index_of(credential) else {
            return;
        };

        let state = &mut set.states[index];
        state.rate_limited_until = None;
        state.consecutive_errors = 0;
        state.backoff_until = None;

        let masked = mask_secret(credential);
        info!("服务商 {} 凭证 {} 状态已重置", provider, masked);
        self.events.publish(EventKind::CredentialReset {
            provider: provider.to_string(),
            credential: masked,
            index,
        });
    }

    /// 服务商下各凭证的状态，未知服务商返回 None
    pub async fn status(&self, provider: &str) -> Option<Vec<CredentialStatus>> {
        let set = self.provider_set(provider).await?;
        let set = set.lock().await;
        let now = Instant::now();
        let remaining = |until: Option<Instant>| {
            until
                .filter(|until| *until > now)
                .map(|until| until.duration_since(now))
        };

        Some(
            set.credentials
                .iter()
                .zip(&set.states)
                .enumerate()
                .map(|(index, (credential, state))| CredentialStatus {
                    index,
                    credential: mask_secret(credential),
                    is_current: index == set.cursor,
                    usable: state.is_usable(now, self.settings.min_rotation_interval),
                    rate_limited_for: remaining(state.rate_limited_until),
                    consecutive_errors: state.consecutive_errors,
                    backoff_for: remaining(state.backoff_until),
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_rotation_interval_ms: u64) -> CredentialsConfig {
        let mut config = CredentialsConfig {
            min_rotation_interval_ms,
            ..Default::default()
        };
        config.providers.insert(
            "openai".to_string(),
            vec![
                "sk-primary".to_string(),
                "sk-backup-1".to_string(),
                "sk-backup-2".to_string(),
            ],
        );
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_credential_returned_first() {
        let rotator = CredentialRotator::new(&config(0), EventBus::default());
        assert_eq!(rotator.get_credential("openai").await.unwrap(), "sk-primary");
        assert_eq!(rotator.get_credential("openai").await.unwrap(), "sk-primary");
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_rotation_interval_spreads_rapid_calls() {
        let rotator = CredentialRotator::new(&config(1_000), EventBus::default());
        assert_eq!(rotator.get_credential("openai").await.unwrap(), "sk-primary");
        assert_eq!(rotator.get_credential("openai").await.unwrap(), "sk-backup-1");
        assert_eq!(rotator.get_credential("openai").await.unwrap(), "sk-backup-2");
        assert!(matches!(
            rotator.get_credential("openai").await,
            Err(HarvestError::AllCredentialsUnavailable { .. })
        ));

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(rotator.get_credential("openai").await.unwrap(), "sk-backup-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_empty_providers() {
        let rotator = CredentialRotator::new(&config(0), EventBus::default());
        assert!(matches!(
            rotator.get_credential("anthropic").await,
            Err(HarvestError::NoCredentialsConfigured { .. })
        ));

        rotator.register_provider("empty", Vec::new()).await;
        assert!(matches!(
            rotator.get_credential("empty").await,
            Err(HarvestError::NoCredentialsConfigured { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_backoff_grows_linearly_and_caps() {
        let mut config = config(0);
        config.error_backoff_step_seconds = 5;
        config.max_error_backoff_seconds = 12;
        let rotator = CredentialRotator::new(&config, EventBus::default());

        rotator.mark_error("openai", "sk-primary", "timeout").await;
        let status = rotator.status("openai").await.unwrap();
        assert_eq!(status[0].backoff_for, Some(Duration::from_secs(5)));

        rotator.mark_error("openai", "sk-primary", "timeout").await;
        rotator.mark_error("openai", "sk-primary", "timeout").await;
        let status = rotator.status("openai").await.unwrap();
        assert_eq!(status[0].consecutive_errors, 3);
        assert_eq!(status[0].backoff_for, Some(Duration::from_secs(12)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_expires() {
        let rotator = CredentialRotator::new(&config(0), EventBus::default());
        rotator
            .mark_rate_limited("openai", "sk-primary", Some(Duration::from_secs(30)))
            .await;
        assert_eq!(rotator.get_credential("openai").await.unwrap(), "sk-backup-1");

        rotator.register_provider("solo", vec!["sk-solo".to_string()]).await;
        rotator.mark_rate_limited("solo", "sk-solo", None).await;
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(rotator.get_credential("solo").await.is_err());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(rotator.get_credential("solo").await.unwrap(), "sk-solo");
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_reset_time_is_capped() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let rotator = CredentialRotator::new(&config(0), events);

        rotator
            .mark_rate_limited("openai", "sk-primary", Some(Duration::from_secs(u64::MAX)))
            .await;

        let status = rotator.status("openai").await.unwrap();
        assert!(!status[0].usable);
        assert_eq!(status[0].rate_limited_for, Some(MAX_RATE_LIMIT));
        assert_eq!(rotator.get_credential("openai").await.unwrap(), "sk-backup-1");

        let event = rx.try_recv().unwrap();
        match event.kind {
            EventKind::CredentialRateLimited { until, .. } => {
                assert!(until > Utc::now() + chrono::Duration::days(364));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_state_and_unknown_keys_are_noops() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let rotator = CredentialRotator::new(&config(0), events);

        rotator.mark_error("openai", "sk-primary", "boom").await;
        rotator.mark_rate_limited("openai", "sk-primary", None).await;
        rotator.reset_state("openai", "sk-primary").await;
        let status = rotator.status("openai").await.unwrap();
        assert!(status[0].usable);
        assert_eq!(status[0].consecutive_errors, 0);
        assert_eq!(status[0].credential, "sk-p****");

        rotator.mark_error("nobody", "sk-x", "boom").await;
        rotator.mark_rate_limited("openai", "sk-unknown", None).await;
        rotator.reset_state("openai", "sk-unknown").await;

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.kind);
        }
        assert_eq!(types.len(), 3);
        assert!(matches!(types[2], EventKind::CredentialReset { index: 0, .. }));
    }

    #[tokio::test]
    async fn test_providers_sorted() {
        let rotator = CredentialRotator::new(&config(0), EventBus::default());
        rotator.register_provider("anthropic", vec!["a".to_string()]).await;
        assert_eq!(rotator.providers().await, vec!["anthropic", "openai"]);
        assert!(rotator.status("missing").await.is_none());
    }
}
