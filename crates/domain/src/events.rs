//! 监控事件
//!
//! 凭证、代理和调度器在状态变化时发布事件，外部观察者通过 [`EventBus::subscribe`] 订阅。
//! 发布永不阻塞：慢速订阅者会丢失最旧的事件（收到 `Lagged`），任务执行不受影响。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// 领域事件基础trait
pub trait DomainEvent: Send + Sync {
    fn event_id(&self) -> Uuid;
    fn event_type(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
    fn aggregate_id(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    CredentialRateLimited {
        provider: String,
        /// 已脱敏的凭证
        credential: String,
        index: usize,
        until: DateTime<Utc>,
    },
    CredentialErrored {
        provider: String,
        credential: String,
        index: usize,
        consecutive_errors: u32,
        backoff_ms: u64,
        error: String,
    },
    CredentialReset {
        provider: String,
        credential: String,
        index: usize,
    },
    ProxyHealthChanged {
        proxy: String,
        pool: String,
        healthy: bool,
        consecutive_failures: u32,
    },
    ProxyErrored {
        proxy: String,
        consecutive_failures: u32,
        error: String,
    },
    TaskStarted {
        task_id: String,
        category: String,
        tier: String,
        attempt: u32,
    },
    TaskRetrying {
        task_id: String,
        category: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    TaskCompleted {
        task_id: String,
        category: String,
        attempt: u32,
    },
    TaskFailed {
        task_id: String,
        category: String,
        attempts: u32,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl MonitorEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            kind,
        }
    }

    /// 是否属于需要告警级别记录的事件
    pub fn is_warning(&self) -> bool {
        match &self.kind {
            EventKind::CredentialRateLimited { .. }
            | EventKind::CredentialErrored { .. }
            | EventKind::ProxyErrored { .. }
            | EventKind::TaskRetrying { .. }
            | EventKind::TaskFailed { .. } => true,
            EventKind::ProxyHealthChanged { healthy, .. } => !healthy,
            _ => false,
        }
    }
}

impl DomainEvent for MonitorEvent {
    fn event_id(&self) -> Uuid {
        self.id
    }

    fn event_type(&self) -> &str {
        match &self.kind {
            EventKind::CredentialRateLimited { .. } => "CredentialRateLimited",
            EventKind::CredentialErrored { .. } => "CredentialErrored",
            EventKind::CredentialReset { .. } => "CredentialReset",
            EventKind::ProxyHealthChanged { .. } => "ProxyHealthChanged",
            EventKind::ProxyErrored { .. } => "ProxyErrored",
            EventKind::TaskStarted { .. } => "TaskStarted",
            EventKind::TaskRetrying { .. } => "TaskRetrying",
            EventKind::TaskCompleted { .. } => "TaskCompleted",
            EventKind::TaskFailed { .. } => "TaskFailed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn aggregate_id(&self) -> String {
        match &self.kind {
            EventKind::CredentialRateLimited { provider, index, .. }
            | EventKind::CredentialErrored { provider, index, .. }
            | EventKind::CredentialReset { provider, index, .. } => {
                format!("{provider}#{index}")
            }
            EventKind::ProxyHealthChanged { proxy, .. } | EventKind::ProxyErrored { proxy, .. } => {
                proxy.clone()
            }
            EventKind::TaskStarted { task_id, .. }
            | EventKind::TaskRetrying { task_id, .. }
            | EventKind::TaskCompleted { task_id, .. }
            | EventKind::TaskFailed { task_id, .. } => task_id.clone(),
        }
    }
}

/// 基于 tokio broadcast 的发布/订阅通道
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 发布事件。没有订阅者时直接丢弃
    pub fn publish(&self, kind: EventKind) {
        let _ = self.sender.send(MonitorEvent::new(kind));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// 凭证脱敏：只保留前4个字符
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{prefix}****")
    }
}
