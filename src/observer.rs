//! 内置的监控事件观察者：把事件总线上的事件写入日志

use harvest_domain::{DomainEvent, EventKind, MonitorEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 订阅事件总线并记录日志，直到收到关闭信号或总线关闭
pub fn spawn_event_logger(
    mut events: broadcast::Receiver<MonitorEvent>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                received = events.recv() => match received {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("事件观察者处理过慢，丢弃了 {} 个事件", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

fn log_event(event: &MonitorEvent) {
    let detail = describe(&event.kind);
    if event.is_warning() {
        warn!(event = event.event_type(), aggregate = %event.aggregate_id(), "{}", detail);
    } else {
        info!(event = event.event_type(), aggregate = %event.aggregate_id(), "{}", detail);
    }
}

fn describe(kind: &EventKind) -> String {
    match kind {
        EventKind::CredentialRateLimited { provider, credential, until, .. } => {
            format!("服务商 {provider} 凭证 {credential} 被限流至 {until}")
        }
        EventKind::CredentialErrored { provider, credential, consecutive_errors, backoff_ms, error, .. } => {
            format!(
                "服务商 {provider} 凭证 {credential} 连续出错 {consecutive_errors} 次，退避 {backoff_ms}ms: {error}"
            )
        }
        EventKind::CredentialReset { provider, credential, .. } => {
            format!("服务商 {provider} 凭证 {credential} 已重置")
        }
        EventKind::ProxyHealthChanged { proxy, pool, healthy, .. } => {
            let state = if *healthy { "健康" } else { "不健康" };
            format!("代理 {proxy} ({pool}) 变为{state}")
        }
        EventKind::ProxyErrored { proxy, consecutive_failures, error } => {
            format!("代理 {proxy} 连续失败 {consecutive_failures} 次: {error}")
        }
        EventKind::TaskStarted { task_id, tier, attempt, .. } => {
            format!("任务 {task_id} 在 {tier} 层开始第 {} 次执行", attempt + 1)
        }
        EventKind::TaskRetrying { task_id, delay_ms, error, .. } => {
            format!("任务 {task_id} 将在 {delay_ms}ms 后重试: {error}")
        }
        EventKind::TaskCompleted { task_id, .. } => format!("任务 {task_id} 已完成"),
        EventKind::TaskFailed { task_id, attempts, error, .. } => {
            format!("任务 {task_id} 在 {attempts} 次尝试后失败: {error}")
        }
    }
}
