use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

/// 后台循环（代理健康检查、缓存清理、事件观察者）共享的关闭信号
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    is_shutdown: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 订阅关闭信号；已经关闭时返回的接收器会立即收到信号
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        let receiver = self.shutdown_tx.subscribe();
        if self.is_shutdown() {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        receiver
    }

    /// 触发关闭，重复调用无效果
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            debug!("关闭信号已经发送过");
            return;
        }
        let subscribers = self.shutdown_tx.receiver_count();
        let _ = self.shutdown_tx.send(());
        info!("关闭信号已发送给 {} 个订阅者", subscribers);
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_signal_once() {
        let manager = ShutdownManager::new();
        let mut first = manager.subscribe();
        let mut second = manager.subscribe();

        manager.shutdown();
        manager.shutdown();

        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
        assert!(first.try_recv().is_err());
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown();
        let mut late = manager.subscribe();
        assert!(late.recv().await.is_ok());
    }
}
