use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};

use harvest_domain::{Priority, Task, TaskHandler};
use harvest_errors::HarvestResult;

pub(crate) type Completion = oneshot::Sender<HarvestResult<serde_json::Value>>;

/// 等待执行的一次尝试，也是定时器每次触发产生的合成提交
pub(crate) struct Job {
    pub task: Task,
    pub handler: Arc<dyn TaskHandler>,
    pub completion: Option<Completion>,
}

/// 单个优先级层：独立的FIFO队列和并发池
pub(crate) struct TierQueue {
    pub name: String,
    pub priority: Priority,
    pub max_concurrency: usize,
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    sender: mpsc::UnboundedSender<Job>,
}

impl TierQueue {
    pub fn new(
        priority: Priority,
        max_concurrency: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Job>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let tier = Arc::new(Self {
            name: priority.as_str().to_string(),
            priority,
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            queued: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            sender,
        });
        (tier, receiver)
    }

    /// 入队，通道已关闭时把任务原样交还
    pub fn enqueue(&self, job: Job) -> Result<(), Job> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.sender.send(job).map_err(|err| {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            err.0
        })
    }

    /// 等待一个空闲执行槽位
    pub async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        self.queued.fetch_sub(1, Ordering::SeqCst);
        Some(permit)
    }

    /// 等待所有执行中的任务释放槽位
    pub async fn wait_idle(&self) {
        let _ = self
            .semaphore
            .acquire_many(self.max_concurrency as u32)
            .await;
    }

    pub fn start(&self) -> InFlightGuard {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("harvest_tier_in_flight", "tier" => self.name.clone()).set(current as f64);
        InFlightGuard {
            tier: self.name.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            name: self.name.clone(),
            max_concurrency: self.max_concurrency,
            queued: self.queued.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }
}

/// 执行中计数，离开作用域时自动减一
pub(crate) struct InFlightGuard {
    tier: String,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let current = self.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::gauge!("harvest_tier_in_flight", "tier" => self.tier.clone()).set(current as f64);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub name: String,
    pub max_concurrency: usize,
    pub queued: usize,
    pub in_flight: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_domain::handler_fn;

    fn job(priority: Priority) -> Job {
        Job {
            task: Task::new("search", priority, serde_json::Value::Null),
            handler: handler_fn("noop", |_task| async { Ok(serde_json::Value::Null) }),
            completion: None,
        }
    }

    #[tokio::test]
    async fn test_queue_accounting() {
        let (tier, mut receiver) = TierQueue::new(Priority::Low, 1);
        assert!(tier.enqueue(job(Priority::Low)).is_ok());
        assert!(tier.enqueue(job(Priority::Low)).is_ok());
        assert_eq!(tier.stats().queued, 2);

        let _first = receiver.recv().await.unwrap();
        let permit = tier.acquire_slot().await.unwrap();
        let guard = tier.start();
        let stats = tier.stats();
        assert_eq!((stats.queued, stats.in_flight), (1, 1));

        drop(guard);
        drop(permit);
        assert_eq!(tier.stats().in_flight, 0);
        tier.wait_idle().await;
    }

    #[tokio::test]
    async fn test_enqueue_after_close_returns_job() {
        let (tier, mut receiver) = TierQueue::new(Priority::High, 2);
        receiver.close();
        let rejected = tier.enqueue(job(Priority::High));
        assert!(rejected.is_err());
        assert_eq!(tier.stats().queued, 0);
    }
}
