use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch, Mutex, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use harvest_config::{ConfigValidator, SchedulerConfig};
use harvest_domain::{
    EventBus, EventKind, Priority, Schedule, Task, TaskHandler, TaskId, TaskRequest,
};
use harvest_errors::{HarvestError, HarvestResult};

use crate::cron_utils::CronSchedule;
use crate::retry::RetryPolicy;
use crate::tier::{Completion, Job, TierQueue, TierStats};
use crate::timer::{RecurringEntry, ScheduleTimer};

/// 提交结果
///
/// 立即执行和一次性延迟任务可以通过 [`TaskHandle::wait`] 等待最终结果；周期任务没有单一结果。
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    completion: Option<oneshot::Receiver<HarvestResult<serde_json::Value>>>,
}

impl TaskHandle {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn is_recurring(&self) -> bool {
        self.completion.is_none()
    }

    /// 等待任务的终态结果
    ///
    /// 周期任务，或结果已不可能到达（例如延迟任务被取消）时返回 `None`。
    pub async fn wait(self) -> Option<HarvestResult<serde_json::Value>> {
        match self.completion {
            Some(receiver) => receiver.await.ok(),
            None => None,
        }
    }
}

struct SchedulerInner {
    tiers: Vec<Arc<TierQueue>>,
    policy: RetryPolicy,
    events: EventBus,
    stopped: AtomicBool,
    shutdown: watch::Sender<bool>,
    paused: watch::Sender<bool>,
}

/// 按优先级分层的任务调度器
///
/// 每个优先级层拥有独立的FIFO队列与并发池，层与层之间互不抢占。
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    timer: ScheduleTimer,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// 创建调度器并为每个层启动分发循环，必须在 tokio 运行时内调用
    pub fn new(config: &SchedulerConfig, events: EventBus) -> HarvestResult<Self> {
        config
            .validate()
            .map_err(|e| HarvestError::config_error(e.to_string()))?;

        let (shutdown, _) = watch::channel(false);
        let (paused, _) = watch::channel(false);

        let mut tiers = Vec::with_capacity(config.tiers.len());
        let mut receivers = Vec::with_capacity(config.tiers.len());
        for tier_config in &config.tiers {
            let priority = Priority::from_str(&tier_config.name)
                .map_err(|e| HarvestError::config_error(e.to_string()))?;
            let (tier, receiver) = TierQueue::new(priority, tier_config.max_concurrency);
            tiers.push(tier);
            receivers.push(receiver);
        }

        let inner = Arc::new(SchedulerInner {
            tiers,
            policy: RetryPolicy::from_config(&config.retry, config.max_attempts),
            events,
            stopped: AtomicBool::new(false),
            shutdown,
            paused,
        });

        let mut workers = Vec::with_capacity(receivers.len() + 1);
        for (tier, receiver) in inner.tiers.iter().zip(receivers) {
            workers.push(tokio::spawn(run_tier_loop(
                Arc::clone(&inner),
                Arc::clone(tier),
                receiver,
            )));
        }

        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        workers.push(tokio::spawn(forward_firings(Arc::clone(&inner), fire_rx)));

        info!(
            "调度器已启动，层配置: {}",
            config
                .tiers
                .iter()
                .map(|t| format!("{}={}", t.name, t.max_concurrency))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            inner,
            timer: ScheduleTimer::new(fire_tx),
            workers: Mutex::new(workers),
        })
    }

    /// 提交任务
    ///
    /// 带未来执行时间或CRON表达式的请求只注册调度条目并立即返回，其余请求直接进入层队列。
    pub async fn submit(&self, request: TaskRequest) -> HarvestResult<TaskHandle> {
        if self.inner.is_stopped() {
            return Err(HarvestError::SchedulerStopped);
        }

        let category = request.category.trim();
        if category.is_empty() {
            return Err(HarvestError::invalid_task("任务类别不能为空"));
        }
        let handler = request
            .handler
            .ok_or_else(|| HarvestError::invalid_task(format!("任务 {category} 缺少处理器")))?;
        let priority = Priority::from_str(&request.priority)?;
        if self.inner.tier(priority).is_none() {
            return Err(HarvestError::invalid_task(format!(
                "优先级 {priority} 没有对应的层"
            )));
        }

        let mut task = Task::new(category, priority, request.payload);
        match request.schedule {
            None => self.execute_task(task, handler),
            Some(Schedule::At(fire_at)) => {
                if fire_at < Utc::now() {
                    return Err(HarvestError::invalid_schedule(format!(
                        "执行时间 {fire_at} 已经过去"
                    )));
                }
                task.scheduled_at = Some(fire_at);
                let id = task.id.clone();
                let (tx, rx) = oneshot::channel();
                self.timer
                    .schedule_once(task, handler, Some(tx), fire_at)
                    .await;
                Ok(TaskHandle {
                    id,
                    completion: Some(rx),
                })
            }
            Some(Schedule::Cron(expression)) => {
                let schedule = CronSchedule::parse(&expression)?;
                task.recurrence = Some(schedule.expression().to_string());
                let id = task.id.clone();
                self.timer.schedule_recurring(task, handler, schedule).await;
                Ok(TaskHandle {
                    id,
                    completion: None,
                })
            }
        }
    }

    /// 把任务放入所属层的队列
    pub fn execute_task(
        &self,
        task: Task,
        handler: Arc<dyn TaskHandler>,
    ) -> HarvestResult<TaskHandle> {
        if self.inner.is_stopped() {
            return Err(HarvestError::SchedulerStopped);
        }

        let id = task.id.clone();
        let (tx, rx) = oneshot::channel();
        let job = Job {
            task,
            handler,
            completion: Some(tx),
        };
        if self.inner.enqueue(job).is_err() {
            return Err(HarvestError::SchedulerStopped);
        }

        debug!("任务 {} 已入队", id);
        Ok(TaskHandle {
            id,
            completion: Some(rx),
        })
    }

    /// 取消尚未触发的延迟或周期条目，不会中断已在执行的任务
    pub async fn cancel(&self, id: &TaskId) -> bool {
        self.timer.cancel(id).await
    }

    pub fn pause(&self) {
        if !self.inner.paused.send_replace(true) {
            info!("调度器已暂停分发");
        }
    }

    pub fn resume(&self) {
        if self.inner.paused.send_replace(false) {
            info!("调度器已恢复分发");
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// 停止调度器
    ///
    /// 拒绝新的提交、取消全部调度条目，等待各层队列中已入队和执行中的任务结束后返回。
    /// 处于退避等待中的重试会被放弃，其调用方收到 `SchedulerStopped`。
    pub async fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            info!("正在停止调度器");
        }

        let cancelled = self.timer.shutdown().await;
        if cancelled > 0 {
            info!("已取消 {} 个调度条目", cancelled);
        }

        self.inner.paused.send_replace(false);
        self.inner.shutdown.send_replace(true);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                error!("调度器后台任务异常退出: {}", e);
            }
        }
        info!("调度器已停止");
    }

    pub fn tier_stats(&self) -> Vec<TierStats> {
        self.inner.tiers.iter().map(|tier| tier.stats()).collect()
    }

    pub async fn recurring_entries(&self) -> Vec<RecurringEntry> {
        self.timer.recurring_entries().await
    }

    pub async fn delayed_entries(&self) -> Vec<(TaskId, DateTime<Utc>)> {
        self.timer.delayed_entries().await
    }

    /// 尚未取消的调度条目数量（延迟与周期）
    pub async fn scheduled_count(&self) -> usize {
        self.timer.len().await
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.shutdown.send_replace(true);
    }
}

impl SchedulerInner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn tier(&self, priority: Priority) -> Option<&Arc<TierQueue>> {
        self.tiers.iter().find(|tier| tier.priority == priority)
    }

    fn enqueue(&self, job: Job) -> Result<(), Job> {
        match self.tier(job.task.priority) {
            Some(tier) => tier.enqueue(job),
            None => Err(job),
        }
    }

    fn fail(&self, task: &Task, error: HarvestError, completion: Option<Completion>, tier: &str) {
        error!(
            "任务 {} ({}) 在第 {} 次尝试后失败: {}",
            task.id,
            task.category,
            task.attempt + 1,
            error
        );
        metrics::counter!("harvest_tasks_failed_total", "tier" => tier.to_string()).increment(1);
        self.events.publish(EventKind::TaskFailed {
            task_id: task.id.to_string(),
            category: task.category.clone(),
            attempts: task.attempt + 1,
            error: error.to_string(),
        });
        if let Some(completion) = completion {
            let _ = completion.send(Err(error));
        }
    }
}

/// 层分发循环：按入队顺序取出任务，拿到槽位后派发执行
async fn run_tier_loop(
    inner: Arc<SchedulerInner>,
    tier: Arc<TierQueue>,
    mut receiver: mpsc::UnboundedReceiver<Job>,
) {
    let mut paused = inner.paused.subscribe();

    loop {
        let job = tokio::select! {
            biased;
            _ = wait_for_shutdown(inner.shutdown.subscribe()) => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let resumed = paused.wait_for(|paused| !*paused).await.is_ok();
        if !resumed {
            break;
        }
        let Some(permit) = tier.acquire_slot().await else {
            break;
        };
        dispatch(&inner, &tier, job, permit);
    }

    receiver.close();
    let mut drained = 0usize;
    while let Some(job) = receiver.recv().await {
        let Some(permit) = tier.acquire_slot().await else {
            break;
        };
        dispatch(&inner, &tier, job, permit);
        drained += 1;
    }
    tier.wait_idle().await;
    debug!("层 {} 已排空，停止前执行了 {} 个排队任务", tier.name, drained);
}

/// 把定时器的触发转交给层队列
async fn forward_firings(inner: Arc<SchedulerInner>, mut fire_rx: mpsc::UnboundedReceiver<Job>) {
    loop {
        let job = tokio::select! {
            biased;
            _ = wait_for_shutdown(inner.shutdown.subscribe()) => break,
            job = fire_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        if let Err(job) = inner.enqueue(job) {
            let tier = job.task.priority.as_str();
            inner.fail(&job.task, HarvestError::SchedulerStopped, job.completion, tier);
        }
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

fn dispatch(inner: &Arc<SchedulerInner>, tier: &Arc<TierQueue>, job: Job, permit: OwnedSemaphorePermit) {
    tokio::spawn(run_job(Arc::clone(inner), Arc::clone(tier), job, permit));
}

/// 执行一次尝试；失败时在不占用槽位的情况下退避，然后以新副本重新入队
async fn run_job(
    inner: Arc<SchedulerInner>,
    tier: Arc<TierQueue>,
    job: Job,
    permit: OwnedSemaphorePermit,
) {
    let Job {
        task,
        handler,
        completion,
    } = job;

    let guard = tier.start();
    metrics::counter!("harvest_tasks_started_total", "tier" => tier.name.clone()).increment(1);
    inner.events.publish(EventKind::TaskStarted {
        task_id: task.id.to_string(),
        category: task.category.clone(),
        tier: tier.name.clone(),
        attempt: task.attempt,
    });
    debug!(
        "开始执行任务 {} ({})，处理器: {}，第 {} 次尝试",
        task.id,
        task.category,
        handler.name(),
        task.attempt + 1
    );

    let outcome = AssertUnwindSafe(handler.handle(&task)).catch_unwind().await;
    drop(guard);
    drop(permit);

    let result = outcome.unwrap_or_else(|panic| {
        Err(HarvestError::task_failed(format!(
            "处理器发生panic: {}",
            panic_message(panic.as_ref())
        )))
    });

    let error = match result {
        Ok(value) => {
            info!("任务 {} ({}) 执行成功", task.id, task.category);
            metrics::counter!("harvest_tasks_completed_total", "tier" => tier.name.clone())
                .increment(1);
            inner.events.publish(EventKind::TaskCompleted {
                task_id: task.id.to_string(),
                category: task.category.clone(),
                attempt: task.attempt,
            });
            if let Some(completion) = completion {
                let _ = completion.send(Ok(value));
            }
            return;
        }
        Err(error) => error,
    };

    if !inner.policy.should_retry(task.attempt, &error) {
        inner.fail(&task, error, completion, &tier.name);
        return;
    }

    let delay = inner.policy.delay_for(task.attempt);
    warn!(
        "任务 {} ({}) 第 {} 次尝试失败: {}，{}ms 后重试",
        task.id,
        task.category,
        task.attempt + 1,
        error,
        delay.as_millis()
    );
    metrics::counter!("harvest_tasks_retried_total", "tier" => tier.name.clone()).increment(1);
    inner.events.publish(EventKind::TaskRetrying {
        task_id: task.id.to_string(),
        category: task.category.clone(),
        attempt: task.attempt,
        delay_ms: delay.as_millis() as u64,
        error: error.to_string(),
    });

    let stopped = tokio::select! {
        biased;
        _ = wait_for_shutdown(inner.shutdown.subscribe()) => true,
        _ = tokio::time::sleep(delay) => false,
    };
    if stopped {
        inner.fail(&task, HarvestError::SchedulerStopped, completion, &tier.name);
        return;
    }

    let retry = Job {
        task: task.next_attempt(),
        handler,
        completion,
    };
    if let Err(job) = inner.enqueue(retry) {
        inner.fail(&task, HarvestError::SchedulerStopped, job.completion, &tier.name);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知panic".to_string()
    }
}
