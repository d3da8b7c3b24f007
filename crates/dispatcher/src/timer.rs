//! 延迟任务与周期任务的定时器
//!
//! 定时器只负责在到点时产生一个 `Job`，由调度器转交给层队列执行，
//! 周期语义与重试语义因此互不干扰。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use harvest_domain::{Task, TaskHandler, TaskId};

use crate::cron_utils::CronSchedule;
use crate::tier::{Completion, Job};

enum EntryKind {
    Once { fire_at: DateTime<Utc> },
    Recurring { schedule: CronSchedule },
}

struct ScheduledEntry {
    category: String,
    kind: EntryKind,
    timer: JoinHandle<()>,
}

/// 周期任务清单中的一项
#[derive(Debug, Clone, PartialEq)]
pub struct RecurringEntry {
    pub id: TaskId,
    pub category: String,
    pub expression: String,
    pub next_fire_at: Option<DateTime<Utc>>,
}

type EntryMap = Arc<Mutex<HashMap<TaskId, ScheduledEntry>>>;

#[derive(Clone)]
pub(crate) struct ScheduleTimer {
    entries: EntryMap,
    fire_tx: mpsc::UnboundedSender<Job>,
}

impl ScheduleTimer {
    pub fn new(fire_tx: mpsc::UnboundedSender<Job>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            fire_tx,
        }
    }

    /// 注册一次性延迟任务
    ///
    /// 触发时先在锁内移除条目，再发出 Job；与 `cancel` 竞争时只有一方能拿到条目。
    pub async fn schedule_once(
        &self,
        task: Task,
        handler: Arc<dyn TaskHandler>,
        completion: Option<Completion>,
        fire_at: DateTime<Utc>,
    ) {
        let id = task.id.clone();
        let category = task.category.clone();
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        let mut entries = self.entries.lock().await;
        let timer = {
            let entries = Arc::clone(&self.entries);
            let fire_tx = self.fire_tx.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if entries.lock().await.remove(&id).is_none() {
                    return;
                }
                debug!("延迟任务 {} 到达执行时间", id);
                let _ = fire_tx.send(Job {
                    task,
                    handler,
                    completion,
                });
            })
        };

        entries.insert(
            id.clone(),
            ScheduledEntry {
                category,
                kind: EntryKind::Once { fire_at },
                timer,
            },
        );
        info!("已注册延迟任务 {}，执行时间: {}", id, fire_at);
    }

    /// 注册周期任务，每次触发都以模板生成一个新任务
    pub async fn schedule_recurring(
        &self,
        template: Task,
        handler: Arc<dyn TaskHandler>,
        schedule: CronSchedule,
    ) {
        let id = template.id.clone();
        let category = template.category.clone();

        let mut entries = self.entries.lock().await;
        let timer = {
            let entries = Arc::clone(&self.entries);
            let fire_tx = self.fire_tx.clone();
            let schedule = schedule.clone();
            let id = id.clone();
            tokio::spawn(async move {
                run_recurring(id, template, handler, schedule, entries, fire_tx).await;
            })
        };

        info!(
            "已注册周期任务 {} ({})，表达式: {}",
            id,
            category,
            schedule.expression()
        );
        entries.insert(
            id,
            ScheduledEntry {
                category,
                kind: EntryKind::Recurring { schedule },
                timer,
            },
        );
    }

    /// 取消尚未触发的条目，返回是否取消了某个条目
    pub async fn cancel(&self, id: &TaskId) -> bool {
        match self.entries.lock().await.remove(id) {
            Some(entry) => {
                entry.timer.abort();
                info!("已取消调度条目 {}", id);
                true
            }
            None => false,
        }
    }

    /// 取消全部条目，返回取消的数量
    pub async fn shutdown(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        for (_, entry) in entries.drain() {
            entry.timer.abort();
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn recurring_entries(&self) -> Vec<RecurringEntry> {
        let now = Utc::now();
        let entries = self.entries.lock().await;
        let mut inventory: Vec<RecurringEntry> = entries
            .iter()
            .filter_map(|(id, entry)| match &entry.kind {
                EntryKind::Recurring { schedule } => Some(RecurringEntry {
                    id: id.clone(),
                    category: entry.category.clone(),
                    expression: schedule.expression().to_string(),
                    next_fire_at: schedule.next_after(now),
                }),
                EntryKind::Once { .. } => None,
            })
            .collect();
        inventory.sort_by(|a, b| a.id.cmp(&b.id));
        inventory
    }

    /// 尚未触发的延迟任务及其执行时间，按执行时间排序
    pub async fn delayed_entries(&self) -> Vec<(TaskId, DateTime<Utc>)> {
        let entries = self.entries.lock().await;
        let mut pending: Vec<(TaskId, DateTime<Utc>)> = entries
            .iter()
            .filter_map(|(id, entry)| match entry.kind {
                EntryKind::Once { fire_at } => Some((id.clone(), fire_at)),
                EntryKind::Recurring { .. } => None,
            })
            .collect();
        pending.sort_by_key(|(_, fire_at)| *fire_at);
        pending
    }
}

/// 周期触发循环
///
/// 触发时间以注册时刻为锚点换算成单调时钟，避免墙上时钟跳变影响间隔。
async fn run_recurring(
    id: TaskId,
    template: Task,
    handler: Arc<dyn TaskHandler>,
    schedule: CronSchedule,
    entries: EntryMap,
    fire_tx: mpsc::UnboundedSender<Job>,
) {
    let anchor_wall = Utc::now();
    let anchor = Instant::now();
    let mut cursor = anchor_wall;

    loop {
        let Some(next) = schedule.next_after(cursor) else {
            entries.lock().await.remove(&id);
            info!("周期任务 {} 没有后续触发时间，已移除", id);
            return;
        };
        let offset = (next - anchor_wall).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep_until(anchor + offset).await;
        cursor = next;

        let guard = entries.lock().await;
        if !guard.contains_key(&id) {
            return;
        }

        let mut task = Task::new(&template.category, template.priority, template.payload.clone());
        task.scheduled_at = Some(next);
        task.recurrence = Some(schedule.expression().to_string());
        debug!("周期任务 {} 触发，生成任务 {}", id, task.id);

        let job = Job {
            task,
            handler: Arc::clone(&handler),
            completion: None,
        };
        if fire_tx.send(job).is_err() {
            return;
        }
        drop(guard);
    }
}
