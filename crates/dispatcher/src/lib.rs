//! 任务调度：优先级层队列、重试退避、延迟与周期任务

pub mod cron_utils;
pub mod retry;
pub mod scheduler;
pub mod tier;
pub mod timer;

pub use cron_utils::CronSchedule;
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, TaskHandle};
pub use tier::TierStats;
pub use timer::RecurringEntry;
