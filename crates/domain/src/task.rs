use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use harvest_errors::HarvestError;

use crate::handler::TaskHandler;

/// 任务唯一标识：类别 + 毫秒时间戳 + 随机后缀
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate(category: &str) -> Self {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        Self(format!(
            "{}-{}-{}",
            category,
            Utc::now().timestamp_millis(),
            suffix.to_lowercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// 优先级，每个优先级对应一个独立的并发层
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl AsRef<str> for Priority {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(HarvestError::invalid_task(format!("未知的优先级: {s}"))),
        }
    }
}

/// 提交的任务。重试时生成新的副本而不是原地修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub category: String,
    pub priority: Priority,
    pub payload: serde_json::Value,
    /// 已重试次数，首次执行为0
    pub attempt: u32,
    pub submitted_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub recurrence: Option<String>,
}

impl Task {
    pub fn new(category: &str, priority: Priority, payload: serde_json::Value) -> Self {
        Self {
            id: TaskId::generate(category),
            category: category.to_string(),
            priority,
            payload,
            attempt: 0,
            submitted_at: Utc::now(),
            scheduled_at: None,
            recurrence: None,
        }
    }

    /// 生成下一次尝试的副本
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }
}

/// 延迟或周期调度方式
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// 在指定时间执行一次
    At(DateTime<Utc>),
    /// 5段式CRON表达式，周期执行
    Cron(String),
}

/// 提交请求。处理器不属于任务数据，单独携带
#[derive(Clone)]
pub struct TaskRequest {
    pub category: String,
    pub payload: serde_json::Value,
    pub priority: String,
    pub handler: Option<Arc<dyn TaskHandler>>,
    pub schedule: Option<Schedule>,
}

impl TaskRequest {
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            payload: serde_json::Value::Null,
            priority: Priority::Medium.as_str().to_string(),
            handler: None,
            schedule: None,
        }
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn priority<P: AsRef<str>>(mut self, priority: P) -> Self {
        self.priority = priority.as_ref().to_string();
        self
    }

    pub fn handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn at(mut self, fire_at: DateTime<Utc>) -> Self {
        self.schedule = Some(Schedule::At(fire_at));
        self
    }

    pub fn after(self, delay: Duration) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let fire_at = Utc::now()
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.at(fire_at)
    }

    pub fn cron(mut self, expression: &str) -> Self {
        self.schedule = Some(Schedule::Cron(expression.to_string()));
        self
    }
}

impl fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRequest")
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("has_handler", &self.handler.is_some())
            .field("schedule", &self.schedule)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_format() {
        let id = TaskId::generate("search");
        let parts: Vec<&str> = id.as_str().splitn(3, '-').collect();
        assert_eq!(parts[0], "search");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
        assert_ne!(TaskId::generate("search"), TaskId::generate("search"));
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(" low ".parse::<Priority>().unwrap(), Priority::Low);
        let err = "urgent".parse::<Priority>().unwrap_err();
        assert!(matches!(err, HarvestError::InvalidTask(_)));
    }

    #[test]
    fn test_next_attempt_is_a_copy() {
        let task = Task::new("pdf", Priority::Low, serde_json::json!({"url": "x"}));
        let retry = task.next_attempt();
        assert_eq!(task.attempt, 0);
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.id, task.id);
        assert!(retry.is_retry());
        assert!(!task.is_retry());
    }

    #[test]
    fn test_task_request_builder() {
        let request = TaskRequest::new("search")
            .priority(Priority::High)
            .payload(serde_json::json!({"q": "rust"}))
            .cron("*/5 * * * *");
        assert_eq!(request.priority, "high");
        assert!(request.handler.is_none());
        assert_eq!(
            request.schedule,
            Some(Schedule::Cron("*/5 * * * *".to_string()))
        );

        let request = TaskRequest::new("search").after(Duration::from_secs(60));
        match request.schedule {
            Some(Schedule::At(at)) => assert!(at > Utc::now()),
            other => panic!("unexpected schedule: {other:?}"),
        }
    }
}
