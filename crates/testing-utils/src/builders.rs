//! Test data builders
//!
//! Builders for tasks and submission requests with sensible defaults.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use harvest_domain::{Priority, Task, TaskHandler, TaskRequest};

/// Builder for [`Task`] values used outside the scheduler
pub struct TaskBuilder {
    task: Task,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task::new("search", Priority::Medium, serde_json::json!({})),
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.task.category = category.to_string();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.task.payload = payload;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.task.attempt = attempt;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.scheduled_at = Some(at);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Immediate submission request for `category` on `priority`
pub fn request_for(
    category: &str,
    priority: Priority,
    handler: Arc<dyn TaskHandler>,
) -> TaskRequest {
    TaskRequest::new(category)
        .priority(priority)
        .handler(handler)
}

/// Same as [`request_for`] with a `{"seq": seq}` payload
pub fn sequenced_request(
    category: &str,
    priority: Priority,
    handler: Arc<dyn TaskHandler>,
    seq: usize,
) -> TaskRequest {
    request_for(category, priority, handler).payload(serde_json::json!({ "seq": seq }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::FlakyHandler;

    #[test]
    fn test_task_builder() {
        let task = TaskBuilder::new()
            .with_category("pdf")
            .with_priority(Priority::Low)
            .with_attempt(2)
            .build();
        assert_eq!(task.category, "pdf");
        assert_eq!(task.priority, Priority::Low);
        assert_eq!(task.attempt, 2);
    }

    #[test]
    fn test_sequenced_request() {
        let request = sequenced_request("search", Priority::High, FlakyHandler::new(0), 7);
        assert_eq!(request.priority, "high");
        assert_eq!(request.payload["seq"], 7);
        assert!(request.handler.is_some());
    }
}
