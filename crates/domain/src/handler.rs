use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use harvest_errors::HarvestResult;

use crate::task::Task;

/// 任务处理器
///
/// 重试时会以递增后的 `attempt` 再次调用，实现需要能承受重复执行。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> HarvestResult<serde_json::Value>;

    fn name(&self) -> &str {
        "anonymous"
    }
}

/// 以闭包实现的处理器
pub struct FnHandler<F, Fut> {
    name: String,
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HarvestResult<serde_json::Value>> + Send + 'static,
{
    pub fn new(name: &str, func: F) -> Self {
        Self {
            name: name.to_string(),
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F, Fut>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HarvestResult<serde_json::Value>> + Send + 'static,
{
    async fn handle(&self, task: &Task) -> HarvestResult<serde_json::Value> {
        (self.func)(task.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub fn handler_fn<F, Fut>(name: &str, func: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HarvestResult<serde_json::Value>> + Send + 'static,
{
    Arc::new(FnHandler::new(name, func))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use harvest_errors::HarvestError;

    #[tokio::test]
    async fn test_handler_fn_receives_payload() {
        let handler = handler_fn("echo", |task: Task| async move { Ok(task.payload) });
        let task = Task::new("search", Priority::High, serde_json::json!({"q": "tokio"}));

        let result = handler.handle(&task).await.unwrap();
        assert_eq!(result["q"], "tokio");
        assert_eq!(handler.name(), "echo");
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_error() {
        let handler = handler_fn("broken", |_task: Task| async move {
            Err(HarvestError::task_failed("page load timeout"))
        });
        let task = Task::new("search", Priority::Low, serde_json::Value::Null);

        let err = handler.handle(&task).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
