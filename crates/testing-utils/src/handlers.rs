//! Test task handlers

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harvest_domain::{Task, TaskHandler};
use harvest_errors::{HarvestError, HarvestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureMode {
    Transient,
    Fatal,
}

/// Fails the first `failures` invocations, then succeeds with `{"attempt": n}`
#[derive(Debug)]
pub struct FlakyHandler {
    failures: u32,
    mode: FailureMode,
    calls: AtomicU32,
    attempts: Mutex<Vec<u32>>,
}

impl FlakyHandler {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            mode: FailureMode::Transient,
            calls: AtomicU32::new(0),
            attempts: Mutex::new(Vec::new()),
        })
    }

    /// Never succeeds
    pub fn always_failing() -> Arc<Self> {
        Self::new(u32::MAX)
    }

    /// Always fails with a configuration-class error
    pub fn fatal() -> Arc<Self> {
        Arc::new(Self {
            failures: u32::MAX,
            mode: FailureMode::Fatal,
            calls: AtomicU32::new(0),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// `Task::attempt` of every invocation, in call order
    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(&self, task: &Task) -> HarvestResult<serde_json::Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().unwrap().push(task.attempt);

        if call < self.failures {
            return Err(match self.mode {
                FailureMode::Transient => {
                    HarvestError::task_failed(format!("scripted failure #{}", call + 1))
                }
                FailureMode::Fatal => HarvestError::invalid_task("missing required field"),
            });
        }
        Ok(serde_json::json!({ "attempt": task.attempt }))
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Sleeps for a fixed duration and records how many invocations overlapped
#[derive(Debug)]
pub struct RecordingHandler {
    delay: Duration,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
    calls: AtomicUsize,
    payloads: Mutex<Vec<serde_json::Value>>,
}

impl RecordingHandler {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            current: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Payloads in the order their invocations started
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn handle(&self, task: &Task) -> HarvestResult<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(task.payload.clone());
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(task.payload.clone())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_domain::Priority;

    #[tokio::test]
    async fn test_flaky_handler_script() {
        let handler = FlakyHandler::new(2);
        let task = Task::new("search", Priority::High, serde_json::Value::Null);

        assert!(handler.handle(&task).await.is_err());
        assert!(handler.handle(&task.next_attempt()).await.is_err());
        let ok = handler.handle(&task.next_attempt().next_attempt()).await.unwrap();
        assert_eq!(ok["attempt"], 2);
        assert_eq!(handler.calls(), 3);
        assert_eq!(handler.attempts(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_fatal_handler_error_is_not_retryable() {
        let handler = FlakyHandler::fatal();
        let task = Task::new("search", Priority::High, serde_json::Value::Null);
        let err = handler.handle(&task).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_handler_tracks_overlap() {
        let handler = RecordingHandler::new(Duration::from_secs(1));
        let task = Task::new("search", Priority::Low, serde_json::json!({"seq": 1}));

        let (a, b) = tokio::join!(handler.handle(&task), handler.handle(&task));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(handler.max_concurrent(), 2);
        assert_eq!(handler.in_flight(), 0);
        assert_eq!(handler.payloads().len(), 2);
    }
}
