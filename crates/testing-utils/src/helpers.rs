//! Test helper utilities

use std::future::Future;
use std::time::Duration;

use harvest_domain::{DomainEvent, MonitorEvent};
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Poll `condition` every 10ms until it holds or `timeout` elapses
    ///
    /// Uses tokio time, so it also works under a paused clock.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        condition().await
    }
}

/// Test data helpers
pub struct TestData;

impl TestData {
    pub fn json_params(params: &[(&str, serde_json::Value)]) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, value) in params {
            map.insert(key.to_string(), value.clone());
        }
        serde_json::Value::Object(map)
    }
}

/// Collects monitoring events from an event bus subscription
pub struct EventCollector {
    receiver: broadcast::Receiver<MonitorEvent>,
    events: Vec<MonitorEvent>,
}

impl EventCollector {
    pub fn new(receiver: broadcast::Receiver<MonitorEvent>) -> Self {
        Self {
            receiver,
            events: Vec::new(),
        }
    }

    /// Pull everything currently buffered without waiting
    pub fn drain(&mut self) -> &[MonitorEvent] {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => self.events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        &self.events
    }

    pub fn count(&mut self, event_type: &str) -> usize {
        self.drain()
            .iter()
            .filter(|event| event.event_type() == event_type)
            .count()
    }

    pub fn types(&mut self) -> Vec<String> {
        self.drain()
            .iter()
            .map(|event| event.event_type().to_string())
            .collect()
    }
}
