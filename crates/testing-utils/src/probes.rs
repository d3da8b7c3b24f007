//! Scripted proxy probe

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use harvest_domain::{ProbeOutcome, ProxyProbe};

/// Answers probes from a per-proxy script, falling back to a default outcome
#[derive(Debug)]
pub struct ScriptedProbe {
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    default_healthy: Mutex<bool>,
    probes: Mutex<HashMap<String, usize>>,
}

impl Default for ScriptedProbe {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ScriptedProbe {
    pub fn new(default_healthy: bool) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_healthy: Mutex::new(default_healthy),
            probes: Mutex::new(HashMap::new()),
        }
    }

    /// Queue outcomes for a proxy; consumed one per probe
    pub fn script(&self, proxy: &str, outcomes: &[bool]) {
        self.scripts
            .lock()
            .unwrap()
            .entry(proxy.to_string())
            .or_default()
            .extend(outcomes.iter().copied());
    }

    pub fn set_default(&self, healthy: bool) {
        *self.default_healthy.lock().unwrap() = healthy;
    }

    pub fn probe_count(&self, proxy: &str) -> usize {
        self.probes.lock().unwrap().get(proxy).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ProxyProbe for ScriptedProbe {
    async fn probe(&self, proxy: &str) -> ProbeOutcome {
        *self
            .probes
            .lock()
            .unwrap()
            .entry(proxy.to_string())
            .or_insert(0) += 1;

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(proxy)
            .and_then(|queue| queue.pop_front());
        let healthy = scripted.unwrap_or_else(|| *self.default_healthy.lock().unwrap());

        if healthy {
            ProbeOutcome::success(Duration::from_millis(25))
        } else {
            ProbeOutcome::failure(format!("connection refused: {proxy}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_default() {
        let probe = ScriptedProbe::new(true);
        probe.script("http://p1:8080", &[false, false]);

        assert!(!probe.probe("http://p1:8080").await.healthy);
        assert!(!probe.probe("http://p1:8080").await.healthy);
        assert!(probe.probe("http://p1:8080").await.healthy);
        assert_eq!(probe.probe_count("http://p1:8080"), 3);
        assert_eq!(probe.probe_count("http://p2:8080"), 0);

        probe.set_default(false);
        assert!(!probe.probe("http://p2:8080").await.healthy);
    }
}
