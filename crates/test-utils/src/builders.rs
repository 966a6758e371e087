use std::path::PathBuf;
use std::time::Duration;

use chainbot::config::BotConfig;
use chainbot::nonce::NoncePolicy;
use chainbot::types::{BrokerKind, FailureWindow};

/// Builder for `BotConfig` to simplify test setup.
///
/// Defaults are tuned for tests: short timeouts, a single local worker.
pub struct BotConfigBuilder {
    config: BotConfig,
}

impl BotConfigBuilder {
    pub fn new() -> Self {
        let mut config = BotConfig {
            name: "test-bot".to_string(),
            drain_timeout: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(2),
            nonce: NoncePolicy::Manual,
            ..BotConfig::default()
        };
        config.broker.workers = 1;
        Self { config }
    }

    pub fn max_exceptions(mut self, limit: u32) -> Self {
        self.config.max_exceptions = limit;
        self
    }

    pub fn consecutive_failures(mut self) -> Self {
        self.config.failure_window = FailureWindow::Consecutive;
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.config.broker.workers = count;
        self
    }

    pub fn distributed(mut self, queue: &str) -> Self {
        self.config.broker.kind = BrokerKind::Distributed;
        self.config.broker.queue = queue.to_string();
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.startup_timeout = timeout;
        self
    }

    pub fn metric_history(mut self, history: usize) -> Self {
        self.config.metric_history = history;
        self
    }

    pub fn snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.snapshot_path = Some(path.into());
        self
    }

    pub fn build(self) -> BotConfig {
        self.config
    }
}

impl Default for BotConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
