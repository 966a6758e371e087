// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::nonce::NoncePolicy;
use crate::types::{BrokerKind, FailureWindow, NonceReconcileMode};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [bot]
/// name = "liquidator"
/// max_exceptions = 5
/// drain_timeout = "10s"
///
/// [broker]
/// kind = "memory"
/// workers = 4
///
/// [nonce]
/// reconcile = "per_call"
/// ```
///
/// All sections are optional and have reasonable defaults. Durations stay as
/// strings here; [`BotConfig`] holds the parsed values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBotConfig {
    #[serde(default)]
    pub bot: BotSection,

    #[serde(default)]
    pub broker: BrokerSection,

    #[serde(default)]
    pub nonce: NonceSection,

    #[serde(default)]
    pub metrics: MetricsSection,

    #[serde(default)]
    pub state: StateSection,
}

/// `[bot]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BotSection {
    #[serde(default = "default_name")]
    pub name: String,

    /// Failure ceiling; reaching it halts the bot.
    #[serde(default = "default_max_exceptions")]
    pub max_exceptions: u32,

    #[serde(default)]
    pub failure_window: FailureWindow,

    /// How long in-flight tasks may keep running once the bot is halting.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,

    /// Upper bound for each startup / shutdown handler.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: String,
}

fn default_name() -> String {
    "bot".to_string()
}

fn default_max_exceptions() -> u32 {
    10
}

fn default_drain_timeout() -> String {
    "30s".to_string()
}

fn default_startup_timeout() -> String {
    "60s".to_string()
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_exceptions: default_max_exceptions(),
            failure_window: FailureWindow::default(),
            drain_timeout: default_drain_timeout(),
            startup_timeout: default_startup_timeout(),
        }
    }
}

/// `[broker]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    #[serde(default)]
    pub kind: BrokerKind,

    /// Number of workers spawned inside this process.
    ///
    /// May be 0 with the distributed broker, when all workers live in other
    /// processes.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Queue name prefix used by the distributed broker.
    #[serde(default = "default_queue")]
    pub queue: String,
}

fn default_workers() -> usize {
    2
}

fn default_queue() -> String {
    "chainbot".to_string()
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            workers: default_workers(),
            queue: default_queue(),
        }
    }
}

/// `[nonce]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NonceSection {
    #[serde(default)]
    pub reconcile: NonceReconcileMode,

    /// Only used with `reconcile = "periodic"`.
    #[serde(default = "default_nonce_interval")]
    pub interval: String,
}

fn default_nonce_interval() -> String {
    "60s".to_string()
}

impl Default for NonceSection {
    fn default() -> Self {
        Self {
            reconcile: NonceReconcileMode::default(),
            interval: default_nonce_interval(),
        }
    }
}

/// `[metrics]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSection {
    /// Datapoints kept in memory per metric.
    #[serde(default = "default_history")]
    pub history: usize,
}

fn default_history() -> usize {
    256
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            history: default_history(),
        }
    }
}

/// `[state]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateSection {
    /// JSON snapshot file. Without it, snapshots live in memory only.
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
}

/// Validated runtime configuration.
///
/// Built from [`RawBotConfig`] via `TryFrom` (see `validate.rs`). Read once
/// at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub name: String,
    pub max_exceptions: u32,
    pub failure_window: FailureWindow,
    pub drain_timeout: Duration,
    pub startup_timeout: Duration,
    pub broker: BrokerSection,
    pub nonce: NoncePolicy,
    pub metric_history: usize,
    pub snapshot_path: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_exceptions: default_max_exceptions(),
            failure_window: FailureWindow::default(),
            drain_timeout: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(60),
            broker: BrokerSection::default(),
            nonce: NoncePolicy::Periodic(Duration::from_secs(60)),
            metric_history: default_history(),
            snapshot_path: None,
        }
    }
}
