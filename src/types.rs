use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Boxed, sendable future used at the trait seams (broker, signer, handlers).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What kind of occurrence a handler is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    NewBlock,
    EventLog,
    Cron,
    MetricCallback,
    Startup,
    Shutdown,
    WorkerStartup,
    WorkerShutdown,
}

impl TaskType {
    /// Runtime trigger kinds are only accepted while the bot is running.
    pub fn is_runtime(self) -> bool {
        matches!(
            self,
            TaskType::NewBlock | TaskType::EventLog | TaskType::Cron | TaskType::MetricCallback
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::NewBlock => "new_block",
            TaskType::EventLog => "event_log",
            TaskType::Cron => "cron",
            TaskType::MetricCallback => "metric_callback",
            TaskType::Startup => "startup",
            TaskType::Shutdown => "shutdown",
            TaskType::WorkerStartup => "worker_startup",
            TaskType::WorkerShutdown => "worker_shutdown",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification attached to a handler failure.
///
/// - `Ordinary`: recorded and counted, the bot keeps running.
/// - `ImmediateHalt`: the handler explicitly asked for shutdown; bypasses the
///   failure ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Ordinary,
    ImmediateHalt,
}

/// How failures are counted against `max_exceptions`.
///
/// - `Cumulative`: every failure since entering Running counts (default).
/// - `Consecutive`: a successful task resets the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureWindow {
    #[default]
    Cumulative,
    Consecutive,
}

impl FromStr for FailureWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cumulative" => Ok(FailureWindow::Cumulative),
            "consecutive" => Ok(FailureWindow::Consecutive),
            other => Err(format!(
                "invalid failure_window: {other} (expected \"cumulative\" or \"consecutive\")"
            )),
        }
    }
}

/// Which transport carries work items between the runtime and its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// Single process, shared memory.
    #[default]
    Memory,
    /// Serialized messages over an external queue.
    Distributed,
}

/// When the nonce manager consults the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceReconcileMode {
    /// Only on an explicit `reset_from_chain`.
    Manual,
    /// Before every issued nonce.
    PerCall,
    /// When the configured interval has elapsed since the last check.
    #[default]
    Periodic,
}

/// Parse a duration string such as `"500ms"`, `"30s"`, `"5m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
