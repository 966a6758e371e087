// src/trigger/mod.rs

//! Inbound occurrences and their mapping to handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::{BlockHeader, ContractLog};
use crate::handler::HandlerId;
use crate::metrics::Datapoint;
use crate::state::StateSnapshot;
use crate::types::TaskType;

pub mod adapter;
pub mod cron;
pub mod sources;

pub use adapter::TriggerAdapter;
pub use cron::CronSchedule;
pub use sources::{SourceHandles, TriggerSources};

/// A new value appended to a watched metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricUpdate {
    pub metric: String,
    pub value: Datapoint,
    pub timestamp: DateTime<Utc>,
}

/// Argument passed to a handler alongside its context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TriggerPayload {
    Block(BlockHeader),
    Log(ContractLog),
    CronTick { scheduled_at: DateTime<Utc> },
    Metric(MetricUpdate),
    /// Startup handlers receive the restored snapshot.
    Startup(StateSnapshot),
    /// Shutdown and worker lifecycle hooks.
    Lifecycle,
}

impl TriggerPayload {
    pub fn block_number(&self) -> Option<u64> {
        match self {
            TriggerPayload::Block(header) => Some(header.number),
            TriggerPayload::Log(log) => Some(log.block_number),
            _ => None,
        }
    }

    pub fn log_index(&self) -> Option<u64> {
        match self {
            TriggerPayload::Log(log) => Some(log.log_index),
            _ => None,
        }
    }

    /// Short description for task logs: `block=N`, `log=tx:index`, `tick=...`.
    pub fn label(&self) -> String {
        match self {
            TriggerPayload::Block(header) => format!("block={}", header.number),
            TriggerPayload::Log(log) => format!("log={}:{}", log.transaction_hash, log.log_index),
            TriggerPayload::CronTick { scheduled_at } => format!("tick={}", scheduled_at.to_rfc3339()),
            TriggerPayload::Metric(update) => format!("metric={}={}", update.metric, update.value),
            TriggerPayload::Startup(_) => "startup".to_string(),
            TriggerPayload::Lifecycle => "lifecycle".to_string(),
        }
    }

    pub fn as_block(&self) -> Option<&BlockHeader> {
        match self {
            TriggerPayload::Block(header) => Some(header),
            _ => None,
        }
    }

    pub fn as_log(&self) -> Option<&ContractLog> {
        match self {
            TriggerPayload::Log(log) => Some(log),
            _ => None,
        }
    }

    pub fn as_metric(&self) -> Option<&MetricUpdate> {
        match self {
            TriggerPayload::Metric(update) => Some(update),
            _ => None,
        }
    }
}

/// An occurrence resolved to the handlers it should run.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub kind: TaskType,
    pub payload: TriggerPayload,
    pub handlers: Vec<HandlerId>,
}

/// Raw inputs from the chain provider and the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    NewBlock(BlockHeader),
    NewLog(ContractLog),
    CronTick {
        expression: String,
        scheduled_at: DateTime<Utc>,
    },
}
