// src/broker/mod.rs

//! Work items, task results and the transports that carry them.
//!
//! The runtime enqueues [`WorkItem`]s and consumes [`TaskResult`]s; workers
//! do the opposite. Whether both sides share memory or talk over a message
//! queue is hidden behind [`Broker`].

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::errors::Result;
use crate::handler::{HandlerError, HandlerId};
use crate::metrics::Measurement;
use crate::trigger::TriggerPayload;
use crate::types::{BoxFuture, TaskType};

pub mod dispatch;
pub mod distributed;
pub mod memory;

pub use dispatch::{TaskDispatcher, TaskHandle};
pub use distributed::{DistributedBroker, LoopbackQueue, MessageQueue};
pub use memory::InMemoryBroker;

/// Unique within one runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// One handler invocation, ready to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub task_id: TaskId,
    pub handler_id: HandlerId,
    pub handler: String,
    /// Fingerprint of the registry the item was planned against.
    pub fingerprint: String,
    pub kind: TaskType,
    pub payload: TriggerPayload,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success(Measurement),
    Failure(HandlerError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub handler_id: HandlerId,
    pub handler: String,
    pub kind: TaskType,
    pub outcome: TaskOutcome,
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
    pub worker: Option<usize>,
}

impl TaskResult {
    /// A failure produced without running the handler.
    pub fn failed(item: &WorkItem, error: HandlerError) -> Self {
        Self {
            task_id: item.task_id,
            handler_id: item.handler_id,
            handler: item.handler.clone(),
            kind: item.kind,
            outcome: TaskOutcome::Failure(error),
            duration: Duration::ZERO,
            completed_at: Utc::now(),
            block_number: item.payload.block_number(),
            log_index: item.payload.log_index(),
            worker: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Success(_))
    }

    pub fn error(&self) -> Option<&HandlerError> {
        match &self.outcome {
            TaskOutcome::Failure(err) => Some(err),
            TaskOutcome::Success(_) => None,
        }
    }

    pub fn measurement(&self) -> Option<&Measurement> {
        match &self.outcome {
            TaskOutcome::Success(m) => Some(m),
            TaskOutcome::Failure(_) => None,
        }
    }
}

/// Queue of work items plus a result stream.
pub trait Broker: Send + Sync {
    fn enqueue(&self, item: WorkItem) -> BoxFuture<'_, Result<()>>;

    /// Next item for a worker, or `None` once the broker is closed.
    fn dequeue(&self) -> BoxFuture<'_, Result<Option<WorkItem>>>;

    fn publish_result(&self, result: TaskResult) -> BoxFuture<'_, Result<()>>;

    /// The result stream. Only one subscriber is supported.
    fn subscribe_results(&self) -> Result<mpsc::UnboundedReceiver<TaskResult>>;

    /// Stop handing out work. Pending items are discarded.
    fn close(&self);
}

/// Resolves once `rx` observes `true` or its sender goes away.
pub(crate) async fn closed_signal(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
