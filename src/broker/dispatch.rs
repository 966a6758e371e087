// src/broker/dispatch.rs

use std::sync::Arc;

use tracing::debug;

use super::{Broker, TaskId, WorkItem};
use crate::errors::Result;
use crate::types::TaskType;

/// Reference to a submitted task; its result arrives on the broker's
/// result stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_id: TaskId,
    pub handler: String,
    pub kind: TaskType,
}

/// Submits planned work items to the broker.
#[derive(Clone)]
pub struct TaskDispatcher {
    broker: Arc<dyn Broker>,
}

impl TaskDispatcher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub async fn submit(&self, item: WorkItem) -> Result<TaskHandle> {
        let handle = TaskHandle {
            task_id: item.task_id,
            handler: item.handler.clone(),
            kind: item.kind,
        };
        self.broker.enqueue(item).await?;
        debug!(task = %handle.task_id, handler = %handle.handler, kind = %handle.kind, "submitted");
        Ok(handle)
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }
}
