// src/broker/memory.rs

use std::sync::Mutex;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{closed_signal, Broker, TaskResult, WorkItem};
use crate::errors::{BotError, Result};
use crate::types::BoxFuture;

/// Single-process broker: one FIFO shared by all local workers.
///
/// Items are dequeued in submission order; with more than one worker they
/// may complete out of order.
pub struct InMemoryBroker {
    work_tx: mpsc::UnboundedSender<WorkItem>,
    work_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    results_tx: mpsc::UnboundedSender<TaskResult>,
    results_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskResult>>>,
    closed: watch::Sender<bool>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            work_tx,
            work_rx: tokio::sync::Mutex::new(work_rx),
            results_tx,
            results_rx: Mutex::new(Some(results_rx)),
            closed,
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Broker for InMemoryBroker {
    fn enqueue(&self, item: WorkItem) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(BotError::transport("broker closed"));
            }
            debug!(task = %item.task_id, handler = %item.handler, "enqueued");
            self.work_tx.send(item)?;
            Ok(())
        })
    }

    fn dequeue(&self) -> BoxFuture<'_, Result<Option<WorkItem>>> {
        Box::pin(async move {
            let closed = self.closed.subscribe();
            tokio::select! {
                item = async {
                    let mut rx = self.work_rx.lock().await;
                    rx.recv().await
                } => Ok(item),
                _ = closed_signal(closed) => Ok(None),
            }
        })
    }

    fn publish_result(&self, result: TaskResult) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.results_tx.send(result)?;
            Ok(())
        })
    }

    fn subscribe_results(&self) -> Result<mpsc::UnboundedReceiver<TaskResult>> {
        self.results_rx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| BotError::transport("result stream already subscribed"))
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::TaskId;
    use crate::handler::HandlerId;
    use crate::trigger::TriggerPayload;
    use crate::types::TaskType;
    use chrono::Utc;

    fn item(n: u64) -> WorkItem {
        WorkItem {
            task_id: TaskId(n),
            handler_id: HandlerId(0),
            handler: "h".into(),
            fingerprint: "fp".into(),
            kind: TaskType::Shutdown,
            payload: TriggerPayload::Lifecycle,
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fifo_then_close() {
        let broker = InMemoryBroker::new();
        broker.enqueue(item(1)).await.unwrap();
        broker.enqueue(item(2)).await.unwrap();

        assert_eq!(broker.dequeue().await.unwrap().map(|i| i.task_id), Some(TaskId(1)));
        assert_eq!(broker.dequeue().await.unwrap().map(|i| i.task_id), Some(TaskId(2)));

        broker.close();
        assert!(broker.dequeue().await.unwrap().is_none());
        assert!(broker.enqueue(item(3)).await.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn results_have_a_single_subscriber() {
        let broker = InMemoryBroker::new();
        assert!(broker.subscribe_results().is_ok());
        assert!(broker.subscribe_results().is_err());
    }
}
