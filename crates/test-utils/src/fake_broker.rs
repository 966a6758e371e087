//! Scripted broker for runtime tests.
//!
//! Wraps an [`InMemoryBroker`] so real workers still execute the items, and
//! lets a test:
//! - inspect every item the runtime enqueued,
//! - refuse enqueues for a named handler (dispatch failures),
//! - deliver every result twice (at-least-once transports).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chainbot::broker::{Broker, InMemoryBroker, TaskResult, WorkItem};
use chainbot::errors::{BotError, Result};
use chainbot::types::BoxFuture;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
pub struct FakeBroker {
    inner: InMemoryBroker,
    enqueued: Mutex<Vec<WorkItem>>,
    refused: Mutex<HashSet<String>>,
    duplicate_results: AtomicBool,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every enqueue for `handler` fails with a transport error.
    pub fn refuse(self, handler: &str) -> Self {
        self.refused.lock().unwrap().insert(handler.to_string());
        self
    }

    pub fn duplicate_results(self) -> Self {
        self.duplicate_results.store(true, Ordering::SeqCst);
        self
    }

    /// Handler names in enqueue order.
    pub fn enqueued_handlers(&self) -> Vec<String> {
        self.enqueued
            .lock()
            .unwrap()
            .iter()
            .map(|item| item.handler.clone())
            .collect()
    }

    pub fn enqueued(&self) -> Vec<WorkItem> {
        self.enqueued.lock().unwrap().clone()
    }
}

impl Broker for FakeBroker {
    fn enqueue(&self, item: WorkItem) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.refused.lock().unwrap().contains(&item.handler) {
                return Err(BotError::transport(format!(
                    "queue refused {}",
                    item.handler
                )));
            }
            self.enqueued.lock().unwrap().push(item.clone());
            self.inner.enqueue(item).await
        })
    }

    fn dequeue(&self) -> BoxFuture<'_, Result<Option<WorkItem>>> {
        self.inner.dequeue()
    }

    fn publish_result(&self, result: TaskResult) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.duplicate_results.load(Ordering::SeqCst) {
                self.inner.publish_result(result.clone()).await?;
            }
            self.inner.publish_result(result).await
        })
    }

    fn subscribe_results(&self) -> Result<mpsc::UnboundedReceiver<TaskResult>> {
        self.inner.subscribe_results()
    }

    fn close(&self) {
        self.inner.close();
    }
}
